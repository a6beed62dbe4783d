// crates/rollout-core/src/core/time.rs
// ============================================================================
// Module: Rollout Time Model
// Description: Canonical timestamp representation for records and schedules.
// Purpose: Provide deterministic time values supplied by callers, never read internally.
// Dependencies: serde, thiserror, time
// ============================================================================

//! ## Overview
//! Rollout Control embeds explicit time values in intents, drift events, and
//! audit records. The core never reads wall-clock time directly; callers and
//! runtime edges supply timestamps through [`WallClock`] implementations so
//! tests can drive evaluation deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Milliseconds in one hour, used by schedule arithmetic.
const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Errors from parsing textual timestamps.
#[derive(Debug, Error)]
pub enum TimestampParseError {
    /// The input is not a valid RFC 3339 datetime.
    #[error("invalid rfc3339 timestamp: {0}")]
    InvalidFormat(String),
    /// The datetime falls outside the representable millisecond range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

/// Canonical timestamp used in Rollout Control records.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads wall-clock time.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Parses an RFC 3339 datetime, as used in schedule declarations.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampParseError`] for malformed input or datetimes
    /// outside the representable range.
    pub fn from_rfc3339(text: &str) -> Result<Self, TimestampParseError> {
        let parsed = OffsetDateTime::parse(text, &Rfc3339)
            .map_err(|error| TimestampParseError::InvalidFormat(error.to_string()))?;
        let millis = i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000)
            .map_err(|_| TimestampParseError::OutOfRange(text.to_string()))?;
        Ok(Self(millis))
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp advanced by the given number of hours, saturating.
    #[must_use]
    pub fn plus_hours(self, hours: u32) -> Self {
        Self(self.0.saturating_add(MILLIS_PER_HOUR.saturating_mul(i64::from(hours))))
    }

    /// Returns this timestamp moved back by the given number of hours, saturating.
    #[must_use]
    pub fn minus_hours(self, hours: u32) -> Self {
        Self(self.0.saturating_sub(MILLIS_PER_HOUR.saturating_mul(i64::from(hours))))
    }

    /// Returns the number of whole hours elapsed since `earlier` (zero if negative).
    #[must_use]
    pub fn hours_since(self, earlier: Self) -> u32 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta <= 0 {
            return 0;
        }
        u32::try_from(delta / MILLIS_PER_HOUR).unwrap_or(u32::MAX)
    }
}

// ============================================================================
// SECTION: Wall Clock
// ============================================================================

/// Wall-clock source injected at runtime edges.
///
/// The scheduled reconciler and store timestamps use this seam; tests supply
/// a manual clock to drive iterations deterministically.
pub trait WallClock {
    /// Returns the current wall-clock timestamp.
    fn now(&self) -> Timestamp;
}

/// System wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}
