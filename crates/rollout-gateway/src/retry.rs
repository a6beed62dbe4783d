// crates/rollout-gateway/src/retry.rs
// ============================================================================
// Module: Retry Policy
// Description: Exponential backoff with jitter for transient failures.
// Purpose: Bound and pace retries of transient adapter errors.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! Only transient adapter failures are retried. Delays grow exponentially
//! from a base delay by a fixed multiplier, plus a uniformly random jitter
//! drawn through the [`JitterSource`] seam so tests stay deterministic. The
//! sleep itself goes through [`RetrySleeper`] for the same reason.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Retry policy for transient adapter failures.
///
/// # Invariants
/// - `max_attempts` is at least 1; attempt numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: u32,
    /// Upper bound on the random jitter added to each delay.
    pub max_jitter: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_jitter: Duration::from_millis(250),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Returns the backoff before the given 1-based attempt, without jitter.
    ///
    /// Attempt 1 has no backoff; attempt 2 waits `base_delay`, and each
    /// later attempt multiplies the previous delay by `multiplier`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(2);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

// ============================================================================
// SECTION: Jitter and Sleep Seams
// ============================================================================

/// Source of random jitter added to retry delays.
pub trait JitterSource {
    /// Returns a jitter duration bounded by `max`.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Thread-local RNG jitter source.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_millis == 0 {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(0..=max_millis);
        Duration::from_millis(millis)
    }
}

/// Sleep seam used between retry attempts.
pub trait RetrySleeper {
    /// Blocks the current worker for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl RetrySleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}
