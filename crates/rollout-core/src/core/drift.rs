// crates/rollout-core/src/core/drift.rs
// ============================================================================
// Module: Drift Records
// Description: Drift types, severities, and append-only drift events.
// Purpose: Capture detected mismatches between declared intent and reality.
// Dependencies: crate::core::{identifiers, rings, time}, serde
// ============================================================================

//! ## Overview
//! Drift is a detected mismatch between a deployment intent and the state an
//! execution plane reports. Drift events are append-only records: once
//! emitted they are never mutated, and a later remediation produces a new
//! event rather than rewriting history.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::IntentId;
use crate::core::rings::Ring;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Drift Types
// ============================================================================

/// Classified drift categories.
///
/// # Invariants
/// - Variants are stable for serialization and remediation policy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    /// The expected assignment is absent from the execution plane.
    MissingAssignment,
    /// The installed version differs from the intended version.
    VersionMismatch,
    /// The assignment scope differs from the intended scope.
    ScopeMismatch,
    /// The cohort is assigned and versioned correctly but out of compliance.
    ComplianceDrift,
}

impl DriftType {
    /// Returns the stable drift type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MissingAssignment => "missing_assignment",
            Self::VersionMismatch => "version_mismatch",
            Self::ScopeMismatch => "scope_mismatch",
            Self::ComplianceDrift => "compliance_drift",
        }
    }

    /// Returns the fixed severity assigned to this drift type.
    #[must_use]
    pub const fn severity(self) -> DriftSeverity {
        match self {
            Self::MissingAssignment => DriftSeverity::High,
            Self::VersionMismatch => DriftSeverity::Medium,
            Self::ScopeMismatch => DriftSeverity::Critical,
            Self::ComplianceDrift => DriftSeverity::Low,
        }
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drift severity levels.
///
/// # Invariants
/// - Ordering is ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    /// Informational; remediable in place.
    Low,
    /// Degraded but converging.
    Medium,
    /// Materially out of declared state.
    High,
    /// Scope or policy integrity is at stake.
    Critical,
}

// ============================================================================
// SECTION: Remediation Outcome
// ============================================================================

/// Outcome recorded on a drift event.
///
/// # Invariants
/// - Variants are stable for serialization and escalation handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// Policy forbids auto-remediation; reported for manual or CAB review.
    ReportOnly,
    /// An auto-remediation attempt was issued.
    Attempted {
        /// One-based attempt number.
        attempt: u32,
    },
    /// A further attempt is scheduled after backoff.
    Scheduled {
        /// One-based attempt number of the next attempt.
        attempt: u32,
        /// Earliest time of the next attempt.
        next_attempt_at: Timestamp,
    },
    /// Auto-remediation attempts are exhausted; the drift is persistent.
    Persistent,
}

// ============================================================================
// SECTION: Drift Events
// ============================================================================

/// Append-only drift detection record.
///
/// # Invariants
/// - Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEvent {
    /// Intent the drift was detected against.
    pub intent_id: IntentId,
    /// Correlation identifier of the queried connector operation.
    pub correlation_id: CorrelationId,
    /// Ring the drift was observed in.
    pub ring: Ring,
    /// Classified drift type.
    pub drift: DriftType,
    /// Severity assigned at detection.
    pub severity: DriftSeverity,
    /// Detection timestamp.
    pub detected_at: Timestamp,
    /// Remediation outcome recorded with the event.
    pub remediation: RemediationOutcome,
}
