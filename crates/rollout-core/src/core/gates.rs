// crates/rollout-core/src/core/gates.rs
// ============================================================================
// Module: Promotion Gate Evaluator
// Description: Pure AND-logic evaluation of ring promotion thresholds.
// Purpose: Report pass/fail per criterion; the state machine applies transitions.
// Dependencies: crate::core::{intent, rings, time}, serde
// ============================================================================

//! ## Overview
//! Promotion out of a ring requires all five sub-gates to pass: success
//! rate, time to compliance, incident count, approval status, and rollback
//! validation. Evaluation is a pure function over a telemetry snapshot and
//! the ring's calibrated thresholds. There is no partial credit: one failing
//! gate blocks promotion, and every check carries its threshold and actual
//! value so a blocked promotion is diagnosable without re-evaluation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::intent::RingTelemetry;
use crate::core::rings::ConnectivityClass;
use crate::core::rings::Ring;
use crate::core::rings::RingThresholds;
use crate::core::time::Timestamp;
use crate::interfaces::ApprovalRecord;

// ============================================================================
// SECTION: Gate Kinds
// ============================================================================

/// Promotion sub-gate kinds.
///
/// # Invariants
/// - Variants are stable for serialization and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Ring success-rate threshold.
    SuccessRate,
    /// Time-to-compliance ceiling.
    TimeToCompliance,
    /// Incident count ceiling.
    IncidentCount,
    /// CAB approval requirement.
    ApprovalStatus,
    /// Rollback plan validation requirement.
    RollbackValidated,
}

impl GateKind {
    /// Returns the stable gate name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SuccessRate => "success_rate",
            Self::TimeToCompliance => "time_to_compliance",
            Self::IncidentCount => "incident_count",
            Self::ApprovalStatus => "approval_status",
            Self::RollbackValidated => "rollback_validated",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SECTION: Gate Values
// ============================================================================

/// Threshold or actual value carried by a gate check.
///
/// # Invariants
/// - Variants are stable for serialization and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum GateBound {
    /// Basis points (9800 == 98.00%).
    BasisPoints(u32),
    /// Whole hours.
    Hours(u32),
    /// Event count.
    Count(u64),
    /// Boolean requirement.
    Flag(bool),
}

impl fmt::Display for GateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BasisPoints(bp) => write!(f, "{}.{:02}%", bp / 100, bp % 100),
            Self::Hours(hours) => write!(f, "{hours}h"),
            Self::Count(count) => count.fmt(f),
            Self::Flag(flag) => flag.fmt(f),
        }
    }
}

/// One sub-gate outcome with threshold and actual values.
///
/// # Invariants
/// - `threshold` and `actual` use the same unit for a given gate kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheck {
    /// Gate kind.
    pub gate: GateKind,
    /// Whether the gate passed.
    pub passed: bool,
    /// Configured threshold.
    pub threshold: GateBound,
    /// Observed value.
    pub actual: GateBound,
}

/// Full promotion gate evaluation for one ring.
///
/// # Invariants
/// - `allow_promotion` is true only when every check passed (strict AND).
/// - Recomputed every cycle; never cached beyond one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEvaluationResult {
    /// Ring that was evaluated.
    pub ring: Ring,
    /// All five sub-gate checks.
    pub checks: Vec<GateCheck>,
    /// Overall promotion decision.
    pub allow_promotion: bool,
}

impl GateEvaluationResult {
    /// Returns the kinds of all failing gates.
    #[must_use]
    pub fn failing_gates(&self) -> Vec<GateKind> {
        self.checks.iter().filter(|check| !check.passed).map(|check| check.gate).collect()
    }
}

// ============================================================================
// SECTION: Approval Gate Input
// ============================================================================

/// Approval requirement resolved by the caller for the pending promotion.
///
/// # Invariants
/// - The evaluator checks the requirement as given; deciding whether
///   approval is required is the state machine's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalGateInput {
    /// No approval is required for this promotion.
    NotRequired,
    /// Approval is required; the record, if any, is checked for validity.
    Required {
        /// Recorded approval, if one exists.
        record: Option<ApprovalRecord>,
        /// Evaluation time used for the expiry check.
        now: Timestamp,
    },
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates the five promotion sub-gates for one ring.
///
/// Pure over the telemetry snapshot and thresholds; does not mutate state.
/// Zero completed installations fail the success-rate gate closed.
#[must_use]
pub fn evaluate_promotion(
    telemetry: &RingTelemetry,
    thresholds: &RingThresholds,
    connectivity: ConnectivityClass,
    rollback_validated: bool,
    approval: &ApprovalGateInput,
) -> GateEvaluationResult {
    let success_check = success_rate_check(telemetry, thresholds);
    let compliance_check = compliance_check(telemetry, thresholds, connectivity);
    let incident_check = GateCheck {
        gate: GateKind::IncidentCount,
        passed: telemetry.incident_count <= thresholds.max_incidents,
        threshold: GateBound::Count(u64::from(thresholds.max_incidents)),
        actual: GateBound::Count(u64::from(telemetry.incident_count)),
    };
    let approval_check = approval_check(approval);
    let rollback_check = GateCheck {
        gate: GateKind::RollbackValidated,
        passed: rollback_validated,
        threshold: GateBound::Flag(true),
        actual: GateBound::Flag(rollback_validated),
    };

    let checks =
        vec![success_check, compliance_check, incident_check, approval_check, rollback_check];
    let allow_promotion = checks.iter().all(|check| check.passed);
    GateEvaluationResult {
        ring: telemetry.ring,
        checks,
        allow_promotion,
    }
}

/// Computes the success-rate check, failing closed on empty telemetry.
fn success_rate_check(telemetry: &RingTelemetry, thresholds: &RingThresholds) -> GateCheck {
    let completed = telemetry.success_count.saturating_add(telemetry.failure_count);
    let actual_bp = if completed == 0 {
        0
    } else {
        let scaled = telemetry.success_count.saturating_mul(10_000) / completed;
        u32::try_from(scaled).unwrap_or(10_000)
    };
    GateCheck {
        gate: GateKind::SuccessRate,
        passed: completed > 0 && actual_bp >= thresholds.min_success_rate_bp,
        threshold: GateBound::BasisPoints(thresholds.min_success_rate_bp),
        actual: GateBound::BasisPoints(actual_bp),
    }
}

/// Computes the time-to-compliance check for the scope's connectivity class.
fn compliance_check(
    telemetry: &RingTelemetry,
    thresholds: &RingThresholds,
    connectivity: ConnectivityClass,
) -> GateCheck {
    let ceiling = thresholds.compliance.ceiling_hours(connectivity);
    GateCheck {
        gate: GateKind::TimeToCompliance,
        passed: telemetry.compliance_hours <= ceiling,
        threshold: GateBound::Hours(ceiling),
        actual: GateBound::Hours(telemetry.compliance_hours),
    }
}

/// Computes the approval check from the resolved requirement.
fn approval_check(approval: &ApprovalGateInput) -> GateCheck {
    let (passed, actual) = match approval {
        ApprovalGateInput::NotRequired => (true, true),
        ApprovalGateInput::Required { record, now } => {
            let valid = record
                .as_ref()
                .is_some_and(|approval| approval.approved && approval.expires_at > *now);
            (valid, valid)
        }
    };
    GateCheck {
        gate: GateKind::ApprovalStatus,
        passed,
        threshold: GateBound::Flag(true),
        actual: GateBound::Flag(actual),
    }
}
