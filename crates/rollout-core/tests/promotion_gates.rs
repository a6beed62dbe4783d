// crates/rollout-core/tests/promotion_gates.rs
// ============================================================================
// Module: Promotion Gate Tests
// Description: Strict AND-gate evaluation over telemetry snapshots.
// Purpose: Validate per-gate pass/fail behavior and fail-closed edges.
// ============================================================================

//! ## Overview
//! Tests for the promotion gate evaluator:
//! - All five gates must pass for promotion; one failure blocks it
//! - Empty telemetry fails the success-rate gate closed
//! - Compliance ceilings split by connectivity class
//! - Approval gate checks recorded approvals for validity and expiry
//! - Failing gates are enumerable with threshold and actual values

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use rollout_core::ApprovalGateInput;
use rollout_core::ApprovalId;
use rollout_core::ApprovalRecord;
use rollout_core::ConnectivityClass;
use rollout_core::GateKind;
use rollout_core::Ring;
use rollout_core::RingCalibration;
use rollout_core::RingTelemetry;
use rollout_core::Timestamp;
use rollout_core::evaluate_promotion;

type TestResult = Result<(), String>;

fn passing_telemetry(ring: Ring) -> RingTelemetry {
    RingTelemetry {
        ring,
        success_count: 100,
        failure_count: 0,
        pending_count: 0,
        compliance_hours: 4,
        incident_count: 0,
    }
}

fn approval(approved: bool, expires_at: Timestamp) -> ApprovalRecord {
    ApprovalRecord {
        approval_id: ApprovalId::new("cab-100"),
        approved,
        expires_at,
    }
}

#[test]
fn all_gates_passing_allows_promotion() -> TestResult {
    let calibration = RingCalibration::baseline();
    let result = evaluate_promotion(
        &passing_telemetry(Ring::Canary),
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if !result.allow_promotion {
        return Err(format!("expected promotion, failing: {:?}", result.failing_gates()));
    }
    if result.checks.len() != 5 {
        return Err(format!("expected five checks, got {}", result.checks.len()));
    }
    Ok(())
}

#[test]
fn one_incident_blocks_despite_perfect_success_rate() -> TestResult {
    let calibration = RingCalibration::baseline();
    let mut telemetry = passing_telemetry(Ring::Pilot);
    telemetry.incident_count = 1;
    let result = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Pilot),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if result.allow_promotion {
        return Err("one incident must block promotion".to_string());
    }
    if result.failing_gates() != vec![GateKind::IncidentCount] {
        return Err(format!("unexpected failing gates: {:?}", result.failing_gates()));
    }
    Ok(())
}

#[test]
fn empty_telemetry_fails_success_gate_closed() -> TestResult {
    let calibration = RingCalibration::baseline();
    let telemetry = RingTelemetry {
        ring: Ring::Lab,
        success_count: 0,
        failure_count: 0,
        pending_count: 50,
        compliance_hours: 1,
        incident_count: 0,
    };
    let result = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Lab),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if result.allow_promotion {
        return Err("zero completed installations must not promote".to_string());
    }
    if !result.failing_gates().contains(&GateKind::SuccessRate) {
        return Err("success-rate gate must fail closed on empty telemetry".to_string());
    }
    Ok(())
}

#[test]
fn success_rate_below_threshold_blocks() -> TestResult {
    let calibration = RingCalibration::baseline();
    // 96/100 == 9600 bp, below the canary floor of 9700 bp.
    let telemetry = RingTelemetry {
        ring: Ring::Canary,
        success_count: 96,
        failure_count: 4,
        pending_count: 0,
        compliance_hours: 1,
        incident_count: 0,
    };
    let result = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if result.failing_gates() != vec![GateKind::SuccessRate] {
        return Err(format!("unexpected failing gates: {:?}", result.failing_gates()));
    }
    Ok(())
}

#[test]
fn compliance_ceiling_splits_by_connectivity() -> TestResult {
    let calibration = RingCalibration::baseline();
    let mut telemetry = passing_telemetry(Ring::Lab);
    telemetry.compliance_hours = 72;

    // 72h is at the intermittent ceiling and passes; the online ceiling is 24h.
    let intermittent = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Lab),
        ConnectivityClass::Intermittent,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if !intermittent.allow_promotion {
        return Err("72h is within the intermittent ceiling".to_string());
    }
    let online = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Lab),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if online.failing_gates() != vec![GateKind::TimeToCompliance] {
        return Err(format!("unexpected failing gates: {:?}", online.failing_gates()));
    }

    telemetry.compliance_hours = 73;
    let over = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Lab),
        ConnectivityClass::Intermittent,
        true,
        &ApprovalGateInput::NotRequired,
    );
    if !over.failing_gates().contains(&GateKind::TimeToCompliance) {
        return Err("73h must exceed the intermittent ceiling".to_string());
    }
    Ok(())
}

#[test]
fn required_approval_missing_blocks() -> TestResult {
    let calibration = RingCalibration::baseline();
    let now = Timestamp::from_unix_millis(1_000_000);
    let result = evaluate_promotion(
        &passing_telemetry(Ring::Canary),
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::Required {
            record: None,
            now,
        },
    );
    if result.failing_gates() != vec![GateKind::ApprovalStatus] {
        return Err(format!("unexpected failing gates: {:?}", result.failing_gates()));
    }
    Ok(())
}

#[test]
fn valid_approval_passes_and_expired_blocks() -> TestResult {
    let calibration = RingCalibration::baseline();
    let now = Timestamp::from_unix_millis(1_000_000);

    let valid = evaluate_promotion(
        &passing_telemetry(Ring::Canary),
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::Required {
            record: Some(approval(true, now.plus_hours(48))),
            now,
        },
    );
    if !valid.allow_promotion {
        return Err(format!("valid approval must pass, failing: {:?}", valid.failing_gates()));
    }

    let expired = evaluate_promotion(
        &passing_telemetry(Ring::Canary),
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::Required {
            record: Some(approval(true, now.minus_hours(1))),
            now,
        },
    );
    if expired.failing_gates() != vec![GateKind::ApprovalStatus] {
        return Err("expired approval must fail the approval gate".to_string());
    }

    let denied = evaluate_promotion(
        &passing_telemetry(Ring::Canary),
        calibration.thresholds(Ring::Canary),
        ConnectivityClass::Online,
        true,
        &ApprovalGateInput::Required {
            record: Some(approval(false, now.plus_hours(48))),
            now,
        },
    );
    if denied.failing_gates() != vec![GateKind::ApprovalStatus] {
        return Err("denied approval must fail the approval gate".to_string());
    }
    Ok(())
}

#[test]
fn unvalidated_rollback_plan_blocks() -> TestResult {
    let calibration = RingCalibration::baseline();
    let result = evaluate_promotion(
        &passing_telemetry(Ring::Lab),
        calibration.thresholds(Ring::Lab),
        ConnectivityClass::Online,
        false,
        &ApprovalGateInput::NotRequired,
    );
    if result.failing_gates() != vec![GateKind::RollbackValidated] {
        return Err(format!("unexpected failing gates: {:?}", result.failing_gates()));
    }
    Ok(())
}

#[test]
fn multiple_failures_are_all_enumerated() -> TestResult {
    let calibration = RingCalibration::baseline();
    let telemetry = RingTelemetry {
        ring: Ring::Global,
        success_count: 90,
        failure_count: 10,
        pending_count: 3,
        compliance_hours: 200,
        incident_count: 2,
    };
    let result = evaluate_promotion(
        &telemetry,
        calibration.thresholds(Ring::Global),
        ConnectivityClass::Online,
        false,
        &ApprovalGateInput::NotRequired,
    );
    let failing = result.failing_gates();
    let expected = vec![
        GateKind::SuccessRate,
        GateKind::TimeToCompliance,
        GateKind::IncidentCount,
        GateKind::RollbackValidated,
    ];
    if failing != expected {
        return Err(format!("unexpected failing gates: {failing:?}"));
    }
    // Every check carries threshold and actual for diagnostics.
    for check in &result.checks {
        if check.passed && failing.contains(&check.gate) {
            return Err(format!("gate {} reported both passed and failing", check.gate));
        }
    }
    Ok(())
}
