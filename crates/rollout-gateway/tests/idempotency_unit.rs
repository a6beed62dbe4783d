// crates/rollout-gateway/tests/idempotency_unit.rs
// ============================================================================
// Module: Idempotency Key and Ledger Tests
// Description: Deterministic key derivation and ledger phase transitions.
// Purpose: Validate the at-most-one-in-flight contract per key.
// ============================================================================

//! ## Overview
//! Tests for idempotency key derivation and the in-memory ledger:
//! - Keys are stable across parameter field ordering
//! - Adapter, operation kind, and parameters all feed the key
//! - `begin` decisions follow the recorded phase exactly
//! - Completion and abandonment require an in-flight record
//! - Superseded records no longer guard their key

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

use serde_json::json;

use rollout_core::AdapterId;
use rollout_core::ConnectorOperation;
use rollout_core::CorrelationId;
use rollout_core::ErrorClassification;
use rollout_core::IdempotencyKey;
use rollout_core::IdempotencyLedger;
use rollout_core::LedgerDecision;
use rollout_core::LedgerError;
use rollout_core::OperationKind;
use rollout_core::OperationPhase;
use rollout_core::PublishReceipt;
use rollout_core::Timestamp;
use rollout_gateway::InMemoryLedger;
use rollout_gateway::derive_key;

type TestResult = Result<(), String>;

fn adapter() -> AdapterId {
    AdapterId::new("mdm-east")
}

fn now() -> Timestamp {
    Timestamp::from_unix_millis(1_700_000_000_000)
}

fn in_flight(key: &IdempotencyKey) -> ConnectorOperation {
    ConnectorOperation {
        key: key.clone(),
        correlation_id: CorrelationId::new(key.as_str()),
        adapter_id: adapter(),
        kind: OperationKind::Publish,
        attempts: 0,
        last_classification: None,
        phase: OperationPhase::InFlight,
        receipt: None,
        recorded_at: now(),
    }
}

fn receipt() -> PublishReceipt {
    PublishReceipt {
        status: "created".to_string(),
        provider_object_id: "obj-1".to_string(),
    }
}

#[test]
fn key_is_stable_across_field_ordering() -> TestResult {
    let forward = json!({
        "intent_id": "int-1",
        "ring": "lab",
        "version": "2.1.0",
    });
    let reversed = json!({
        "version": "2.1.0",
        "ring": "lab",
        "intent_id": "int-1",
    });
    let first =
        derive_key(&adapter(), OperationKind::Publish, &forward).map_err(|err| err.to_string())?;
    let second =
        derive_key(&adapter(), OperationKind::Publish, &reversed).map_err(|err| err.to_string())?;
    if first != second {
        return Err("field ordering must not change the key".to_string());
    }
    Ok(())
}

#[test]
fn key_is_lowercase_hex_sha256() -> TestResult {
    let key = derive_key(&adapter(), OperationKind::Publish, &json!({ "ring": "lab" }))
        .map_err(|err| err.to_string())?;
    if key.as_str().len() != 64 {
        return Err(format!("expected a 64-character digest, got {}", key.as_str().len()));
    }
    if !key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
        return Err("keys are lowercase hex".to_string());
    }
    Ok(())
}

#[test]
fn every_input_feeds_the_key() -> TestResult {
    let params = json!({ "ring": "lab" });
    let base =
        derive_key(&adapter(), OperationKind::Publish, &params).map_err(|err| err.to_string())?;

    let other_adapter = derive_key(&AdapterId::new("mdm-west"), OperationKind::Publish, &params)
        .map_err(|err| err.to_string())?;
    if base == other_adapter {
        return Err("the adapter id must feed the key".to_string());
    }
    let other_kind =
        derive_key(&adapter(), OperationKind::Remediate, &params).map_err(|err| err.to_string())?;
    if base == other_kind {
        return Err("the operation kind must feed the key".to_string());
    }
    let other_params = derive_key(&adapter(), OperationKind::Publish, &json!({ "ring": "canary" }))
        .map_err(|err| err.to_string())?;
    if base == other_params {
        return Err("the parameter set must feed the key".to_string());
    }
    Ok(())
}

#[test]
fn begin_decisions_follow_the_recorded_phase() -> TestResult {
    let ledger = InMemoryLedger::new();
    let key = IdempotencyKey::new("key-1");

    match ledger.begin(in_flight(&key)).map_err(|err| err.to_string())? {
        LedgerDecision::Fresh => {}
        other => return Err(format!("first begin must be fresh, got {other:?}")),
    }
    match ledger.begin(in_flight(&key)).map_err(|err| err.to_string())? {
        LedgerDecision::InFlight(_) => {}
        other => return Err(format!("second begin must see the in-flight record, got {other:?}")),
    }

    ledger.complete(&key, receipt(), 2, now()).map_err(|err| err.to_string())?;
    match ledger.begin(in_flight(&key)).map_err(|err| err.to_string())? {
        LedgerDecision::AlreadyCompleted(prior) => {
            if prior.receipt != Some(receipt()) || prior.attempts != 2 {
                return Err(format!("completed record lost its outcome: {prior:?}"));
            }
        }
        other => return Err(format!("a completed key must dedupe, got {other:?}")),
    }

    ledger.supersede(&key, now()).map_err(|err| err.to_string())?;
    match ledger.begin(in_flight(&key)).map_err(|err| err.to_string())? {
        LedgerDecision::Fresh => Ok(()),
        other => Err(format!("a superseded key must admit a fresh write, got {other:?}")),
    }
}

#[test]
fn abandoned_records_release_the_key_and_keep_the_classification() -> TestResult {
    let ledger = InMemoryLedger::new();
    let key = IdempotencyKey::new("key-2");
    ledger.begin(in_flight(&key)).map_err(|err| err.to_string())?;
    ledger
        .abandon(&key, Some(ErrorClassification::Transient), 4, now())
        .map_err(|err| err.to_string())?;

    let recorded = ledger
        .get(&key)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "abandoned records stay in the ledger".to_string())?;
    if recorded.phase != OperationPhase::Superseded {
        return Err(format!("unexpected phase: {:?}", recorded.phase));
    }
    if recorded.last_classification != Some(ErrorClassification::Transient) {
        return Err("abandonment must record the failure classification".to_string());
    }

    match ledger.begin(in_flight(&key)).map_err(|err| err.to_string())? {
        LedgerDecision::Fresh => Ok(()),
        other => Err(format!("an abandoned key must admit a fresh write, got {other:?}")),
    }
}

#[test]
fn settlement_requires_an_in_flight_record() -> TestResult {
    let ledger = InMemoryLedger::new();
    let key = IdempotencyKey::new("key-3");

    match ledger.complete(&key, receipt(), 1, now()) {
        Err(LedgerError::MissingRecord(missing)) if missing == key => {}
        Err(other) => return Err(format!("unexpected error: {other}")),
        Ok(()) => return Err("completing an unknown key must fail".to_string()),
    }

    ledger.begin(in_flight(&key)).map_err(|err| err.to_string())?;
    ledger.complete(&key, receipt(), 1, now()).map_err(|err| err.to_string())?;
    match ledger.abandon(&key, None, 1, now()) {
        Err(LedgerError::MissingRecord(_)) => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(()) => Err("a completed record cannot be abandoned".to_string()),
    }
}
