// crates/rollout-gateway/src/idempotency.rs
// ============================================================================
// Module: Idempotency Keys and Ledger
// Description: Deterministic write keys and the in-memory ledger backend.
// Purpose: Guarantee at-most-one-logical-effect for connector writes.
// Dependencies: rollout-core, serde, serde_jcs, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every connector write is keyed by a SHA-256 digest over the canonical
//! JSON form of (adapter id, operation kind, parameter set). Canonical JSON
//! (RFC 8785) makes the key independent of field ordering, so the same
//! logical write always maps to the same key across retries and process
//! restarts. The correlation id of a write equals its key.
//!
//! The in-memory ledger implements the atomic check-and-set contract for
//! single-process deployments and tests; durable deployments use the
//! sqlite-backed ledger.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use rollout_core::AdapterId;
use rollout_core::ConnectorOperation;
use rollout_core::ErrorClassification;
use rollout_core::IdempotencyKey;
use rollout_core::IdempotencyLedger;
use rollout_core::LedgerDecision;
use rollout_core::LedgerError;
use rollout_core::OperationKind;
use rollout_core::OperationPhase;
use rollout_core::PublishReceipt;
use rollout_core::Timestamp;

// ============================================================================
// SECTION: Key Derivation
// ============================================================================

/// Key derivation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Parameters could not be canonicalized.
    #[error("idempotency key canonicalization failure: {0}")]
    Canonicalize(String),
}

/// Canonical material hashed into an idempotency key.
#[derive(Debug, Serialize)]
struct KeyMaterial<'a> {
    /// Adapter the operation targets.
    adapter_id: &'a str,
    /// Stable operation kind name.
    operation: &'a str,
    /// Operation parameter set.
    params: &'a serde_json::Value,
}

/// Derives the idempotency key for a connector write.
///
/// The key is the lowercase hex SHA-256 of the RFC 8785 canonical JSON of
/// (adapter id, operation kind, parameters). Identical logical writes yield
/// identical keys regardless of parameter field ordering.
///
/// # Errors
///
/// Returns [`KeyError::Canonicalize`] when the parameters cannot be
/// canonicalized.
pub fn derive_key(
    adapter_id: &AdapterId,
    kind: OperationKind,
    params: &serde_json::Value,
) -> Result<IdempotencyKey, KeyError> {
    let material = KeyMaterial {
        adapter_id: adapter_id.as_str(),
        operation: kind.name(),
        params,
    };
    let canonical =
        serde_jcs::to_string(&material).map_err(|error| KeyError::Canonicalize(error.to_string()))?;
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Infallible for String targets.
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(IdempotencyKey::new(hex))
}

// ============================================================================
// SECTION: In-Memory Ledger
// ============================================================================

/// In-memory idempotency ledger.
///
/// # Invariants
/// - `begin` is atomic under the internal lock: at most one in-flight
///   record can exist per key.
/// - Records are superseded, never deleted.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    /// Recorded operations keyed by idempotency key.
    operations: Mutex<BTreeMap<IdempotencyKey, ConnectorOperation>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyLedger for InMemoryLedger {
    fn begin(&self, operation: ConnectorOperation) -> Result<LedgerDecision, LedgerError> {
        let mut guard = self
            .operations
            .lock()
            .map_err(|_| LedgerError::Ledger("ledger lock poisoned".into()))?;
        match guard.get(&operation.key) {
            Some(existing) if existing.phase == OperationPhase::Completed => {
                Ok(LedgerDecision::AlreadyCompleted(existing.clone()))
            }
            Some(existing) if existing.phase == OperationPhase::InFlight => {
                Ok(LedgerDecision::InFlight(existing.clone()))
            }
            // Superseded records no longer guard the key.
            _ => {
                guard.insert(operation.key.clone(), operation);
                Ok(LedgerDecision::Fresh)
            }
        }
    }

    fn complete(
        &self,
        key: &IdempotencyKey,
        receipt: PublishReceipt,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut guard = self
            .operations
            .lock()
            .map_err(|_| LedgerError::Ledger("ledger lock poisoned".into()))?;
        let Some(operation) = guard.get_mut(key) else {
            return Err(LedgerError::MissingRecord(key.clone()));
        };
        if operation.phase != OperationPhase::InFlight {
            return Err(LedgerError::MissingRecord(key.clone()));
        }
        operation.phase = OperationPhase::Completed;
        operation.receipt = Some(receipt);
        operation.attempts = attempts;
        operation.last_classification = None;
        operation.recorded_at = recorded_at;
        Ok(())
    }

    fn abandon(
        &self,
        key: &IdempotencyKey,
        classification: Option<ErrorClassification>,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut guard = self
            .operations
            .lock()
            .map_err(|_| LedgerError::Ledger("ledger lock poisoned".into()))?;
        let Some(operation) = guard.get_mut(key) else {
            return Err(LedgerError::MissingRecord(key.clone()));
        };
        if operation.phase != OperationPhase::InFlight {
            return Err(LedgerError::MissingRecord(key.clone()));
        }
        operation.phase = OperationPhase::Superseded;
        operation.last_classification = classification;
        operation.attempts = attempts;
        operation.recorded_at = recorded_at;
        Ok(())
    }

    fn supersede(&self, key: &IdempotencyKey, recorded_at: Timestamp) -> Result<(), LedgerError> {
        let mut guard = self
            .operations
            .lock()
            .map_err(|_| LedgerError::Ledger("ledger lock poisoned".into()))?;
        let Some(operation) = guard.get_mut(key) else {
            return Err(LedgerError::MissingRecord(key.clone()));
        };
        operation.phase = OperationPhase::Superseded;
        operation.recorded_at = recorded_at;
        Ok(())
    }

    fn get(&self, key: &IdempotencyKey) -> Result<Option<ConnectorOperation>, LedgerError> {
        let guard = self
            .operations
            .lock()
            .map_err(|_| LedgerError::Ledger("ledger lock poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }
}
