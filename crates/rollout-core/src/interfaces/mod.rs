// crates/rollout-core/src/interfaces/mod.rs
// ============================================================================
// Module: Rollout Interfaces
// Description: Backend-agnostic interfaces for adapters, approvals, and storage.
// Purpose: Define the contract surfaces used by the Rollout Control runtime.
// Dependencies: crate::core, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how Rollout Control integrates with external systems
//! without embedding system-specific details. Execution-plane adapters,
//! approval sources, audit sinks, and stores are all trait objects injected
//! at construction. Implementations must fail closed on missing or invalid
//! data and classify every adapter response for the gateway.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::AdapterId;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::IntentId;
use crate::core::intent::ArtifactReference;
use crate::core::intent::DeploymentIntent;
use crate::core::intent::TargetScope;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Error Classification
// ============================================================================

/// Classification of every adapter response consumed by the gateway.
///
/// # Invariants
/// - Exactly one classification applies to each failure.
/// - Only `Transient` failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Rate limit, timeout, or temporary unavailability; retry with backoff.
    Transient,
    /// Bad request, conflict, or not found; surface to the caller, no retry.
    Permanent,
    /// Unauthorized scope or missing approval; escalate, never retry.
    PolicyViolation,
}

impl ErrorClassification {
    /// Returns the stable classification name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::PolicyViolation => "policy_violation",
        }
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SECTION: Execution Adapter
// ============================================================================

/// Adapter failure carrying its classification tag.
///
/// # Invariants
/// - `classification` drives gateway retry and escalation behavior.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("adapter error ({classification}): {message}")]
pub struct AdapterError {
    /// Failure classification.
    pub classification: ErrorClassification,
    /// Human-readable failure description.
    pub message: String,
}

impl AdapterError {
    /// Creates a transient adapter error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent adapter error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::Permanent,
            message: message.into(),
        }
    }

    /// Creates a policy-violation adapter error.
    #[must_use]
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self {
            classification: ErrorClassification::PolicyViolation,
            message: message.into(),
        }
    }
}

/// Receipt returned by successful adapter writes.
///
/// # Invariants
/// - `provider_object_id` identifies exactly one object in the execution
///   plane; retried writes must return the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Provider-reported operation status.
    pub status: String,
    /// Identifier of the created or updated provider object.
    pub provider_object_id: String,
}

/// Status report returned by adapter queries.
///
/// # Invariants
/// - Counts are cumulative for the queried assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterStatusReport {
    /// Whether the assignment exists in the execution plane.
    pub assigned: bool,
    /// Version the plane reports as installed, when assigned.
    pub installed_version: Option<String>,
    /// Organizational unit the plane reports the assignment scoped to.
    pub scope_org_unit: Option<String>,
    /// Devices that installed successfully.
    pub success_count: u64,
    /// Devices that failed installation.
    pub failure_count: u64,
    /// Devices still pending.
    pub pending_count: u64,
}

/// Remediation actions the gateway may issue.
///
/// # Invariants
/// - Variants are stable for serialization and idempotency-key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    /// Re-create the missing assignment.
    Reassign,
    /// Force reinstallation of the intended version.
    Reinstall,
    /// Re-apply the intended scope to the assignment.
    RefreshScope,
}

impl RemediationAction {
    /// Returns the stable action name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reassign => "reassign",
            Self::Reinstall => "reinstall",
            Self::RefreshScope => "refresh_scope",
        }
    }
}

/// Execution-plane adapter contract.
///
/// One implementation exists per execution plane; the core defines and
/// enforces this contract but never the per-plane payload mapping. Every
/// call carries an explicit timeout the adapter must enforce on its
/// blocking I/O; an elapsed deadline surfaces as a `Transient` failure.
pub trait ExecutionAdapter {
    /// Publishes an assignment for the artifact into the execution plane.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] with a classification tag when the plane
    /// rejects or cannot service the publish.
    fn publish(
        &self,
        correlation_id: &CorrelationId,
        artifact: &ArtifactReference,
        scope: &TargetScope,
        timeout: Duration,
    ) -> Result<PublishReceipt, AdapterError>;

    /// Queries assignment, version, and compliance state.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] with a classification tag when the query fails.
    fn query_status(
        &self,
        correlation_id: &CorrelationId,
        timeout: Duration,
    ) -> Result<AdapterStatusReport, AdapterError>;

    /// Issues a remediation action against an existing assignment.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] with a classification tag when the plane
    /// rejects or cannot service the action.
    fn remediate(
        &self,
        correlation_id: &CorrelationId,
        action: RemediationAction,
        timeout: Duration,
    ) -> Result<PublishReceipt, AdapterError>;
}

// ============================================================================
// SECTION: Event Sink
// ============================================================================

/// Audit event types emitted by the core.
///
/// # Invariants
/// - Variants are stable for serialization and downstream filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Intent lifecycle transition.
    IntentTransition,
    /// Promotion gate evaluation.
    GateEvaluation,
    /// Drift detection.
    DriftDetected,
    /// Connector operation execution.
    ConnectorOperation,
}

/// Audit event delivered to the external sink.
///
/// # Invariants
/// - Append-only from the sink's perspective; the core never amends events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Correlation identifier, when the event relates to a connector operation.
    pub correlation_id: Option<CorrelationId>,
    /// Event type.
    pub event_type: AuditEventType,
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Acting component (state machine, gateway, reconciler).
    pub actor: String,
    /// Outcome summary.
    pub outcome: String,
    /// Structured event details.
    pub details: serde_json::Value,
}

/// Event sink errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum EventSinkError {
    /// Sink reported a delivery failure.
    #[error("event sink delivery failure: {0}")]
    Delivery(String),
}

/// Append-only audit event sink.
///
/// Delivery is fire-and-forget from the emitting operation's perspective: a
/// sink failure never blocks the operation it documents, but the emitter
/// must queue the event for separate redelivery.
pub trait EventSink {
    /// Records one audit event.
    ///
    /// # Errors
    ///
    /// Returns [`EventSinkError`] when the sink cannot accept the event.
    fn record(&self, event: &AuditEvent) -> Result<(), EventSinkError>;
}

// ============================================================================
// SECTION: Approval Source
// ============================================================================

/// Approval record read from the external CAB system.
///
/// # Invariants
/// - The core only reads approval state; it never computes or stores
///   approval semantics itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Approval reference identifier.
    pub approval_id: ApprovalId,
    /// Whether the CAB approved.
    pub approved: bool,
    /// Approval expiry.
    pub expires_at: Timestamp,
}

/// Approval source errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Approval source reported an error.
    #[error("approval source error: {0}")]
    Source(String),
}

/// Read-only view of the external CAB approval system.
pub trait ApprovalSource {
    /// Looks up an approval record by reference.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError`] when the source cannot be read.
    fn lookup(&self, approval_id: &ApprovalId) -> Result<Option<ApprovalRecord>, ApprovalError>;
}

// ============================================================================
// SECTION: Intent Store
// ============================================================================

/// Intent store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("intent store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("intent store corruption: {0}")]
    Corrupt(String),
    /// Store data is invalid.
    #[error("intent store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("intent store error: {0}")]
    Store(String),
}

/// Durable store for deployment intents.
pub trait IntentStore {
    /// Loads an intent by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn load(&self, intent_id: &IntentId) -> Result<Option<DeploymentIntent>, StoreError>;

    /// Saves an intent snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save(&self, intent: &DeploymentIntent) -> Result<(), StoreError>;

    /// Lists all intents in non-terminal states.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list_active(&self) -> Result<Vec<DeploymentIntent>, StoreError>;

    /// Lists intents whose terminal transition happened at or after `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn list_completed_since(&self, cutoff: Timestamp) -> Result<Vec<DeploymentIntent>, StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Idempotency Ledger
// ============================================================================

/// Connector write operation kinds.
///
/// # Invariants
/// - Variants are stable for serialization and key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Publish an assignment.
    Publish,
    /// Issue a remediation action.
    Remediate,
}

impl OperationKind {
    /// Returns the stable operation kind name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Remediate => "remediate",
        }
    }
}

/// Lifecycle phase of a recorded connector operation.
///
/// # Invariants
/// - At most one `InFlight` operation exists per idempotency key.
/// - Records are superseded, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// Issued and awaiting a final outcome.
    InFlight,
    /// Completed with a recorded receipt.
    Completed,
    /// Replaced by a newer operation for the same intent and ring.
    Superseded,
}

/// Recorded connector operation keyed for at-most-one-logical-effect.
///
/// # Invariants
/// - `key` derives deterministically from adapter id, operation kind, and
///   canonicalized parameters; it survives retries and process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorOperation {
    /// Idempotency key.
    pub key: IdempotencyKey,
    /// Correlation identifier (equal to the key for write operations).
    pub correlation_id: CorrelationId,
    /// Adapter the operation targets.
    pub adapter_id: AdapterId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Attempts issued so far.
    pub attempts: u32,
    /// Classification of the last failure, if any.
    pub last_classification: Option<ErrorClassification>,
    /// Lifecycle phase.
    pub phase: OperationPhase,
    /// Recorded receipt once completed.
    pub receipt: Option<PublishReceipt>,
    /// Time the record was created or last updated.
    pub recorded_at: Timestamp,
}

/// Ledger decision for a write the gateway is about to issue.
///
/// # Invariants
/// - Produced atomically by [`IdempotencyLedger::begin`] under
///   check-and-set semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDecision {
    /// No record existed; an in-flight record was created.
    Fresh,
    /// A completed record exists; return its receipt instead of re-issuing.
    AlreadyCompleted(ConnectorOperation),
    /// An operation with this key is currently in flight.
    InFlight(ConnectorOperation),
}

/// Idempotency ledger errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Ledger I/O error.
    #[error("idempotency ledger io error: {0}")]
    Io(String),
    /// Ledger data is corrupted or fails integrity checks.
    #[error("idempotency ledger corruption: {0}")]
    Corrupt(String),
    /// No record exists for the given key where one was required.
    #[error("idempotency ledger missing record: {0}")]
    MissingRecord(IdempotencyKey),
    /// Ledger reported an error.
    #[error("idempotency ledger error: {0}")]
    Ledger(String),
}

/// Durable idempotency ledger with atomic check-and-set semantics.
///
/// The ledger is the shared source of truth for connector write effects;
/// its guarantees must hold across process restarts when backed durably.
pub trait IdempotencyLedger {
    /// Atomically checks the key and records an in-flight operation when no
    /// record exists.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be read or written.
    fn begin(&self, operation: ConnectorOperation) -> Result<LedgerDecision, LedgerError>;

    /// Marks an in-flight operation completed with its receipt.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when no in-flight record exists for the key.
    fn complete(
        &self,
        key: &IdempotencyKey,
        receipt: PublishReceipt,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError>;

    /// Abandons an in-flight operation, recording the failure classification.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when no in-flight record exists for the key.
    fn abandon(
        &self,
        key: &IdempotencyKey,
        classification: Option<ErrorClassification>,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError>;

    /// Marks a completed operation superseded by a newer one.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when no record exists for the key.
    fn supersede(&self, key: &IdempotencyKey, recorded_at: Timestamp) -> Result<(), LedgerError>;

    /// Loads a recorded operation by key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger cannot be read.
    fn get(&self, key: &IdempotencyKey) -> Result<Option<ConnectorOperation>, LedgerError>;
}
