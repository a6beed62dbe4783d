// crates/rollout-gateway/src/gateway.rs
// ============================================================================
// Module: Connector Gateway
// Description: Idempotent, breaker-guarded façade over execution-plane adapters.
// Purpose: Contain transient failures; surface one classified final outcome.
// Dependencies: rollout-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The connector gateway is the only path to execution planes. Every write
//! is keyed in the idempotency ledger before it is issued, so retries and
//! process restarts can never produce a second logical effect: a completed
//! key returns its recorded receipt, an in-flight key rejects the
//! concurrent writer. Calls pass through the target adapter's circuit
//! breaker and, for transient failures only, an exponential-backoff retry
//! loop. Callers see a single final outcome carrying the adapter's error
//! classification; retries are invisible to them.
//!
//! Long-running operations check a cooperative [`CancellationToken`]
//! between attempts so rollback or breaker opening can stop them mid-flight.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use rollout_core::AdapterError;
use rollout_core::AdapterId;
use rollout_core::AuditEvent;
use rollout_core::AuditEventType;
use rollout_core::ConnectorOperation;
use rollout_core::CorrelationId;
use rollout_core::DeploymentIntent;
use rollout_core::ErrorClassification;
use rollout_core::EventSink;
use rollout_core::IdempotencyKey;
use rollout_core::IdempotencyLedger;
use rollout_core::IntentId;
use rollout_core::LedgerDecision;
use rollout_core::LedgerError;
use rollout_core::OperationKind;
use rollout_core::OperationPhase;
use rollout_core::PublishReceipt;
use rollout_core::ReconcilerGateway;
use rollout_core::RemediationAction;
use rollout_core::Ring;
use rollout_core::StatusSnapshot;
use rollout_core::SystemWallClock;
use rollout_core::WallClock;

use crate::breaker::BreakerConfig;
use crate::breaker::CircuitBreaker;
use crate::breaker::CircuitState;
use crate::breaker::MonotonicClock;
use crate::breaker::SystemMonotonicClock;
use crate::idempotency::KeyError;
use crate::idempotency::derive_key;
use crate::registry::AdapterRegistry;
use crate::registry::RegistryError;
use crate::retry::JitterSource;
use crate::retry::RandomJitter;
use crate::retry::RetryPolicy;
use crate::retry::RetrySleeper;
use crate::retry::ThreadSleeper;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum audit events held for redelivery after a sink failure.
const EVENT_BACKLOG_CAPACITY: usize = 1_024;

/// Actor name recorded on audit events emitted by the gateway.
const ACTOR: &str = "connector_gateway";

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation token checked between call attempts.
///
/// Cloning shares the underlying flag; cancelling any clone cancels all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Shared cancellation flag.
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Configuration and Errors
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Per-adapter circuit breaker configuration.
    pub breaker: BreakerConfig,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Explicit timeout handed to every adapter call.
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Connector gateway errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Transient failures never escape directly; they surface only as
///   [`GatewayError::RetriesExhausted`] after the bounded retry loop.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The intent has not entered any ring.
    #[error("intent {intent_id} has no active ring")]
    NoActiveRing {
        /// Intent without an active ring.
        intent_id: IntentId,
    },
    /// An operation with the same key is currently in flight.
    #[error("operation already in flight for key {key}")]
    OperationInFlight {
        /// Conflicting idempotency key.
        key: IdempotencyKey,
    },
    /// The adapter's circuit is open; the call failed fast.
    #[error("circuit open for adapter {adapter_id}")]
    CircuitOpen {
        /// Adapter whose circuit is open.
        adapter_id: AdapterId,
    },
    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
    /// Transient retries are exhausted.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts issued.
        attempts: u32,
        /// Last transient failure.
        last: AdapterError,
    },
    /// A completed ledger record is missing its receipt.
    #[error("completed operation {key} has no recorded receipt")]
    MissingReceipt {
        /// Key of the corrupt record.
        key: IdempotencyKey,
    },
    /// Non-retryable adapter failure.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// Adapter resolution failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Key derivation failure.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Idempotency ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl GatewayError {
    /// Returns the adapter classification carried by this error, if any.
    #[must_use]
    pub const fn classification(&self) -> Option<ErrorClassification> {
        match self {
            Self::Adapter(error) => Some(error.classification),
            Self::RetriesExhausted { last, .. } => Some(last.classification),
            Self::CircuitOpen { .. } => Some(ErrorClassification::Transient),
            Self::Registry(RegistryError::AdapterDenied { .. }) => {
                Some(ErrorClassification::PolicyViolation)
            }
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Write Requests
// ============================================================================

/// A ledgered write and the payload its kind requires.
///
/// Remediations carry their action in the variant, so a remediate write
/// without an action is unrepresentable.
#[derive(Debug, Clone, Copy)]
enum WriteRequest {
    /// Publish the intent's artifact.
    Publish,
    /// Issue the remediation action.
    Remediate(RemediationAction),
}

impl WriteRequest {
    /// Returns the operation kind recorded in the ledger.
    const fn kind(self) -> OperationKind {
        match self {
            Self::Publish => OperationKind::Publish,
            Self::Remediate(_) => OperationKind::Remediate,
        }
    }

    /// Returns the remediation action, if this write carries one.
    const fn action(self) -> Option<RemediationAction> {
        match self {
            Self::Publish => None,
            Self::Remediate(action) => Some(action),
        }
    }
}

// ============================================================================
// SECTION: Connector Gateway
// ============================================================================

/// Idempotent, failure-classifying gateway over execution-plane adapters.
///
/// # Invariants
/// - At most one logical effect per idempotency key, across retries and
///   process restarts when backed by a durable ledger.
/// - The per-adapter breaker and the ledger are the only cross-operation
///   shared mutable state.
pub struct ConnectorGateway {
    /// Adapter registry with access policy.
    registry: AdapterRegistry,
    /// Durable idempotency ledger.
    ledger: Arc<dyn IdempotencyLedger + Send + Sync>,
    /// Audit event sink.
    events: Arc<dyn EventSink + Send + Sync>,
    /// Wall-clock source for ledger timestamps.
    wall_clock: Arc<dyn WallClock + Send + Sync>,
    /// Monotonic clock for breaker recovery timeouts.
    monotonic: Arc<dyn MonotonicClock + Send + Sync>,
    /// Jitter source for retry delays.
    jitter: Arc<dyn JitterSource + Send + Sync>,
    /// Sleep seam between retry attempts.
    sleeper: Arc<dyn RetrySleeper + Send + Sync>,
    /// Gateway configuration.
    config: GatewayConfig,
    /// Per-adapter circuit breakers, created lazily.
    breakers: Mutex<BTreeMap<AdapterId, Arc<CircuitBreaker>>>,
    /// Audit events awaiting redelivery after sink failures.
    event_backlog: Mutex<VecDeque<AuditEvent>>,
}

impl ConnectorGateway {
    /// Creates a gateway with system clock, jitter, and sleep seams.
    #[must_use]
    pub fn new(
        registry: AdapterRegistry,
        ledger: Arc<dyn IdempotencyLedger + Send + Sync>,
        events: Arc<dyn EventSink + Send + Sync>,
        config: GatewayConfig,
    ) -> Self {
        Self::with_seams(
            registry,
            ledger,
            events,
            config,
            Arc::new(SystemWallClock),
            Arc::new(SystemMonotonicClock::new()),
            Arc::new(RandomJitter),
            Arc::new(ThreadSleeper),
        )
    }

    /// Creates a gateway with explicit clock, jitter, and sleep seams.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "explicit seams for deterministic tests")]
    pub fn with_seams(
        registry: AdapterRegistry,
        ledger: Arc<dyn IdempotencyLedger + Send + Sync>,
        events: Arc<dyn EventSink + Send + Sync>,
        config: GatewayConfig,
        wall_clock: Arc<dyn WallClock + Send + Sync>,
        monotonic: Arc<dyn MonotonicClock + Send + Sync>,
        jitter: Arc<dyn JitterSource + Send + Sync>,
        sleeper: Arc<dyn RetrySleeper + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            ledger,
            events,
            wall_clock,
            monotonic,
            jitter,
            sleeper,
            config,
            breakers: Mutex::new(BTreeMap::new()),
            event_backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Publishes the intent's artifact into its execution plane.
    ///
    /// Re-issuing the same publish for the same (intent, ring) returns the
    /// recorded receipt instead of creating a second provider object.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with the final classified outcome; transient
    /// failures are retried internally first.
    pub fn publish(
        &self,
        intent: &DeploymentIntent,
        token: &CancellationToken,
    ) -> Result<PublishReceipt, GatewayError> {
        self.execute_write(intent, WriteRequest::Publish, token)
    }

    /// Issues a remediation action against the intent's assignment.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with the final classified outcome.
    pub fn remediate(
        &self,
        intent: &DeploymentIntent,
        action: RemediationAction,
        token: &CancellationToken,
    ) -> Result<PublishReceipt, GatewayError> {
        self.execute_write(intent, WriteRequest::Remediate(action), token)
    }

    /// Queries the execution plane for the intent's actual state.
    ///
    /// Reads are not ledgered; the returned snapshot carries the publish
    /// correlation id for the (intent, ring) pair so drift events tie back
    /// to the write they audit.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with the final classified outcome.
    pub fn query_status(
        &self,
        intent: &DeploymentIntent,
    ) -> Result<StatusSnapshot, GatewayError> {
        let ring = self.active_ring(intent)?;
        let adapter = self.registry.resolve(&intent.adapter_id)?;
        let params = write_params(intent, ring, None);
        let key = derive_key(&intent.adapter_id, OperationKind::Publish, &params)?;
        let correlation_id = CorrelationId::new(key.as_str());
        let breaker = self.breaker_for(&intent.adapter_id);

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            if !breaker.allow_call(self.monotonic.as_ref()) {
                return Err(GatewayError::CircuitOpen {
                    adapter_id: intent.adapter_id.clone(),
                });
            }
            self.pace(attempt);
            match adapter.query_status(&correlation_id, self.config.call_timeout) {
                Ok(report) => {
                    breaker.record_success();
                    return Ok(StatusSnapshot {
                        correlation_id,
                        report,
                    });
                }
                Err(error) => {
                    breaker.record_failure(self.monotonic.as_ref());
                    if error.classification == ErrorClassification::Transient
                        && attempt < self.config.retry.max_attempts
                    {
                        continue;
                    }
                    if error.classification == ErrorClassification::Transient {
                        return Err(GatewayError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    return Err(GatewayError::Adapter(error));
                }
            }
        }
    }

    /// Marks the recorded publish for the intent's ring as superseded.
    ///
    /// A new operation for the same (intent, ring) pair can then be keyed
    /// fresh; the old record stays in the ledger for audit.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when no record exists for the derived key.
    pub fn supersede_publish(&self, intent: &DeploymentIntent) -> Result<(), GatewayError> {
        let ring = self.active_ring(intent)?;
        let params = write_params(intent, ring, None);
        let key = derive_key(&intent.adapter_id, OperationKind::Publish, &params)?;
        self.ledger.supersede(&key, self.wall_clock.now())?;
        Ok(())
    }

    /// Returns the circuit state observed for the adapter, if one exists.
    #[must_use]
    pub fn breaker_state(&self, adapter_id: &AdapterId) -> Option<CircuitState> {
        let guard = self.breakers.lock().ok()?;
        guard.get(adapter_id).map(|breaker| breaker.state())
    }

    /// Redelivers audit events queued after sink failures.
    pub fn flush_events(&self) {
        let Ok(mut backlog) = self.event_backlog.lock() else {
            return;
        };
        let mut remaining = VecDeque::new();
        while let Some(event) = backlog.pop_front() {
            if self.events.record(&event).is_err() {
                remaining.push_back(event);
            }
        }
        *backlog = remaining;
    }

    /// Executes one ledgered write with breaker and retry handling.
    fn execute_write(
        &self,
        intent: &DeploymentIntent,
        request: WriteRequest,
        token: &CancellationToken,
    ) -> Result<PublishReceipt, GatewayError> {
        let ring = self.active_ring(intent)?;
        let adapter = self.registry.resolve(&intent.adapter_id)?;
        let kind = request.kind();
        let params = write_params(intent, ring, request.action());
        let key = derive_key(&intent.adapter_id, kind, &params)?;
        let correlation_id = CorrelationId::new(key.as_str());

        let operation = ConnectorOperation {
            key: key.clone(),
            correlation_id: correlation_id.clone(),
            adapter_id: intent.adapter_id.clone(),
            kind,
            attempts: 0,
            last_classification: None,
            phase: OperationPhase::InFlight,
            receipt: None,
            recorded_at: self.wall_clock.now(),
        };
        match self.ledger.begin(operation)? {
            LedgerDecision::AlreadyCompleted(prior) => {
                self.emit(&correlation_id, "deduplicated", kind, 0, None);
                return prior.receipt.ok_or(GatewayError::MissingReceipt { key });
            }
            LedgerDecision::InFlight(_) => {
                return Err(GatewayError::OperationInFlight { key });
            }
            LedgerDecision::Fresh => {}
        }

        let breaker = self.breaker_for(&intent.adapter_id);
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            if token.is_cancelled() {
                self.settle_failure(&key, None, attempt.saturating_sub(1))?;
                self.emit(&correlation_id, "cancelled", kind, attempt, None);
                return Err(GatewayError::Cancelled);
            }
            if !breaker.allow_call(self.monotonic.as_ref()) {
                self.settle_failure(&key, Some(ErrorClassification::Transient), attempt)?;
                self.emit(&correlation_id, "circuit_open", kind, attempt, None);
                return Err(GatewayError::CircuitOpen {
                    adapter_id: intent.adapter_id.clone(),
                });
            }
            self.pace(attempt);

            let outcome = match request {
                WriteRequest::Publish => adapter.publish(
                    &correlation_id,
                    &intent.artifact,
                    &intent.target_scope,
                    self.config.call_timeout,
                ),
                WriteRequest::Remediate(action) => {
                    adapter.remediate(&correlation_id, action, self.config.call_timeout)
                }
            };
            match outcome {
                Ok(receipt) => {
                    breaker.record_success();
                    self.ledger.complete(&key, receipt.clone(), attempt, self.wall_clock.now())?;
                    self.emit(&correlation_id, "completed", kind, attempt, None);
                    return Ok(receipt);
                }
                Err(error) => {
                    breaker.record_failure(self.monotonic.as_ref());
                    if error.classification == ErrorClassification::Transient
                        && attempt < self.config.retry.max_attempts
                    {
                        continue;
                    }
                    self.settle_failure(&key, Some(error.classification), attempt)?;
                    self.emit(
                        &correlation_id,
                        "failed",
                        kind,
                        attempt,
                        Some(error.classification),
                    );
                    if error.classification == ErrorClassification::Transient {
                        return Err(GatewayError::RetriesExhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    return Err(GatewayError::Adapter(error));
                }
            }
        }
    }

    /// Returns the intent's active ring or rejects the call.
    fn active_ring(&self, intent: &DeploymentIntent) -> Result<Ring, GatewayError> {
        intent.current_ring.ok_or_else(|| GatewayError::NoActiveRing {
            intent_id: intent.intent_id.clone(),
        })
    }

    /// Returns the adapter's breaker, creating it on first use.
    fn breaker_for(&self, adapter_id: &AdapterId) -> Arc<CircuitBreaker> {
        let Ok(mut guard) = self.breakers.lock() else {
            // A poisoned breaker map fails closed with a fresh open-ready breaker.
            return Arc::new(CircuitBreaker::new(self.config.breaker));
        };
        guard
            .entry(adapter_id.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker)))
            .clone()
    }

    /// Sleeps the backoff plus jitter before a retry attempt.
    fn pace(&self, attempt: u32) {
        let backoff = self.config.retry.backoff(attempt);
        if backoff.is_zero() {
            return;
        }
        let jitter = self.jitter.jitter(self.config.retry.max_jitter);
        self.sleeper.sleep(backoff.saturating_add(jitter));
    }

    /// Abandons the in-flight ledger record after a final failure.
    fn settle_failure(
        &self,
        key: &IdempotencyKey,
        classification: Option<ErrorClassification>,
        attempts: u32,
    ) -> Result<(), GatewayError> {
        self.ledger.abandon(key, classification, attempts, self.wall_clock.now())?;
        Ok(())
    }

    /// Emits a connector-operation audit event, queueing on sink failure.
    fn emit(
        &self,
        correlation_id: &CorrelationId,
        outcome: &str,
        kind: OperationKind,
        attempts: u32,
        classification: Option<ErrorClassification>,
    ) {
        let event = AuditEvent {
            correlation_id: Some(correlation_id.clone()),
            event_type: AuditEventType::ConnectorOperation,
            timestamp: self.wall_clock.now(),
            actor: ACTOR.to_string(),
            outcome: outcome.to_string(),
            details: json!({
                "operation": kind.name(),
                "attempts": attempts,
                "classification": classification.map(ErrorClassification::name),
            }),
        };
        if self.events.record(&event).is_err()
            && let Ok(mut backlog) = self.event_backlog.lock()
        {
            if backlog.len() >= EVENT_BACKLOG_CAPACITY {
                backlog.pop_front();
            }
            backlog.push_back(event);
        }
    }
}

impl ReconcilerGateway for ConnectorGateway {
    fn query_status(&self, intent: &DeploymentIntent) -> Result<StatusSnapshot, AdapterError> {
        Self::query_status(self, intent).map_err(to_adapter_error)
    }

    fn remediate(
        &self,
        intent: &DeploymentIntent,
        action: RemediationAction,
    ) -> Result<PublishReceipt, AdapterError> {
        let token = CancellationToken::new();
        Self::remediate(self, intent, action, &token).map_err(to_adapter_error)
    }
}

// ============================================================================
// SECTION: Write Parameters
// ============================================================================

/// Builds the canonical parameter set for a write's idempotency key.
///
/// The set is deterministic per (intent, ring): identical logical writes
/// canonicalize identically, and a new revision or ring produces a new key.
fn write_params(
    intent: &DeploymentIntent,
    ring: Ring,
    action: Option<RemediationAction>,
) -> serde_json::Value {
    json!({
        "intent_id": intent.intent_id.as_str(),
        "revision": intent.revision.get(),
        "ring": ring.name(),
        "artifact_id": intent.artifact.artifact_id.as_str(),
        "version": intent.artifact.version,
        "org_unit": intent.target_scope.org_unit,
        "action": action.map(RemediationAction::name),
    })
}

/// Collapses a gateway outcome into a classified adapter error.
fn to_adapter_error(error: GatewayError) -> AdapterError {
    let classification = error.classification().unwrap_or(ErrorClassification::Permanent);
    AdapterError {
        classification,
        message: error.to_string(),
    }
}
