// crates/rollout-core/src/runtime/reconciler.rs
// ============================================================================
// Module: Reconciliation Loop
// Description: Scheduled drift detection and bounded auto-remediation.
// Purpose: Diff declared intents against reported reality, independently of promotion.
// Dependencies: crate::core, crate::interfaces, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The reconciler runs on a fixed interval, independent of ring promotion,
//! and diffs every active or recently-completed intent against the state the
//! execution plane reports. Each mismatch is classified, recorded as an
//! append-only drift event, and fed through the remediation policy:
//! low-risk drift in non-production rings may auto-remediate with bounded
//! exponential backoff; scope mismatches, production rings, and CAB-required
//! applications are report-only. Exhausted attempts mark the drift
//! persistent for manual or CAB review instead of retrying forever.
//!
//! The loop is a cancellable scheduled task with an explicit start/stop
//! lifecycle; [`Reconciler::run_once`] drives a single iteration so tests
//! can reconcile deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::core::drift::DriftEvent;
use crate::core::drift::DriftType;
use crate::core::drift::RemediationOutcome;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::IntentId;
use crate::core::identifiers::RevisionNumber;
use crate::core::intent::DeploymentIntent;
use crate::core::intent::IntentStatus;
use crate::core::rings::Ring;
use crate::core::rings::RingCalibration;
use crate::core::risk::RiskClassification;
use crate::core::time::Timestamp;
use crate::core::time::WallClock;
use crate::interfaces::AdapterError;
use crate::interfaces::AdapterStatusReport;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditEventType;
use crate::interfaces::EventSink;
use crate::interfaces::IntentStore;
use crate::interfaces::PublishReceipt;
use crate::interfaces::RemediationAction;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Actor name recorded on audit events emitted by the reconciler.
const ACTOR: &str = "reconciliation_loop";

// ============================================================================
// SECTION: Gateway Seam
// ============================================================================

/// Actual state reported for an intent, tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Correlation identifier of the underlying status query.
    pub correlation_id: CorrelationId,
    /// Execution-plane status report.
    pub report: AdapterStatusReport,
}

/// The reconciler's view of the connector gateway.
///
/// The gateway crate implements this over its idempotent, breaker-guarded
/// call path; tests supply stub implementations.
pub trait ReconcilerGateway {
    /// Queries the execution plane for the intent's actual state.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] with a classification tag when the query
    /// fails after the gateway's own retries.
    fn query_status(&self, intent: &DeploymentIntent) -> Result<StatusSnapshot, AdapterError>;

    /// Issues a remediation action for the intent.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] with a classification tag when the action
    /// fails after the gateway's own retries.
    fn remediate(
        &self,
        intent: &DeploymentIntent,
        action: RemediationAction,
    ) -> Result<PublishReceipt, AdapterError>;
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Reconciliation loop configuration.
///
/// # Invariants
/// - `interval` has a 15-minute floor, enforced at the configuration
///   surface before construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Interval between scheduled iterations.
    pub interval: Duration,
    /// How far back completed intents stay eligible for reconciliation.
    pub completed_window_hours: u32,
    /// Maximum auto-remediation attempts per drift before escalation.
    pub max_attempts: u32,
    /// Backoff after the first attempt; doubles per subsequent attempt.
    pub base_backoff_hours: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3_600),
            completed_window_hours: 168,
            max_attempts: 3,
            base_backoff_hours: 1,
        }
    }
}

// ============================================================================
// SECTION: Drift Classification
// ============================================================================

/// Classifies the mismatch between an intent and a status report.
///
/// Returns `None` when the report matches the declared intent. Checks run
/// in precedence order: a missing assignment subsumes every other category,
/// and a version mismatch is reported before scope or compliance findings.
#[must_use]
pub fn classify_drift(
    intent: &DeploymentIntent,
    report: &AdapterStatusReport,
    hours_in_ring: u32,
    ceiling_hours: u32,
) -> Option<DriftType> {
    if !report.assigned {
        return Some(DriftType::MissingAssignment);
    }
    let version_matches = report
        .installed_version
        .as_deref()
        .is_some_and(|installed| installed == intent.artifact.version);
    if !version_matches {
        return Some(DriftType::VersionMismatch);
    }
    let scope_matches = report
        .scope_org_unit
        .as_deref()
        .is_some_and(|org_unit| org_unit == intent.target_scope.org_unit);
    if !scope_matches {
        return Some(DriftType::ScopeMismatch);
    }
    if report.pending_count > 0 && hours_in_ring > ceiling_hours {
        return Some(DriftType::ComplianceDrift);
    }
    None
}

// ============================================================================
// SECTION: Reports and Errors
// ============================================================================

/// Summary of one reconciliation iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Intents examined this iteration.
    pub scanned: usize,
    /// Status queries that failed and were skipped.
    pub query_failures: usize,
    /// Remediation actions issued this iteration.
    pub remediations_issued: usize,
    /// Drifts marked persistent this iteration.
    pub persistent: usize,
    /// Drift events emitted this iteration, in scan order.
    pub drift_events: Vec<DriftEvent>,
}

/// Reconciliation loop errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Per-intent gateway failures are absorbed into the iteration report;
///   only store-level failures abort an iteration.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Intent store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Reconciler
// ============================================================================

/// Per-drift auto-remediation attempt state.
///
/// Entries outlive exhaustion: a drift that has spent its attempt budget
/// stays recorded until it resolves or the intent moves to a new revision,
/// so re-detections keep reporting persistent instead of restarting the
/// cycle.
#[derive(Debug, Clone, Copy)]
struct AttemptState {
    /// Intent revision the attempts were issued against.
    revision: RevisionNumber,
    /// Attempts issued so far.
    attempts: u32,
    /// Earliest time of the next attempt.
    next_attempt_at: Timestamp,
}

/// Scheduled drift detection and bounded remediation loop.
///
/// # Invariants
/// - Drift events are append-only; re-detection emits a new event.
/// - Auto-remediation never exceeds the configured attempt bound.
/// - Exhausted drift stays escalated until it resolves or the intent moves
///   to a new revision; it never re-enters the attempt cycle.
pub struct Reconciler {
    /// Durable intent store.
    store: Arc<dyn IntentStore + Send + Sync>,
    /// Connector gateway seam.
    gateway: Arc<dyn ReconcilerGateway + Send + Sync>,
    /// Audit event sink.
    events: Arc<dyn EventSink + Send + Sync>,
    /// Ring threshold calibration, for compliance ceilings.
    calibration: RingCalibration,
    /// Wall-clock source.
    clock: Arc<dyn WallClock + Send + Sync>,
    /// Loop configuration.
    config: ReconcilerConfig,
    /// Auto-remediation attempt state keyed by intent and drift type.
    attempts: Mutex<BTreeMap<(IntentId, DriftType), AttemptState>>,
}

impl Reconciler {
    /// Creates a reconciler over the injected seams.
    #[must_use]
    pub fn new(
        store: Arc<dyn IntentStore + Send + Sync>,
        gateway: Arc<dyn ReconcilerGateway + Send + Sync>,
        events: Arc<dyn EventSink + Send + Sync>,
        calibration: RingCalibration,
        clock: Arc<dyn WallClock + Send + Sync>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
            calibration,
            clock,
            config,
            attempts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Runs one reconciliation iteration.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Store`] when the intent store cannot be
    /// listed; per-intent query failures are counted in the report instead.
    pub fn run_once(&self) -> Result<ReconcileReport, ReconcileError> {
        let now = self.clock.now();
        let cutoff = now.minus_hours(self.config.completed_window_hours);
        let mut report = ReconcileReport::default();

        let mut intents = self.store.list_active()?;
        let completed = self.store.list_completed_since(cutoff)?;
        intents.extend(
            completed.into_iter().filter(|intent| matches!(intent.status, IntentStatus::Completed)),
        );

        for intent in intents {
            let Some(ring) = intent.current_ring else {
                continue;
            };
            if matches!(
                intent.status,
                IntentStatus::Failed { .. } | IntentStatus::RolledBack { .. }
            ) {
                continue;
            }
            report.scanned = report.scanned.saturating_add(1);

            let snapshot = match self.gateway.query_status(&intent) {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    report.query_failures = report.query_failures.saturating_add(1);
                    continue;
                }
            };

            let ceiling = self
                .calibration
                .thresholds(ring)
                .compliance
                .ceiling_hours(intent.target_scope.connectivity);
            let hours_in_ring = now.hours_since(intent.updated_at);
            let Some(drift) = classify_drift(&intent, &snapshot.report, hours_in_ring, ceiling)
            else {
                self.clear_attempts(&intent.intent_id);
                continue;
            };

            let remediation = self.remediate_drift(&intent, ring, drift, now, &mut report);
            let event = DriftEvent {
                intent_id: intent.intent_id.clone(),
                correlation_id: snapshot.correlation_id.clone(),
                ring,
                drift,
                severity: drift.severity(),
                detected_at: now,
                remediation,
            };
            self.emit_drift(&event);
            report.drift_events.push(event);
        }
        Ok(report)
    }

    /// Applies the remediation policy to one detected drift.
    fn remediate_drift(
        &self,
        intent: &DeploymentIntent,
        ring: Ring,
        drift: DriftType,
        now: Timestamp,
        report: &mut ReconcileReport,
    ) -> RemediationOutcome {
        let Some(action) = self.allowed_action(intent, ring, drift) else {
            return RemediationOutcome::ReportOnly;
        };

        let key = (intent.intent_id.clone(), drift);
        let Ok(mut attempts) = self.attempts.lock() else {
            return RemediationOutcome::ReportOnly;
        };
        // Attempt state from a superseded revision does not carry over.
        let state = attempts
            .get(&key)
            .copied()
            .filter(|state| state.revision == intent.revision);

        if let Some(state) = state {
            if state.attempts >= self.config.max_attempts {
                report.persistent = report.persistent.saturating_add(1);
                return RemediationOutcome::Persistent;
            }
            if now < state.next_attempt_at {
                return RemediationOutcome::Scheduled {
                    attempt: state.attempts.saturating_add(1),
                    next_attempt_at: state.next_attempt_at,
                };
            }
        }

        let attempt = state.map_or(1, |existing| existing.attempts.saturating_add(1));
        let backoff = self
            .config
            .base_backoff_hours
            .saturating_mul(1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        attempts.insert(
            key,
            AttemptState {
                revision: intent.revision,
                attempts: attempt,
                next_attempt_at: now.plus_hours(backoff),
            },
        );
        drop(attempts);

        report.remediations_issued = report.remediations_issued.saturating_add(1);
        // Failures surface on the next iteration through re-detection.
        let _ = self.gateway.remediate(intent, action);
        RemediationOutcome::Attempted { attempt }
    }

    /// Returns the auto-remediation action, or `None` for report-only drift.
    ///
    /// Scope mismatches, production rings, and CAB-required applications
    /// are never auto-remediated.
    fn allowed_action(
        &self,
        intent: &DeploymentIntent,
        ring: Ring,
        drift: DriftType,
    ) -> Option<RemediationAction> {
        if ring.is_production() {
            return None;
        }
        let cab_required = intent
            .risk
            .as_ref()
            .is_some_and(|assessment| assessment.classification == RiskClassification::CabRequired);
        if cab_required {
            return None;
        }
        match drift {
            DriftType::MissingAssignment => Some(RemediationAction::Reassign),
            DriftType::VersionMismatch | DriftType::ComplianceDrift => {
                Some(RemediationAction::Reinstall)
            }
            DriftType::ScopeMismatch => None,
        }
    }

    /// Drops attempt state for an intent whose drift has resolved.
    fn clear_attempts(&self, intent_id: &IntentId) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.retain(|(recorded, _), _| recorded != intent_id);
        }
    }

    /// Emits a drift detection audit event, best effort.
    fn emit_drift(&self, event: &DriftEvent) {
        let audit = AuditEvent {
            correlation_id: Some(event.correlation_id.clone()),
            event_type: AuditEventType::DriftDetected,
            timestamp: event.detected_at,
            actor: ACTOR.to_string(),
            outcome: event.drift.name().to_string(),
            details: json!({
                "intent_id": event.intent_id.as_str(),
                "ring": event.ring.name(),
                "severity": event.severity,
                "remediation": event.remediation,
            }),
        };
        // Sink failures never block detection; the event remains in the
        // iteration report for the caller.
        let _ = self.events.record(&audit);
    }

    /// Starts the scheduled loop, returning its stop handle.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.config.interval;
        let join = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // Store failures skip the iteration; the next tick retries.
                        let _ = self.run_once();
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        ReconcilerHandle {
            stop_tx,
            join: Some(join),
        }
    }
}

// ============================================================================
// SECTION: Loop Handle
// ============================================================================

/// Handle over a running reconciliation loop.
///
/// Dropping the handle stops the loop; [`ReconcilerHandle::stop`] stops it
/// and joins the worker thread.
pub struct ReconcilerHandle {
    /// Stop signal sender.
    stop_tx: mpsc::Sender<()>,
    /// Worker thread join handle.
    join: Option<thread::JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Stops the loop and joins the worker thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
