// crates/rollout-core/src/runtime/machine.rs
// ============================================================================
// Module: Ring State Machine
// Description: Intent lifecycle transitions across the five deployment rings.
// Purpose: Own every intent mutation and reject unmodeled transitions.
// Dependencies: crate::core, crate::interfaces, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The ring state machine is the only writer of deployment intents. Every
//! lifecycle change goes through a modeled transition that is checked
//! against an exhaustive transition table, persisted, and emitted to the
//! audit sink. Policy violations (scope, approval, concurrency) block the
//! transition and surface the specific violated rule; they are never
//! retryable errors.
//!
//! CAB asymmetry: lab and canary entry is deliberately CAB-exempt even for
//! CAB-required intents so early rings produce signal while the decision is
//! pending. Pilot entry and beyond requires a recorded, unexpired approval;
//! an intent that reaches that boundary without one freezes in
//! `AwaitingCabDecision` and keeps holding the per-application lock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::json;
use thiserror::Error;

use crate::core::gates::ApprovalGateInput;
use crate::core::gates::GateEvaluationResult;
use crate::core::gates::evaluate_promotion;
use crate::core::identifiers::ApplicationId;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::IntentId;
use crate::core::identifiers::RevisionNumber;
use crate::core::intent::DeploymentIntent;
use crate::core::intent::IntentStatus;
use crate::core::intent::NewIntent;
use crate::core::intent::RingTelemetry;
use crate::core::intent::ScopeBoundary;
use crate::core::rings::Ring;
use crate::core::rings::RingCalibration;
use crate::core::risk::ArtifactRiskProfile;
use crate::core::risk::AssessmentError;
use crate::core::risk::RiskAssessment;
use crate::core::risk::RiskClassification;
use crate::core::risk::RiskModelSet;
use crate::core::risk::assess;
use crate::core::time::Timestamp;
use crate::interfaces::ApprovalError;
use crate::interfaces::ApprovalRecord;
use crate::interfaces::ApprovalSource;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditEventType;
use crate::interfaces::EventSink;
use crate::interfaces::IntentStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum audit events held for redelivery after a sink failure.
const EVENT_BACKLOG_CAPACITY: usize = 1_024;

/// Actor name recorded on audit events emitted by the machine.
const ACTOR: &str = "ring_state_machine";

// ============================================================================
// SECTION: Transition Errors
// ============================================================================

/// Ring state machine errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Policy violations name the specific violated rule and are never
///   retryable.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// No intent exists for the identifier.
    #[error("intent not found: {intent_id}")]
    NotFound {
        /// Requested intent identifier.
        intent_id: IntentId,
    },
    /// The requested transition is not modeled.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Source status kind.
        from: &'static str,
        /// Target status kind.
        to: &'static str,
    },
    /// Target scope exceeds a publisher or application boundary.
    #[error("policy violation: target scope for org unit {org_unit} exceeds {boundary} boundary")]
    ScopeViolation {
        /// Which boundary was exceeded (`publisher` or `application`).
        boundary: &'static str,
        /// Org unit the intent targets.
        org_unit: String,
    },
    /// CAB approval is required before entering the ring.
    #[error("policy violation: ring {ring} entry requires a recorded CAB approval")]
    ApprovalRequired {
        /// Ring whose entry is blocked.
        ring: Ring,
    },
    /// The referenced approval is missing, denied, or expired.
    #[error("policy violation: approval {approval_id} is missing, denied, or expired")]
    ApprovalInvalid {
        /// Approval reference that failed validation.
        approval_id: ApprovalId,
    },
    /// Another non-terminal intent already exists for the application.
    #[error("policy violation: application {application_id} already has an active intent")]
    ConcurrentIntent {
        /// Application with the conflicting intent.
        application_id: ApplicationId,
    },
    /// The requested ring is outside the intent's target scope.
    #[error("policy violation: ring {ring} is outside the intent's target scope")]
    RingOutOfScope {
        /// Out-of-scope ring.
        ring: Ring,
    },
    /// Ring entry is gated by the per-ring schedule.
    #[error("ring {ring} entry scheduled no earlier than unix millis {not_before_millis}")]
    ScheduleNotReached {
        /// Scheduled ring.
        ring: Ring,
        /// Earliest allowed entry in unix epoch milliseconds.
        not_before_millis: i64,
    },
    /// The intent has no risk assessment where one is required.
    #[error("intent {intent_id} has no recorded risk assessment")]
    MissingAssessment {
        /// Intent missing its assessment.
        intent_id: IntentId,
    },
    /// The intent was admitted under a different calibration version.
    #[error("calibration mismatch: intent admitted under {intent_version}, engine runs {engine_version}")]
    CalibrationMismatch {
        /// Calibration version recorded on the intent.
        intent_version: String,
        /// Calibration version the engine runs.
        engine_version: String,
    },
    /// Telemetry describes a different ring than the one in progress.
    #[error("telemetry ring {actual} does not match in-progress ring {expected}")]
    RingMismatch {
        /// Ring currently in progress.
        expected: Ring,
        /// Ring the telemetry describes.
        actual: Ring,
    },
    /// Promotion gates blocked the ring completion.
    #[error("promotion blocked for ring {ring}: {detail}")]
    GateBlocked {
        /// Ring whose completion was blocked.
        ring: Ring,
        /// Failing gates with threshold and actual values.
        detail: String,
    },
    /// Risk assessment failed.
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    /// Intent store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Approval source failure.
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl TransitionError {
    /// Returns true for policy violations requiring external correction.
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::ScopeViolation { .. }
                | Self::ApprovalRequired { .. }
                | Self::ApprovalInvalid { .. }
                | Self::ConcurrentIntent { .. }
                | Self::RingOutOfScope { .. }
        )
    }
}

// ============================================================================
// SECTION: Transition Table
// ============================================================================

/// Returns true when the transition between the two statuses is modeled.
///
/// This is the single choke point for lifecycle changes; everything the
/// machine persists passes through it.
fn transition_allowed(from: &IntentStatus, to: &IntentStatus) -> bool {
    match (from, to) {
        (IntentStatus::Pending, IntentStatus::RiskAssessed)
        | (IntentStatus::RiskAssessed, IntentStatus::ScopeValidated)
        | (
            IntentStatus::ScopeValidated,
            IntentStatus::CabApproved | IntentStatus::CabNotRequired,
        )
        | (IntentStatus::AwaitingCabDecision { .. }, IntentStatus::CabApproved) => true,
        (
            IntentStatus::CabApproved | IntentStatus::CabNotRequired,
            IntentStatus::RingInProgress { .. },
        ) => true,
        (
            IntentStatus::RingComplete { ring: done },
            IntentStatus::RingInProgress { ring: next },
        ) => done.next() == Some(*next),
        (
            IntentStatus::RingComplete { .. },
            IntentStatus::AwaitingCabDecision { .. },
        ) => true,
        (
            IntentStatus::RingInProgress { ring: active },
            IntentStatus::RingComplete { ring: done },
        ) => active == done,
        (IntentStatus::RingComplete { .. }, IntentStatus::Completed) => true,
        (
            IntentStatus::RingInProgress { .. }
            | IntentStatus::RingComplete { .. }
            | IntentStatus::AwaitingCabDecision { .. },
            IntentStatus::RolledBack { .. },
        ) => true,
        (from_status, IntentStatus::Failed { .. }) => !from_status.is_terminal(),
        _ => false,
    }
}

// ============================================================================
// SECTION: Ring State Machine
// ============================================================================

/// State machine owning every deployment intent mutation.
///
/// # Invariants
/// - Intents change state only through modeled transitions.
/// - Every persisted transition emits an audit event; sink failures queue
///   the event for redelivery and never block the transition.
pub struct RingStateMachine {
    /// Durable intent store.
    store: Arc<dyn IntentStore + Send + Sync>,
    /// Audit event sink.
    events: Arc<dyn EventSink + Send + Sync>,
    /// External CAB approval source.
    approvals: Arc<dyn ApprovalSource + Send + Sync>,
    /// Coexisting risk model versions.
    models: RiskModelSet,
    /// Ring threshold calibration the engine runs.
    calibration: RingCalibration,
    /// Audit events awaiting redelivery after sink failures.
    event_backlog: Mutex<VecDeque<AuditEvent>>,
}

impl RingStateMachine {
    /// Creates a state machine over the injected seams.
    #[must_use]
    pub fn new(
        store: Arc<dyn IntentStore + Send + Sync>,
        events: Arc<dyn EventSink + Send + Sync>,
        approvals: Arc<dyn ApprovalSource + Send + Sync>,
        models: RiskModelSet,
        calibration: RingCalibration,
    ) -> Self {
        Self {
            store,
            events,
            approvals,
            models,
            calibration,
            event_backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates an intent in `Pending`, enforcing the one-active-intent rule.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::ConcurrentIntent`] when another
    /// non-terminal intent exists for the application and no approved
    /// override accompanies the request.
    pub fn create_intent(
        &self,
        new_intent: NewIntent,
        now: Timestamp,
    ) -> Result<DeploymentIntent, TransitionError> {
        let active = self.store.list_active()?;
        let conflicting = active
            .iter()
            .any(|existing| existing.application_id == new_intent.application_id);
        if conflicting {
            if !new_intent.concurrency_override {
                return Err(TransitionError::ConcurrentIntent {
                    application_id: new_intent.application_id,
                });
            }
            let Some(approval_id) = new_intent.override_approval.as_ref() else {
                return Err(TransitionError::ConcurrentIntent {
                    application_id: new_intent.application_id,
                });
            };
            self.require_valid_approval(approval_id, now)?;
        }

        let intent = DeploymentIntent {
            intent_id: new_intent.intent_id,
            application_id: new_intent.application_id,
            adapter_id: new_intent.adapter_id,
            revision: RevisionNumber::first(),
            artifact: new_intent.artifact,
            target_scope: new_intent.target_scope,
            schedule: new_intent.schedule,
            calibration_version: self.calibration.version.clone(),
            rollback_plan: new_intent.rollback_plan,
            risk: None,
            approval: new_intent.override_approval,
            current_ring: None,
            status: IntentStatus::Pending,
            concurrency_override: new_intent.concurrency_override,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&intent)?;
        self.emit(
            AuditEventType::IntentTransition,
            None,
            now,
            "created",
            json!({
                "intent_id": intent.intent_id.as_str(),
                "application_id": intent.application_id.as_str(),
                "status": intent.status.kind_name(),
            }),
        );
        Ok(intent)
    }

    /// Records the risk assessment for the intent revision.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the intent is not `Pending`, the
    /// profile is missing required inputs, or persistence fails.
    pub fn assess_risk(
        &self,
        intent_id: &IntentId,
        profile: &ArtifactRiskProfile,
        now: Timestamp,
    ) -> Result<RiskAssessment, TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        let model = self.models.model(self.models.active_version())?;
        let assessment = assess(profile, &intent.target_scope, model)?;
        let outcome = json!({
            "score": assessment.score.centi_points(),
            "classification": match assessment.classification {
                RiskClassification::AutomatedAllowed => "automated_allowed",
                RiskClassification::CabRequired => "cab_required",
            },
            "model_version": assessment.model_version.as_str(),
        });
        intent.risk = Some(assessment.clone());
        self.apply_transition(&mut intent, IntentStatus::RiskAssessed, now, outcome)?;
        Ok(assessment)
    }

    /// Validates the target scope against publisher and application boundaries.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::ScopeViolation`] naming the exceeded
    /// boundary; the intent stays in `RiskAssessed`.
    pub fn validate_scope(
        &self,
        intent_id: &IntentId,
        publisher_scope: &ScopeBoundary,
        application_scope: &ScopeBoundary,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        if !matches!(intent.status, IntentStatus::RiskAssessed) {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: "scope_validated",
            });
        }
        if !publisher_scope.contains(&intent.target_scope) {
            return Err(TransitionError::ScopeViolation {
                boundary: "publisher",
                org_unit: intent.target_scope.org_unit.clone(),
            });
        }
        if !application_scope.contains(&intent.target_scope) {
            return Err(TransitionError::ScopeViolation {
                boundary: "application",
                org_unit: intent.target_scope.org_unit.clone(),
            });
        }
        let detail = json!({ "org_unit": intent.target_scope.org_unit.clone() });
        self.apply_transition(&mut intent, IntentStatus::ScopeValidated, now, detail)?;
        Ok(())
    }

    /// Routes the intent past the approval checkpoint.
    ///
    /// Automated-allowed intents move to `CabNotRequired`. CAB-required
    /// intents move to `CabApproved` when a valid approval is already
    /// recorded, and otherwise to `CabNotRequired` as well: lab and canary
    /// entry is CAB-exempt, and the pilot boundary re-checks the
    /// classification directly.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the intent is not `ScopeValidated`
    /// or has no assessment.
    pub fn route_approval(
        &self,
        intent_id: &IntentId,
        now: Timestamp,
    ) -> Result<IntentStatus, TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        if !matches!(intent.status, IntentStatus::ScopeValidated) {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: "cab_routed",
            });
        }
        let assessment = intent.risk.clone().ok_or_else(|| TransitionError::MissingAssessment {
            intent_id: intent.intent_id.clone(),
        })?;
        let target = match assessment.classification {
            RiskClassification::AutomatedAllowed => IntentStatus::CabNotRequired,
            RiskClassification::CabRequired => {
                let recorded = match intent.approval.as_ref() {
                    Some(approval_id) => self.valid_approval(approval_id, now)?.is_some(),
                    None => false,
                };
                if recorded {
                    IntentStatus::CabApproved
                } else {
                    IntentStatus::CabNotRequired
                }
            }
        };
        let detail = json!({ "routed_to": target.kind_name() });
        self.apply_transition(&mut intent, target, now, detail)?;
        Ok(intent.status)
    }

    /// Enters the next ring in promotion order.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::ApprovalRequired`] (and freezes the intent
    /// in `AwaitingCabDecision`) when a CAB-required intent reaches the
    /// pilot boundary without a valid approval; other variants for scope,
    /// schedule, and unmodeled-transition failures.
    pub fn begin_ring(
        &self,
        intent_id: &IntentId,
        now: Timestamp,
    ) -> Result<Ring, TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        let target = match &intent.status {
            IntentStatus::CabApproved | IntentStatus::CabNotRequired => {
                match intent.current_ring {
                    None => Ring::Lab,
                    Some(current) => current.next().ok_or(TransitionError::InvalidTransition {
                        from: intent.status.kind_name(),
                        to: "ring_in_progress",
                    })?,
                }
            }
            IntentStatus::RingComplete { ring } => {
                ring.next().ok_or(TransitionError::InvalidTransition {
                    from: intent.status.kind_name(),
                    to: "ring_in_progress",
                })?
            }
            _ => {
                return Err(TransitionError::InvalidTransition {
                    from: intent.status.kind_name(),
                    to: "ring_in_progress",
                });
            }
        };

        if !intent.target_scope.rings.contains(&target) {
            return Err(TransitionError::RingOutOfScope { ring: target });
        }
        if let Some(entry) =
            intent.schedule.iter().find(|entry| entry.ring == target)
            && let Some(not_before) = entry.not_before
            && now < not_before
        {
            return Err(TransitionError::ScheduleNotReached {
                ring: target,
                not_before_millis: not_before.as_unix_millis(),
            });
        }

        let assessment = intent.risk.clone().ok_or_else(|| TransitionError::MissingAssessment {
            intent_id: intent.intent_id.clone(),
        })?;
        if target.requires_cab_on_entry()
            && assessment.classification == RiskClassification::CabRequired
        {
            let approved = match intent.approval.as_ref() {
                Some(approval_id) => self.valid_approval(approval_id, now)?.is_some(),
                None => false,
            };
            if !approved {
                let detail = json!({ "awaiting_ring": target.name() });
                self.apply_transition(
                    &mut intent,
                    IntentStatus::AwaitingCabDecision { ring: target },
                    now,
                    detail,
                )?;
                return Err(TransitionError::ApprovalRequired { ring: target });
            }
        }

        intent.current_ring = Some(target);
        let detail = json!({ "ring": target.name() });
        self.apply_transition(&mut intent, IntentStatus::RingInProgress { ring: target }, now, detail)?;
        Ok(target)
    }

    /// Records a CAB approval reference and unfreezes a waiting intent.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::ApprovalInvalid`] when the reference is
    /// missing, denied, or expired.
    pub fn record_approval(
        &self,
        intent_id: &IntentId,
        approval_id: ApprovalId,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        self.require_valid_approval(&approval_id, now)?;
        intent.approval = Some(approval_id.clone());
        if matches!(intent.status, IntentStatus::AwaitingCabDecision { .. }) {
            let detail = json!({ "approval_id": approval_id.as_str() });
            self.apply_transition(&mut intent, IntentStatus::CabApproved, now, detail)?;
        } else {
            intent.updated_at = now;
            self.store.save(&intent)?;
        }
        Ok(())
    }

    /// Evaluates the promotion gates for the ring in progress.
    ///
    /// Pure with respect to the intent: only the evaluation event is
    /// emitted; the caller applies the transition via [`Self::complete_ring`].
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when no ring is in progress, the
    /// telemetry describes another ring, or the calibration versions differ.
    pub fn evaluate_gates(
        &self,
        intent_id: &IntentId,
        telemetry: &RingTelemetry,
        now: Timestamp,
    ) -> Result<GateEvaluationResult, TransitionError> {
        let intent = self.load_intent(intent_id)?;
        let IntentStatus::RingInProgress { ring } = intent.status else {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: "gate_evaluation",
            });
        };
        if telemetry.ring != ring {
            return Err(TransitionError::RingMismatch {
                expected: ring,
                actual: telemetry.ring,
            });
        }
        if intent.calibration_version != self.calibration.version {
            return Err(TransitionError::CalibrationMismatch {
                intent_version: intent.calibration_version.clone(),
                engine_version: self.calibration.version.clone(),
            });
        }
        let assessment = intent.risk.as_ref().ok_or_else(|| TransitionError::MissingAssessment {
            intent_id: intent.intent_id.clone(),
        })?;

        let approval_input = match ring.next() {
            Some(next)
                if next.requires_cab_on_entry()
                    && assessment.classification == RiskClassification::CabRequired =>
            {
                let record = match intent.approval.as_ref() {
                    Some(approval_id) => self.valid_approval(approval_id, now)?,
                    None => None,
                };
                ApprovalGateInput::Required { record, now }
            }
            _ => ApprovalGateInput::NotRequired,
        };

        let thresholds = self.calibration.thresholds(ring);
        let result = evaluate_promotion(
            telemetry,
            thresholds,
            intent.target_scope.connectivity,
            intent.rollback_plan.validated,
            &approval_input,
        );
        self.emit(
            AuditEventType::GateEvaluation,
            None,
            now,
            if result.allow_promotion { "allow" } else { "deny" },
            json!({
                "intent_id": intent.intent_id.as_str(),
                "ring": ring.name(),
                "failing": result
                    .failing_gates()
                    .iter()
                    .map(|gate| gate.name())
                    .collect::<Vec<_>>(),
            }),
        );
        Ok(result)
    }

    /// Completes the ring in progress from a passing gate evaluation.
    ///
    /// The intent moves to `RingComplete`, or straight to `Completed` when
    /// no further ring lies within its target scope.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::GateBlocked`] enumerating the failing
    /// gates when the evaluation denies promotion; the intent holds its ring.
    pub fn complete_ring(
        &self,
        intent_id: &IntentId,
        evaluation: &GateEvaluationResult,
        now: Timestamp,
    ) -> Result<IntentStatus, TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        let IntentStatus::RingInProgress { ring } = intent.status else {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: "ring_complete",
            });
        };
        if evaluation.ring != ring {
            return Err(TransitionError::RingMismatch {
                expected: ring,
                actual: evaluation.ring,
            });
        }
        if !evaluation.allow_promotion {
            return Err(TransitionError::GateBlocked {
                ring,
                detail: blocked_detail(evaluation),
            });
        }

        let detail = json!({ "ring": ring.name() });
        self.apply_transition(&mut intent, IntentStatus::RingComplete { ring }, now, detail)?;

        let further = ring
            .next()
            .is_some_and(|next_ring| intent.target_scope.rings.contains(&next_ring));
        if !further {
            let completion_detail = json!({ "final_ring": ring.name() });
            self.apply_transition(&mut intent, IntentStatus::Completed, now, completion_detail)?;
        }
        Ok(intent.status)
    }

    /// Rolls the intent back from its current ring.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidTransition`] when the intent has
    /// not entered any ring or is already terminal.
    pub fn roll_back(
        &self,
        intent_id: &IntentId,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        let Some(from) = intent.current_ring else {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: "rolled_back",
            });
        };
        let reason = reason.into();
        let detail = json!({ "from": from.name(), "reason": reason });
        self.apply_transition(
            &mut intent,
            IntentStatus::RolledBack { from, reason },
            now,
            detail,
        )?;
        Ok(())
    }

    /// Fails the intent terminally.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidTransition`] when the intent is
    /// already terminal.
    pub fn fail(
        &self,
        intent_id: &IntentId,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        let mut intent = self.load_intent(intent_id)?;
        let reason = reason.into();
        let detail = json!({ "reason": reason });
        self.apply_transition(&mut intent, IntentStatus::Failed { reason }, now, detail)?;
        Ok(())
    }

    /// Redelivers audit events queued after sink failures.
    ///
    /// Events that fail again stay queued for the next flush.
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

    /// Loads an intent or reports it missing.
    fn load_intent(&self, intent_id: &IntentId) -> Result<DeploymentIntent, TransitionError> {
        self.store.load(intent_id)?.ok_or_else(|| TransitionError::NotFound {
            intent_id: intent_id.clone(),
        })
    }

    /// Applies one modeled transition: table check, persist, emit.
    fn apply_transition(
        &self,
        intent: &mut DeploymentIntent,
        to: IntentStatus,
        now: Timestamp,
        details: serde_json::Value,
    ) -> Result<(), TransitionError> {
        if !transition_allowed(&intent.status, &to) {
            return Err(TransitionError::InvalidTransition {
                from: intent.status.kind_name(),
                to: to.kind_name(),
            });
        }
        let from_kind = intent.status.kind_name();
        intent.status = to;
        intent.updated_at = now;
        self.store.save(intent)?;
        self.emit(
            AuditEventType::IntentTransition,
            None,
            now,
            intent.status.kind_name(),
            json!({
                "intent_id": intent.intent_id.as_str(),
                "from": from_kind,
                "to": intent.status.kind_name(),
                "details": details,
            }),
        );
        Ok(())
    }

    /// Looks up an approval and returns it only when approved and unexpired.
    fn valid_approval(
        &self,
        approval_id: &ApprovalId,
        now: Timestamp,
    ) -> Result<Option<ApprovalRecord>, TransitionError> {
        let record = self.approvals.lookup(approval_id)?;
        Ok(record.filter(|approval| approval.approved && approval.expires_at > now))
    }

    /// Requires a valid approval or reports it invalid.
    fn require_valid_approval(
        &self,
        approval_id: &ApprovalId,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        if self.valid_approval(approval_id, now)?.is_none() {
            return Err(TransitionError::ApprovalInvalid {
                approval_id: approval_id.clone(),
            });
        }
        Ok(())
    }

    /// Emits an audit event, queueing it for redelivery on sink failure.
    fn emit(
        &self,
        event_type: AuditEventType,
        correlation_id: Option<crate::core::identifiers::CorrelationId>,
        timestamp: Timestamp,
        outcome: &str,
        details: serde_json::Value,
    ) {
        let event = AuditEvent {
            correlation_id,
            event_type,
            timestamp,
            actor: ACTOR.to_string(),
            outcome: outcome.to_string(),
            details,
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

// ============================================================================
// SECTION: Diagnostics
// ============================================================================

/// Renders the failing gates of an evaluation with threshold vs actual.
fn blocked_detail(evaluation: &GateEvaluationResult) -> String {
    let parts: Vec<String> = evaluation
        .checks
        .iter()
        .filter(|check| !check.passed)
        .map(|check| {
            format!("{} (threshold {}, actual {})", check.gate, check.threshold, check.actual)
        })
        .collect();
    parts.join("; ")
}
