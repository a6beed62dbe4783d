// crates/rollout-core/src/lib.rs
// ============================================================================
// Module: Rollout Control Core
// Description: Data model, risk assessment, ring state machine, and runtime.
// Purpose: Define the deployment-orchestration core and its interface seams.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Rollout Control decides whether, when, and how aggressively a software
//! artifact rolls out across a device fleet managed by external execution
//! planes. This crate holds the pure core: identifiers and records, the
//! deterministic risk assessor, ring calibration, the promotion gate
//! evaluator, the ring state machine, and the reconciliation runtime. All
//! integration with external systems happens through the traits in
//! [`interfaces`]; the core never calls an execution plane directly.

pub mod core;
pub mod interfaces;
pub mod runtime;

pub use core::drift::DriftEvent;
pub use core::drift::DriftSeverity;
pub use core::drift::DriftType;
pub use core::drift::RemediationOutcome;
pub use core::gates::ApprovalGateInput;
pub use core::gates::GateBound;
pub use core::gates::GateCheck;
pub use core::gates::GateEvaluationResult;
pub use core::gates::GateKind;
pub use core::gates::evaluate_promotion;
pub use core::identifiers::AdapterId;
pub use core::identifiers::ApplicationId;
pub use core::identifiers::ApprovalId;
pub use core::identifiers::ArtifactId;
pub use core::identifiers::CorrelationId;
pub use core::identifiers::IdempotencyKey;
pub use core::identifiers::IntentId;
pub use core::identifiers::RevisionNumber;
pub use core::intent::ArtifactReference;
pub use core::intent::DeploymentIntent;
pub use core::intent::IntentStatus;
pub use core::intent::NewIntent;
pub use core::intent::RingSchedule;
pub use core::intent::RingTelemetry;
pub use core::intent::RollbackPlan;
pub use core::intent::ScopeBoundary;
pub use core::intent::TargetScope;
pub use core::rings::ComplianceCeilings;
pub use core::rings::ConnectivityClass;
pub use core::rings::Ring;
pub use core::rings::RingCalibration;
pub use core::rings::RingThresholds;
pub use core::risk::ArtifactRiskProfile;
pub use core::risk::AssessmentError;
pub use core::risk::FactorWeights;
pub use core::risk::InstallContext;
pub use core::risk::RiskAssessment;
pub use core::risk::RiskClassification;
pub use core::risk::RiskFactorBreakdown;
pub use core::risk::RiskFactorKind;
pub use core::risk::RiskModel;
pub use core::risk::RiskModelSet;
pub use core::risk::RiskModelVersion;
pub use core::risk::RiskRubric;
pub use core::risk::RiskScore;
pub use core::risk::RollbackMaturity;
pub use core::risk::SignatureState;
pub use core::risk::assess;
pub use core::time::SystemWallClock;
pub use core::time::Timestamp;
pub use core::time::TimestampParseError;
pub use core::time::WallClock;
pub use interfaces::AdapterError;
pub use interfaces::AdapterStatusReport;
pub use interfaces::ApprovalError;
pub use interfaces::ApprovalRecord;
pub use interfaces::ApprovalSource;
pub use interfaces::AuditEvent;
pub use interfaces::AuditEventType;
pub use interfaces::ConnectorOperation;
pub use interfaces::ErrorClassification;
pub use interfaces::EventSink;
pub use interfaces::EventSinkError;
pub use interfaces::ExecutionAdapter;
pub use interfaces::IdempotencyLedger;
pub use interfaces::IntentStore;
pub use interfaces::LedgerDecision;
pub use interfaces::LedgerError;
pub use interfaces::OperationKind;
pub use interfaces::OperationPhase;
pub use interfaces::PublishReceipt;
pub use interfaces::RemediationAction;
pub use interfaces::StoreError;
pub use runtime::InMemoryEventSink;
pub use runtime::InMemoryIntentStore;
pub use runtime::ReconcileError;
pub use runtime::ReconcileReport;
pub use runtime::Reconciler;
pub use runtime::ReconcilerConfig;
pub use runtime::ReconcilerGateway;
pub use runtime::ReconcilerHandle;
pub use runtime::RingStateMachine;
pub use runtime::StatusSnapshot;
pub use runtime::TransitionError;
pub use runtime::classify_drift;
