// crates/rollout-core/src/core/intent.rs
// ============================================================================
// Module: Deployment Intent
// Description: Intent records, scopes, lifecycle status, and ring telemetry.
// Purpose: Capture declared rollout intent mutated only through defined transitions.
// Dependencies: crate::core::{identifiers, rings, risk, time}, serde
// ============================================================================

//! ## Overview
//! A deployment intent declares what artifact should roll out, where, and
//! under which calibration. Intents are owned exclusively by the ring state
//! machine: created once, mutated only through modeled transitions, never
//! deleted. Terminal states are final.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AdapterId;
use crate::core::identifiers::ApplicationId;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::IntentId;
use crate::core::identifiers::RevisionNumber;
use crate::core::rings::ConnectivityClass;
use crate::core::rings::Ring;
use crate::core::risk::RiskAssessment;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Artifact Reference
// ============================================================================

/// Reference to the artifact an intent rolls out.
///
/// # Invariants
/// - `version` is the exact version string the fleet must converge to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReference {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Artifact version string.
    pub version: String,
}

// ============================================================================
// SECTION: Scopes
// ============================================================================

/// Target scope declared by an intent.
///
/// # Invariants
/// - `rings` lists the cohorts the intent is allowed to reach, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetScope {
    /// Site connectivity class of the targeted cohorts.
    pub connectivity: ConnectivityClass,
    /// Organizational unit the intent targets.
    pub org_unit: String,
    /// Rings the intent is scoped to reach.
    pub rings: Vec<Ring>,
}

/// Scope boundary owned by a publisher or an application registration.
///
/// # Invariants
/// - A target scope is within the boundary when its org unit is listed and
///   every requested ring is permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBoundary {
    /// Organizational units covered by the boundary.
    pub org_units: BTreeSet<String>,
    /// Rings permitted by the boundary.
    pub rings: BTreeSet<Ring>,
}

impl ScopeBoundary {
    /// Returns true when the target scope is fully inside this boundary.
    #[must_use]
    pub fn contains(&self, scope: &TargetScope) -> bool {
        self.org_units.contains(&scope.org_unit)
            && scope.rings.iter().all(|ring| self.rings.contains(ring))
    }
}

// ============================================================================
// SECTION: Schedule and Rollback
// ============================================================================

/// Per-ring schedule entry.
///
/// # Invariants
/// - `not_before` gates ring entry; `None` means immediately eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSchedule {
    /// Ring the entry applies to.
    pub ring: Ring,
    /// Earliest allowed entry time.
    pub not_before: Option<Timestamp>,
}

/// Rollback plan reference attached to an intent.
///
/// # Invariants
/// - `validated` must be true before the first promotion out of the lab ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// External rollback plan reference.
    pub reference: String,
    /// Whether the plan has been validated.
    pub validated: bool,
}

// ============================================================================
// SECTION: Lifecycle Status
// ============================================================================

/// Intent lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and transition checks.
/// - `Completed`, `Failed`, and `RolledBack` are terminal and final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created, not yet assessed.
    Pending,
    /// Risk assessment recorded.
    RiskAssessed,
    /// Scope validated against publisher and application boundaries.
    ScopeValidated,
    /// CAB approval recorded for a CAB-required intent.
    CabApproved,
    /// No approval is required for the next ring entry.
    ///
    /// For CAB-required intents this covers the deliberately CAB-exempt
    /// lab and canary entries; the pilot-entry check reads the assessment
    /// classification directly.
    CabNotRequired,
    /// Publishing and soaking in a ring.
    RingInProgress {
        /// Ring currently in progress.
        ring: Ring,
    },
    /// Ring completed; eligible for the next promotion.
    RingComplete {
        /// Ring that completed.
        ring: Ring,
    },
    /// Frozen awaiting a CAB decision before entering a ring.
    ///
    /// Non-promotable but not failed; the intent keeps holding the
    /// per-application lock while the decision is pending.
    AwaitingCabDecision {
        /// Ring whose entry is blocked on approval.
        ring: Ring,
    },
    /// All rings completed.
    Completed,
    /// Terminal failure.
    Failed {
        /// Failure reason description.
        reason: String,
    },
    /// Explicit rollback transition.
    RolledBack {
        /// Ring the intent was in when rolled back.
        from: Ring,
        /// Rollback reason description.
        reason: String,
    },
}

impl IntentStatus {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::RolledBack { .. })
    }

    /// Returns the stable status kind name used in audit events.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RiskAssessed => "risk_assessed",
            Self::ScopeValidated => "scope_validated",
            Self::CabApproved => "cab_approved",
            Self::CabNotRequired => "cab_not_required",
            Self::RingInProgress { .. } => "ring_in_progress",
            Self::RingComplete { .. } => "ring_complete",
            Self::AwaitingCabDecision { .. } => "awaiting_cab_decision",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::RolledBack { .. } => "rolled_back",
        }
    }
}

// ============================================================================
// SECTION: Deployment Intent
// ============================================================================

/// Declared deployment intent.
///
/// # Invariants
/// - Exactly one risk assessment per revision.
/// - `current_ring` only advances monotonically; regression happens solely
///   through the explicit rollback transition.
/// - Mutated only by the ring state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIntent {
    /// Intent identifier.
    pub intent_id: IntentId,
    /// Application the intent deploys.
    pub application_id: ApplicationId,
    /// Execution-plane adapter the intent targets.
    pub adapter_id: AdapterId,
    /// Intent revision.
    pub revision: RevisionNumber,
    /// Artifact reference.
    pub artifact: ArtifactReference,
    /// Target scope.
    pub target_scope: TargetScope,
    /// Per-ring schedule.
    pub schedule: Vec<RingSchedule>,
    /// Calibration version the intent was admitted under.
    pub calibration_version: String,
    /// Rollback plan reference.
    pub rollback_plan: RollbackPlan,
    /// Risk assessment for this revision, once computed.
    pub risk: Option<RiskAssessment>,
    /// Recorded CAB approval reference, if any.
    pub approval: Option<ApprovalId>,
    /// Last ring entered, if any.
    pub current_ring: Option<Ring>,
    /// Lifecycle status.
    pub status: IntentStatus,
    /// Concurrency override flag (itself requires an approval reference).
    pub concurrency_override: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last transition timestamp.
    pub updated_at: Timestamp,
}

/// Parameters for intent creation.
///
/// # Invariants
/// - Creation-time validation happens in the ring state machine, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIntent {
    /// Intent identifier.
    pub intent_id: IntentId,
    /// Application the intent deploys.
    pub application_id: ApplicationId,
    /// Execution-plane adapter the intent targets.
    pub adapter_id: AdapterId,
    /// Artifact reference.
    pub artifact: ArtifactReference,
    /// Target scope.
    pub target_scope: TargetScope,
    /// Per-ring schedule.
    pub schedule: Vec<RingSchedule>,
    /// Rollback plan reference.
    pub rollback_plan: RollbackPlan,
    /// Concurrency override flag.
    pub concurrency_override: bool,
    /// Approval reference backing the override flag, if set.
    pub override_approval: Option<ApprovalId>,
}

// ============================================================================
// SECTION: Ring Telemetry
// ============================================================================

/// Telemetry snapshot for one ring, consumed by the gate evaluator.
///
/// # Invariants
/// - Counts are cumulative for the ring since publish.
/// - `compliance_hours` is the observed time to compliance, or the elapsed
///   soak time when the cohort has not yet converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingTelemetry {
    /// Ring the snapshot describes.
    pub ring: Ring,
    /// Devices that installed successfully.
    pub success_count: u64,
    /// Devices that failed installation.
    pub failure_count: u64,
    /// Devices still pending.
    pub pending_count: u64,
    /// Hours to reach compliance (or elapsed hours while pending).
    pub compliance_hours: u32,
    /// Incidents attributed to the rollout in this ring.
    pub incident_count: u32,
}
