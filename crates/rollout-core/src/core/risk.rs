// crates/rollout-core/src/core/risk.rs
// ============================================================================
// Module: Risk Assessor
// Description: Deterministic risk scoring and threshold classification.
// Purpose: Gate human approval with a reproducible, versioned scoring model.
// Dependencies: crate::core::{identifiers, intent, rings}, serde, thiserror
// ============================================================================

//! ## Overview
//! The risk assessor is a pure function from an artifact risk profile and a
//! target scope to a scored assessment. Scoring is integral fixed-point:
//! normalized factor values are per-myriad units (0..=10000 maps to 0.0..=1.0)
//! and scores are hundredths of a point (0..=10000 maps to 0.00..=100.00), so
//! repeated assessments under one model version are byte-identical. Missing
//! factor inputs fail closed with [`AssessmentError`]; nothing is defaulted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::intent::TargetScope;

// ============================================================================
// SECTION: Fixed-Point Units
// ============================================================================

/// Per-myriad denominator for normalized factor values (10000 == 1.0).
pub const NORMALIZED_ONE: u32 = 10_000;

/// Score ceiling in hundredths of a point (10000 == 100.00).
pub const SCORE_CEILING_CENTI: u32 = 10_000;

/// Classification boundary in hundredths of a point (5000 == 50.00).
const CAB_BOUNDARY_CENTI: u32 = 5_000;

// ============================================================================
// SECTION: Risk Score
// ============================================================================

/// Computed risk score in hundredths of a point.
///
/// # Invariants
/// - Always within `0..=10000` (0.00 to 100.00 points).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskScore(u32);

impl RiskScore {
    /// Creates a score from hundredths of a point, clamped to the ceiling.
    #[must_use]
    pub const fn from_centi_points(centi: u32) -> Self {
        if centi > SCORE_CEILING_CENTI {
            Self(SCORE_CEILING_CENTI)
        } else {
            Self(centi)
        }
    }

    /// Returns the score in hundredths of a point.
    #[must_use]
    pub const fn centi_points(self) -> u32 {
        self.0
    }

    /// Returns the whole-point portion of the score.
    #[must_use]
    pub const fn points(self) -> u32 {
        self.0 / 100
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// SECTION: Factor Inputs
// ============================================================================

/// Installation context required by the artifact.
///
/// # Invariants
/// - Variants are stable for serialization and rubric lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallContext {
    /// Installs in system context without elevation prompts.
    System,
    /// Requires administrator elevation on the endpoint.
    Admin,
    /// Installs entirely in user context.
    User,
}

/// Code-signing state of the artifact.
///
/// # Invariants
/// - Variants are stable for serialization and rubric lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    /// Unsigned artifact.
    Unsigned,
    /// Signed by a publisher outside the trusted set.
    SignedUntrusted,
    /// Signed by a trusted publisher.
    SignedTrusted,
}

/// Maturity of the rollback plan attached to the intent.
///
/// # Invariants
/// - Variants are stable for serialization and rubric lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackMaturity {
    /// No rollback plan exists.
    None,
    /// Rollback plan is documented but unexercised.
    Documented,
    /// Rollback plan has been validated in a lab.
    Validated,
}

/// Artifact risk profile supplied by the caller.
///
/// # Invariants
/// - `None` fields are treated as missing input and fail scoring closed.
/// - `privileged_tooling` is always known; it forces CAB regardless of score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRiskProfile {
    /// Installation context, if known.
    pub install_context: Option<InstallContext>,
    /// Whether installation forces a reboot, if known.
    pub reboot_required: Option<bool>,
    /// Whether the artifact ships a kernel-mode component, if known.
    pub kernel_component: Option<bool>,
    /// Code-signing state, if known.
    pub signature: Option<SignatureState>,
    /// Rollback plan maturity, if known.
    pub rollback_maturity: Option<RollbackMaturity>,
    /// Whether the artifact is privileged tooling (endpoint agents, drivers).
    pub privileged_tooling: bool,
}

// ============================================================================
// SECTION: Factor Kinds
// ============================================================================

/// Scored risk factor kinds.
///
/// # Invariants
/// - Variants are stable for serialization and weight lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactorKind {
    /// Installation context factor.
    InstallContext,
    /// Reboot requirement factor.
    RebootRequired,
    /// Kernel-mode component factor.
    KernelComponent,
    /// Code-signing state factor.
    Signature,
    /// Target scope breadth factor.
    ScopeBreadth,
    /// Rollback plan maturity factor.
    RollbackMaturity,
}

impl RiskFactorKind {
    /// All factor kinds in canonical scoring order.
    pub const ALL: [Self; 6] = [
        Self::InstallContext,
        Self::RebootRequired,
        Self::KernelComponent,
        Self::Signature,
        Self::ScopeBreadth,
        Self::RollbackMaturity,
    ];

    /// Returns the stable factor name used in breakdowns and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InstallContext => "install_context",
            Self::RebootRequired => "reboot_required",
            Self::KernelComponent => "kernel_component",
            Self::Signature => "signature",
            Self::ScopeBreadth => "scope_breadth",
            Self::RollbackMaturity => "rollback_maturity",
        }
    }
}

impl fmt::Display for RiskFactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SECTION: Risk Model
// ============================================================================

/// Risk model version identifier.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskModelVersion(String);

impl RiskModelVersion {
    /// Creates a new model version identifier.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Returns the version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RiskModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RiskModelVersion {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Per-factor weights in whole points.
///
/// # Invariants
/// - Weights sum to 100 in a valid calibration; scoring clamps regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorWeights {
    /// Weight for the installation context factor.
    pub install_context: u32,
    /// Weight for the reboot requirement factor.
    pub reboot_required: u32,
    /// Weight for the kernel-mode component factor.
    pub kernel_component: u32,
    /// Weight for the code-signing state factor.
    pub signature: u32,
    /// Weight for the scope breadth factor.
    pub scope_breadth: u32,
    /// Weight for the rollback maturity factor.
    pub rollback_maturity: u32,
}

impl FactorWeights {
    /// Returns the weight for a factor kind.
    #[must_use]
    pub const fn weight(&self, kind: RiskFactorKind) -> u32 {
        match kind {
            RiskFactorKind::InstallContext => self.install_context,
            RiskFactorKind::RebootRequired => self.reboot_required,
            RiskFactorKind::KernelComponent => self.kernel_component,
            RiskFactorKind::Signature => self.signature,
            RiskFactorKind::ScopeBreadth => self.scope_breadth,
            RiskFactorKind::RollbackMaturity => self.rollback_maturity,
        }
    }

    /// Returns the sum of all weights.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.install_context
            + self.reboot_required
            + self.kernel_component
            + self.signature
            + self.scope_breadth
            + self.rollback_maturity
    }
}

/// Versioned rubric mapping qualitative conditions to per-myriad values.
///
/// # Invariants
/// - All values are within `0..=10000`; validation is the config layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRubric {
    /// Normalized value for system-context installs.
    pub install_system: u32,
    /// Normalized value for admin-elevation installs.
    pub install_admin: u32,
    /// Normalized value for user-context installs.
    pub install_user: u32,
    /// Normalized value when a reboot is required.
    pub reboot_required: u32,
    /// Normalized value when no reboot is required.
    pub reboot_not_required: u32,
    /// Normalized value when a kernel-mode component ships.
    pub kernel_component: u32,
    /// Normalized value when no kernel-mode component ships.
    pub no_kernel_component: u32,
    /// Normalized value for unsigned artifacts.
    pub unsigned: u32,
    /// Normalized value for artifacts signed by untrusted publishers.
    pub signed_untrusted: u32,
    /// Normalized value for artifacts signed by trusted publishers.
    pub signed_trusted: u32,
    /// Normalized value added per ring of requested scope breadth.
    pub scope_ring_step: u32,
    /// Normalized value when no rollback plan exists.
    pub rollback_none: u32,
    /// Normalized value for documented but unexercised rollback plans.
    pub rollback_documented: u32,
    /// Normalized value for lab-validated rollback plans.
    pub rollback_validated: u32,
}

/// Versioned risk model: weights plus rubric.
///
/// # Invariants
/// - Immutable once published; calibration changes require a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskModel {
    /// Model version identifier.
    pub version: RiskModelVersion,
    /// Per-factor weights.
    pub weights: FactorWeights,
    /// Qualitative rubric values.
    pub rubric: RiskRubric,
}

impl RiskModel {
    /// Returns the baseline model shipped as calibration version `v1`.
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            version: RiskModelVersion::new("v1"),
            weights: FactorWeights {
                install_context: 25,
                reboot_required: 10,
                kernel_component: 20,
                signature: 15,
                scope_breadth: 15,
                rollback_maturity: 15,
            },
            rubric: RiskRubric {
                install_system: 6_000,
                install_admin: 10_000,
                install_user: 2_000,
                reboot_required: 10_000,
                reboot_not_required: 1_000,
                kernel_component: 10_000,
                no_kernel_component: 0,
                unsigned: 10_000,
                signed_untrusted: 6_000,
                signed_trusted: 1_000,
                scope_ring_step: 2_000,
                rollback_none: 10_000,
                rollback_documented: 5_000,
                rollback_validated: 1_000,
            },
        }
    }
}

/// Coexisting model versions for the migration window.
///
/// # Invariants
/// - The active version is always present in the map.
/// - Assessments computed under a retired version are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskModelSet {
    /// Models keyed by version.
    models: BTreeMap<RiskModelVersion, RiskModel>,
    /// Version applied to new assessments.
    active: RiskModelVersion,
}

impl RiskModelSet {
    /// Creates a model set with a single active model.
    #[must_use]
    pub fn new(model: RiskModel) -> Self {
        let active = model.version.clone();
        let mut models = BTreeMap::new();
        models.insert(active.clone(), model);
        Self { models, active }
    }

    /// Adds a coexisting model version without changing the active version.
    ///
    /// # Errors
    ///
    /// Returns [`AssessmentError::DuplicateModelVersion`] when the version is
    /// already registered.
    pub fn add_model(&mut self, model: RiskModel) -> Result<(), AssessmentError> {
        if self.models.contains_key(&model.version) {
            return Err(AssessmentError::DuplicateModelVersion {
                version: model.version.clone(),
            });
        }
        self.models.insert(model.version.clone(), model);
        Ok(())
    }

    /// Makes a registered version the active one.
    ///
    /// # Errors
    ///
    /// Returns [`AssessmentError::UnknownModelVersion`] when the version is
    /// not registered.
    pub fn activate(&mut self, version: &RiskModelVersion) -> Result<(), AssessmentError> {
        if !self.models.contains_key(version) {
            return Err(AssessmentError::UnknownModelVersion {
                version: version.clone(),
            });
        }
        self.active = version.clone();
        Ok(())
    }

    /// Returns the active model version.
    #[must_use]
    pub const fn active_version(&self) -> &RiskModelVersion {
        &self.active
    }

    /// Resolves a model by version.
    ///
    /// # Errors
    ///
    /// Returns [`AssessmentError::UnknownModelVersion`] when the version is
    /// not registered.
    pub fn model(&self, version: &RiskModelVersion) -> Result<&RiskModel, AssessmentError> {
        self.models.get(version).ok_or_else(|| AssessmentError::UnknownModelVersion {
            version: version.clone(),
        })
    }
}

impl Default for RiskModelSet {
    fn default() -> Self {
        Self::new(RiskModel::baseline())
    }
}

// ============================================================================
// SECTION: Assessment Output
// ============================================================================

/// Threshold classification derived from the score.
///
/// # Invariants
/// - Variants are stable for serialization and transition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClassification {
    /// Score at or below the boundary; automated promotion is allowed.
    AutomatedAllowed,
    /// Score above the boundary or privileged tooling; CAB approval required
    /// for pilot-ring entry and beyond.
    CabRequired,
}

/// One factor's contribution to the score.
///
/// # Invariants
/// - `contribution_centi == weight * normalized_per_myriad / 100`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactorBreakdown {
    /// Factor kind.
    pub kind: RiskFactorKind,
    /// Normalized value in per-myriad units.
    pub normalized_per_myriad: u32,
    /// Weight in whole points.
    pub weight: u32,
    /// Contribution in hundredths of a point.
    pub contribution_centi: u32,
    /// Human-readable rationale for the normalized value.
    pub rationale: String,
}

/// Immutable risk assessment for one intent revision.
///
/// # Invariants
/// - Factors are ordered canonically; identical inputs under one model
///   version yield byte-identical assessments.
/// - Never mutated after computation; a new revision requires a new assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Ordered factor breakdown.
    pub factors: Vec<RiskFactorBreakdown>,
    /// Clamped score.
    pub score: RiskScore,
    /// Model version used.
    pub model_version: RiskModelVersion,
    /// Threshold classification.
    pub classification: RiskClassification,
}

// ============================================================================
// SECTION: Assessment Errors
// ============================================================================

/// Risk assessment errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Missing inputs always name the specific factor (fail closed, no defaults).
#[derive(Debug, Error)]
pub enum AssessmentError {
    /// A required factor input was missing from the profile.
    #[error("risk factor input missing: {factor}")]
    MissingFactor {
        /// Stable factor name.
        factor: &'static str,
    },
    /// The requested model version is not registered.
    #[error("unknown risk model version: {version}")]
    UnknownModelVersion {
        /// Requested version.
        version: RiskModelVersion,
    },
    /// A model version was registered twice.
    #[error("duplicate risk model version: {version}")]
    DuplicateModelVersion {
        /// Conflicting version.
        version: RiskModelVersion,
    },
    /// The target scope requests no rings.
    #[error("target scope requests no rings")]
    EmptyScope,
}

// ============================================================================
// SECTION: Assessment
// ============================================================================

/// Assesses an artifact profile against a target scope under one model.
///
/// Deterministic: no randomness, no external calls, integral arithmetic
/// only. The score is `clamp(0, 100, sum(weight_i * normalized_i))` expressed
/// in hundredths of a point.
///
/// # Errors
///
/// Returns [`AssessmentError`] when a required factor input is missing or the
/// scope is empty; inputs are never defaulted.
pub fn assess(
    profile: &ArtifactRiskProfile,
    scope: &TargetScope,
    model: &RiskModel,
) -> Result<RiskAssessment, AssessmentError> {
    if scope.rings.is_empty() {
        return Err(AssessmentError::EmptyScope);
    }

    let mut factors = Vec::with_capacity(RiskFactorKind::ALL.len());
    let mut total_centi: u32 = 0;
    for kind in RiskFactorKind::ALL {
        let (normalized, rationale) = normalize_factor(kind, profile, scope, &model.rubric)?;
        let weight = model.weights.weight(kind);
        let contribution_centi = weight.saturating_mul(normalized) / 100;
        total_centi = total_centi.saturating_add(contribution_centi);
        factors.push(RiskFactorBreakdown {
            kind,
            normalized_per_myriad: normalized,
            weight,
            contribution_centi,
            rationale,
        });
    }

    let score = RiskScore::from_centi_points(total_centi);
    let privileged_override = profile.privileged_tooling;
    let classification = if privileged_override || score.centi_points() > CAB_BOUNDARY_CENTI {
        RiskClassification::CabRequired
    } else {
        RiskClassification::AutomatedAllowed
    };

    Ok(RiskAssessment {
        factors,
        score,
        model_version: model.version.clone(),
        classification,
    })
}

/// Normalizes one factor from the profile via the rubric, failing closed on
/// missing input.
fn normalize_factor(
    kind: RiskFactorKind,
    profile: &ArtifactRiskProfile,
    scope: &TargetScope,
    rubric: &RiskRubric,
) -> Result<(u32, String), AssessmentError> {
    let missing = |factor: &'static str| AssessmentError::MissingFactor { factor };
    match kind {
        RiskFactorKind::InstallContext => {
            let context = profile.install_context.ok_or_else(|| missing("install_context"))?;
            let (value, rationale) = match context {
                InstallContext::System => (rubric.install_system, "system-context install"),
                InstallContext::Admin => (rubric.install_admin, "admin-required install"),
                InstallContext::User => (rubric.install_user, "user-context install"),
            };
            Ok((value, rationale.to_string()))
        }
        RiskFactorKind::RebootRequired => {
            let reboot = profile.reboot_required.ok_or_else(|| missing("reboot_required"))?;
            if reboot {
                Ok((rubric.reboot_required, "installation forces a reboot".to_string()))
            } else {
                Ok((rubric.reboot_not_required, "no reboot required".to_string()))
            }
        }
        RiskFactorKind::KernelComponent => {
            let kernel = profile.kernel_component.ok_or_else(|| missing("kernel_component"))?;
            if kernel {
                Ok((rubric.kernel_component, "ships a kernel-mode component".to_string()))
            } else {
                Ok((rubric.no_kernel_component, "no kernel-mode component".to_string()))
            }
        }
        RiskFactorKind::Signature => {
            let signature = profile.signature.ok_or_else(|| missing("signature"))?;
            let (value, rationale) = match signature {
                SignatureState::Unsigned => (rubric.unsigned, "artifact is unsigned"),
                SignatureState::SignedUntrusted => {
                    (rubric.signed_untrusted, "signed by untrusted publisher")
                }
                SignatureState::SignedTrusted => {
                    (rubric.signed_trusted, "signed by trusted publisher")
                }
            };
            Ok((value, rationale.to_string()))
        }
        RiskFactorKind::ScopeBreadth => {
            let ring_count = u32::try_from(scope.rings.len()).unwrap_or(u32::MAX);
            let value = rubric.scope_ring_step.saturating_mul(ring_count).min(NORMALIZED_ONE);
            Ok((value, format!("scope spans {ring_count} ring(s)")))
        }
        RiskFactorKind::RollbackMaturity => {
            let maturity =
                profile.rollback_maturity.ok_or_else(|| missing("rollback_maturity"))?;
            let (value, rationale) = match maturity {
                RollbackMaturity::None => (rubric.rollback_none, "no rollback plan"),
                RollbackMaturity::Documented => {
                    (rubric.rollback_documented, "rollback plan documented, unexercised")
                }
                RollbackMaturity::Validated => {
                    (rubric.rollback_validated, "rollback plan validated in lab")
                }
            };
            Ok((value, rationale.to_string()))
        }
    }
}
