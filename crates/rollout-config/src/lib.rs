// crates/rollout-config/src/lib.rs
// ============================================================================
// Module: Rollout Config
// Description: Configuration model, strict loading, validation, hot reload.
// Purpose: Supply every calibrated parameter externally; nothing hardcoded in evaluators.
// Dependencies: rollout-core, rollout-gateway, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! All calibrated behavior of Rollout Control comes from this crate: ring
//! thresholds, risk model weights and rubrics, the reconciliation interval,
//! circuit-breaker settings, and the retry policy. Loading is strict and
//! fail-closed: oversized files, non-UTF-8 content, unknown fields, and
//! semantically invalid values are all rejected before any component sees
//! the configuration. [`ConfigHandle`] provides hot reload with
//! keep-old-on-failure semantics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use rollout_core::FactorWeights;
use rollout_core::ReconcilerConfig;
use rollout_core::RingCalibration;
use rollout_core::RiskModel;
use rollout_core::RiskModelSet;
use rollout_core::RiskModelVersion;
use rollout_core::RiskRubric;
use rollout_gateway::BreakerConfig;
use rollout_gateway::RetryPolicy;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum config file size in bytes.
const MAX_CONFIG_BYTES: u64 = 1_048_576;

/// Maximum config path length in bytes.
const MAX_PATH_LEN: usize = 4_096;

/// Maximum length of a single path component in bytes.
const MAX_COMPONENT_LEN: usize = 255;

/// Reconciliation interval floor in minutes.
const MIN_RECONCILE_MINUTES: u64 = 15;

/// Upper bound on normalized rubric values (per-myriad scale).
const NORMALIZED_CEILING: u32 = 10_000;

/// Upper bound on success-rate thresholds in basis points.
const BASIS_POINT_CEILING: u32 = 10_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Loading fails closed; no partially-valid configuration is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config path exceeds the length limit.
    #[error("config path exceeds max length of {MAX_PATH_LEN} bytes")]
    PathTooLong,
    /// A path component exceeds the component length limit.
    #[error("config path component too long (max {MAX_COMPONENT_LEN} bytes)")]
    PathComponentTooLong,
    /// The config file exceeds the size limit.
    #[error("config file exceeds size limit of {MAX_CONFIG_BYTES} bytes")]
    FileTooLarge,
    /// The config file is not valid UTF-8.
    #[error("config file must be utf-8")]
    NotUtf8,
    /// Filesystem error while reading the config.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Semantic validation failure.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Risk model configuration.
///
/// # Invariants
/// - `weights` must sum to exactly 100.
/// - Rubric values are per-myriad and capped at 10000.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskSection {
    /// Active model version identifier.
    pub model_version: String,
    /// Per-factor weights in whole points.
    pub weights: FactorWeights,
    /// Qualitative rubric values in per-myriad units.
    pub rubric: RiskRubric,
}

impl Default for RiskSection {
    fn default() -> Self {
        let baseline = RiskModel::baseline();
        Self {
            model_version: baseline.version.as_str().to_string(),
            weights: baseline.weights,
            rubric: baseline.rubric,
        }
    }
}

/// Reconciliation loop configuration section.
///
/// # Invariants
/// - `interval_minutes` has a 15-minute floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerSection {
    /// Minutes between scheduled iterations.
    pub interval_minutes: u64,
    /// Hours completed intents stay eligible for reconciliation.
    pub completed_window_hours: u32,
    /// Maximum auto-remediation attempts per drift.
    pub max_attempts: u32,
    /// Backoff in hours after the first attempt; doubles per attempt.
    pub base_backoff_hours: u32,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            completed_window_hours: 168,
            max_attempts: 3,
            base_backoff_hours: 1,
        }
    }
}

/// Circuit breaker configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSection {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before half-opening.
    pub recovery_timeout_secs: u64,
    /// Probe calls admitted while half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_probes: 3,
        }
    }
}

/// Retry policy configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    /// Milliseconds before the second attempt.
    pub base_delay_ms: u64,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: u32,
    /// Upper bound in milliseconds on the random jitter per delay.
    pub max_jitter_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            multiplier: 2,
            max_jitter_ms: 250,
            max_attempts: 4,
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root configuration for Rollout Control.
///
/// # Invariants
/// - Always validated before it is handed to any component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RolloutConfig {
    /// Risk model weights and rubric.
    pub risk: RiskSection,
    /// Ring threshold calibration.
    pub calibration: RingCalibration,
    /// Reconciliation loop settings.
    pub reconciler: ReconcilerSection,
    /// Circuit breaker settings.
    pub breaker: BreakerSection,
    /// Retry policy settings.
    pub retry: RetrySection,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            risk: RiskSection::default(),
            calibration: RingCalibration::baseline(),
            reconciler: ReconcilerSection::default(),
            breaker: BreakerSection::default(),
            retry: RetrySection::default(),
        }
    }
}

impl RolloutConfig {
    /// Loads and validates configuration.
    ///
    /// With no path, the baseline defaults are returned (still validated).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on path, size, encoding, parse, or
    /// validation failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            None => Self::default(),
            Some(path) => {
                check_path(path)?;
                let metadata = fs::metadata(path).map_err(|error| ConfigError::Io(error.to_string()))?;
                if metadata.len() > MAX_CONFIG_BYTES {
                    return Err(ConfigError::FileTooLarge);
                }
                let bytes = fs::read(path).map_err(|error| ConfigError::Io(error.to_string()))?;
                if bytes.len() as u64 > MAX_CONFIG_BYTES {
                    return Err(ConfigError::FileTooLarge);
                }
                let text = String::from_utf8(bytes).map_err(|_| ConfigError::NotUtf8)?;
                toml::from_str(&text).map_err(|error| ConfigError::Parse(error.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = self.risk.weights.total();
        if total != 100 {
            return Err(ConfigError::Invalid(format!(
                "risk weights must sum to 100, got {total}"
            )));
        }
        if self.risk.model_version.trim().is_empty() {
            return Err(ConfigError::Invalid("risk model_version must not be empty".into()));
        }
        validate_rubric(&self.risk.rubric)?;
        validate_calibration(&self.calibration)?;
        if self.reconciler.interval_minutes < MIN_RECONCILE_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "reconciler interval_minutes must be at least {MIN_RECONCILE_MINUTES}"
            )));
        }
        if self.reconciler.max_attempts == 0 {
            return Err(ConfigError::Invalid("reconciler max_attempts must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid("breaker failure_threshold must be at least 1".into()));
        }
        if self.breaker.half_open_probes == 0 {
            return Err(ConfigError::Invalid("breaker half_open_probes must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid("retry multiplier must be at least 1".into()));
        }
        Ok(())
    }

    /// Builds the configured risk model.
    #[must_use]
    pub fn risk_model(&self) -> RiskModel {
        RiskModel {
            version: RiskModelVersion::new(self.risk.model_version.clone()),
            weights: self.risk.weights,
            rubric: self.risk.rubric.clone(),
        }
    }

    /// Builds a model set with the configured model active.
    #[must_use]
    pub fn model_set(&self) -> RiskModelSet {
        RiskModelSet::new(self.risk_model())
    }

    /// Returns the reconciler runtime configuration.
    #[must_use]
    pub const fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.reconciler.interval_minutes * 60),
            completed_window_hours: self.reconciler.completed_window_hours,
            max_attempts: self.reconciler.max_attempts,
            base_backoff_hours: self.reconciler.base_backoff_hours,
        }
    }

    /// Returns the circuit breaker configuration.
    #[must_use]
    pub const fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            recovery_timeout: Duration::from_secs(self.breaker.recovery_timeout_secs),
            half_open_probes: self.breaker.half_open_probes,
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
            max_attempts: self.retry.max_attempts,
        }
    }
}

/// Rejects over-long paths and path components.
fn check_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().len() > MAX_PATH_LEN {
        return Err(ConfigError::PathTooLong);
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_COMPONENT_LEN {
            return Err(ConfigError::PathComponentTooLong);
        }
    }
    Ok(())
}

/// Validates rubric values against the per-myriad ceiling.
fn validate_rubric(rubric: &RiskRubric) -> Result<(), ConfigError> {
    let values = [
        ("install_system", rubric.install_system),
        ("install_admin", rubric.install_admin),
        ("install_user", rubric.install_user),
        ("reboot_required", rubric.reboot_required),
        ("reboot_not_required", rubric.reboot_not_required),
        ("kernel_component", rubric.kernel_component),
        ("no_kernel_component", rubric.no_kernel_component),
        ("unsigned", rubric.unsigned),
        ("signed_untrusted", rubric.signed_untrusted),
        ("signed_trusted", rubric.signed_trusted),
        ("scope_ring_step", rubric.scope_ring_step),
        ("rollback_none", rubric.rollback_none),
        ("rollback_documented", rubric.rollback_documented),
        ("rollback_validated", rubric.rollback_validated),
    ];
    for (name, value) in values {
        if value > NORMALIZED_CEILING {
            return Err(ConfigError::Invalid(format!(
                "rubric {name} exceeds normalized ceiling {NORMALIZED_CEILING}: {value}"
            )));
        }
    }
    Ok(())
}

/// Validates per-ring calibration thresholds.
fn validate_calibration(calibration: &RingCalibration) -> Result<(), ConfigError> {
    if calibration.version.trim().is_empty() {
        return Err(ConfigError::Invalid("calibration version must not be empty".into()));
    }
    let rings = [
        ("lab", &calibration.lab),
        ("canary", &calibration.canary),
        ("pilot", &calibration.pilot),
        ("department", &calibration.department),
        ("global", &calibration.global),
    ];
    for (name, thresholds) in rings {
        if thresholds.min_success_rate_bp > BASIS_POINT_CEILING {
            return Err(ConfigError::Invalid(format!(
                "{name} min_success_rate_bp exceeds {BASIS_POINT_CEILING}"
            )));
        }
        if thresholds.min_success_rate_bp == 0 {
            return Err(ConfigError::Invalid(format!(
                "{name} min_success_rate_bp must be at least 1"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Hot Reload
// ============================================================================

/// Shared handle over the live configuration with hot reload.
///
/// # Invariants
/// - Reload swaps atomically; readers never observe a partially-applied
///   configuration.
/// - A failed reload keeps the previous configuration in place.
#[derive(Debug)]
pub struct ConfigHandle {
    /// Live configuration snapshot.
    current: RwLock<Arc<RolloutConfig>>,
}

impl ConfigHandle {
    /// Creates a handle over a validated configuration.
    #[must_use]
    pub fn new(config: RolloutConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Returns the current configuration snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<RolloutConfig> {
        self.current.read().map_or_else(|_| Arc::new(RolloutConfig::default()), |guard| guard.clone())
    }

    /// Reloads from the path, keeping the old configuration on any failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] from loading or validation; the live
    /// configuration is unchanged in that case.
    pub fn reload(&self, path: &Path) -> Result<(), ConfigError> {
        let fresh = RolloutConfig::load(Some(path))?;
        let mut guard = self
            .current
            .write()
            .map_err(|_| ConfigError::Invalid("config handle lock poisoned".into()))?;
        *guard = Arc::new(fresh);
        Ok(())
    }
}
