// crates/rollout-core/src/core/rings.rs
// ============================================================================
// Module: Ring Calibration
// Description: Deployment rings, connectivity classes, and promotion thresholds.
// Purpose: Define the fixed ring cohorts and their versioned quality bars.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Rings are fixed deployment cohorts with increasing scale and quality
//! bars. Their thresholds are calibrated per version, not per deployment:
//! an intent records which calibration version it was admitted under, and
//! the evaluator reads thresholds from that calibration only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Rings
// ============================================================================

/// Deployment ring cohorts in promotion order.
///
/// # Invariants
/// - Variants are stable for serialization and transition checks.
/// - Ordering follows promotion order (`Lab` first, `Global` last).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Ring {
    /// Ring 0: lab devices.
    Lab,
    /// Ring 1: canary cohort.
    Canary,
    /// Ring 2: pilot cohort.
    Pilot,
    /// Ring 3: department cohort.
    Department,
    /// Ring 4: global fleet.
    Global,
}

impl Ring {
    /// All rings in promotion order.
    pub const ALL: [Self; 5] =
        [Self::Lab, Self::Canary, Self::Pilot, Self::Department, Self::Global];

    /// Returns the zero-based ring index.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Lab => 0,
            Self::Canary => 1,
            Self::Pilot => 2,
            Self::Department => 3,
            Self::Global => 4,
        }
    }

    /// Returns the next ring in promotion order, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Lab => Some(Self::Canary),
            Self::Canary => Some(Self::Pilot),
            Self::Pilot => Some(Self::Department),
            Self::Department => Some(Self::Global),
            Self::Global => None,
        }
    }

    /// Returns true for production-scale rings (department and global).
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Department | Self::Global)
    }

    /// Returns true when entry into this ring requires CAB approval for
    /// intents classified as CAB-required.
    ///
    /// Ring 0 and Ring 1 entry is deliberately CAB-exempt so early signal
    /// arrives while the approval is pending.
    #[must_use]
    pub const fn requires_cab_on_entry(self) -> bool {
        matches!(self, Self::Pilot | Self::Department | Self::Global)
    }

    /// Returns the stable ring name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lab => "lab",
            Self::Canary => "canary",
            Self::Pilot => "pilot",
            Self::Department => "department",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SECTION: Connectivity Classes
// ============================================================================

/// Site connectivity class, splitting the time-to-compliance ceiling.
///
/// # Invariants
/// - Variants are stable for serialization and threshold lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityClass {
    /// Always-connected sites.
    Online,
    /// Intermittently-connected sites.
    Intermittent,
    /// Air-gapped sites serviced by couriered media.
    AirGapped,
}

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// Time-to-compliance ceilings in hours, split by connectivity class.
///
/// # Invariants
/// - Ceilings are upper bounds; equal-to-ceiling passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceCeilings {
    /// Ceiling for online sites.
    pub online_hours: u32,
    /// Ceiling for intermittently-connected sites.
    pub intermittent_hours: u32,
    /// Ceiling for air-gapped sites.
    pub air_gapped_hours: u32,
}

impl ComplianceCeilings {
    /// Returns the ceiling for a connectivity class.
    #[must_use]
    pub const fn ceiling_hours(&self, connectivity: ConnectivityClass) -> u32 {
        match connectivity {
            ConnectivityClass::Online => self.online_hours,
            ConnectivityClass::Intermittent => self.intermittent_hours,
            ConnectivityClass::AirGapped => self.air_gapped_hours,
        }
    }
}

/// Promotion thresholds for one ring.
///
/// # Invariants
/// - `min_success_rate_bp` is in basis points (9800 == 98.00%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingThresholds {
    /// Minimum success rate in basis points.
    pub min_success_rate_bp: u32,
    /// Time-to-compliance ceilings by connectivity class.
    pub compliance: ComplianceCeilings,
    /// Maximum tolerated incident count.
    pub max_incidents: u32,
}

/// Versioned threshold calibration across all rings.
///
/// # Invariants
/// - Immutable once published; recalibration requires a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingCalibration {
    /// Calibration version identifier.
    pub version: String,
    /// Thresholds for the lab ring.
    pub lab: RingThresholds,
    /// Thresholds for the canary ring.
    pub canary: RingThresholds,
    /// Thresholds for the pilot ring.
    pub pilot: RingThresholds,
    /// Thresholds for the department ring.
    pub department: RingThresholds,
    /// Thresholds for the global ring.
    pub global: RingThresholds,
}

impl RingCalibration {
    /// Returns the thresholds for a ring.
    #[must_use]
    pub const fn thresholds(&self, ring: Ring) -> &RingThresholds {
        match ring {
            Ring::Lab => &self.lab,
            Ring::Canary => &self.canary,
            Ring::Pilot => &self.pilot,
            Ring::Department => &self.department,
            Ring::Global => &self.global,
        }
    }

    /// Returns the provisional baseline calibration (`cal-v1`).
    #[must_use]
    pub fn baseline() -> Self {
        let compliance = ComplianceCeilings {
            online_hours: 24,
            intermittent_hours: 72,
            air_gapped_hours: 168,
        };
        Self {
            version: "cal-v1".to_string(),
            lab: RingThresholds {
                min_success_rate_bp: 9_800,
                compliance,
                max_incidents: 0,
            },
            canary: RingThresholds {
                min_success_rate_bp: 9_700,
                compliance,
                max_incidents: 0,
            },
            pilot: RingThresholds {
                min_success_rate_bp: 9_900,
                compliance,
                max_incidents: 0,
            },
            department: RingThresholds {
                min_success_rate_bp: 9_900,
                compliance,
                max_incidents: 0,
            },
            global: RingThresholds {
                min_success_rate_bp: 9_900,
                compliance,
                max_incidents: 0,
            },
        }
    }
}
