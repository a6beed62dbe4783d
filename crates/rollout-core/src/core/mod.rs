// crates/rollout-core/src/core/mod.rs
// ============================================================================
// Module: Core Data Model
// Description: Records, identifiers, and pure evaluation logic.
// Purpose: Group the serializable model types and pure functions of the core.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The core module holds everything that is pure data or pure computation:
//! identifiers, timestamps, deployment intents, risk assessment, ring
//! calibration, promotion gates, and drift records. Nothing in this module
//! performs I/O or reads the wall clock.

pub mod drift;
pub mod gates;
pub mod identifiers;
pub mod intent;
pub mod rings;
pub mod risk;
pub mod time;
