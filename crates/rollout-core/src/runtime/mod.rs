// crates/rollout-core/src/runtime/mod.rs
// ============================================================================
// Module: Rollout Runtime
// Description: Ring state machine, reconciliation loop, and in-memory stores.
// Purpose: Drive intent lifecycles and drift detection over the interface seams.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The runtime owns the stateful parts of the core: the ring state machine
//! that applies modeled transitions to intents, the reconciliation loop that
//! diffs declared intent against reported reality, and in-memory store
//! implementations used as defaults and test fixtures.

pub mod machine;
pub mod memory;
pub mod reconciler;

pub use machine::RingStateMachine;
pub use machine::TransitionError;
pub use memory::InMemoryEventSink;
pub use memory::InMemoryIntentStore;
pub use reconciler::ReconcileError;
pub use reconciler::ReconcileReport;
pub use reconciler::Reconciler;
pub use reconciler::ReconcilerConfig;
pub use reconciler::ReconcilerGateway;
pub use reconciler::ReconcilerHandle;
pub use reconciler::StatusSnapshot;
pub use reconciler::classify_drift;
