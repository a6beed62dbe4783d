// crates/rollout-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Stores
// Description: In-memory intent store and audit sink implementations.
// Purpose: Provide default and test-fixture backends for the runtime.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! In-memory implementations of the storage seams. They honor the same
//! contracts as durable backends (append-only audit, snapshot saves) but
//! hold everything behind a mutex. Production deployments swap in the
//! sqlite-backed stores; tests drive these directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::core::identifiers::IntentId;
use crate::core::intent::DeploymentIntent;
use crate::core::time::Timestamp;
use crate::interfaces::AuditEvent;
use crate::interfaces::EventSink;
use crate::interfaces::EventSinkError;
use crate::interfaces::IntentStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Intent Store
// ============================================================================

/// In-memory intent store.
///
/// # Invariants
/// - Snapshots are stored whole; partial updates are not possible.
#[derive(Debug, Default)]
pub struct InMemoryIntentStore {
    /// Intent snapshots keyed by identifier.
    intents: Mutex<BTreeMap<IntentId, DeploymentIntent>>,
}

impl InMemoryIntentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntentStore for InMemoryIntentStore {
    fn load(&self, intent_id: &IntentId) -> Result<Option<DeploymentIntent>, StoreError> {
        let guard =
            self.intents.lock().map_err(|_| StoreError::Store("store lock poisoned".into()))?;
        Ok(guard.get(intent_id).cloned())
    }

    fn save(&self, intent: &DeploymentIntent) -> Result<(), StoreError> {
        let mut guard =
            self.intents.lock().map_err(|_| StoreError::Store("store lock poisoned".into()))?;
        guard.insert(intent.intent_id.clone(), intent.clone());
        Ok(())
    }

    fn list_active(&self) -> Result<Vec<DeploymentIntent>, StoreError> {
        let guard =
            self.intents.lock().map_err(|_| StoreError::Store("store lock poisoned".into()))?;
        Ok(guard.values().filter(|intent| !intent.status.is_terminal()).cloned().collect())
    }

    fn list_completed_since(&self, cutoff: Timestamp) -> Result<Vec<DeploymentIntent>, StoreError> {
        let guard =
            self.intents.lock().map_err(|_| StoreError::Store("store lock poisoned".into()))?;
        Ok(guard
            .values()
            .filter(|intent| intent.status.is_terminal() && intent.updated_at >= cutoff)
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: In-Memory Event Sink
// ============================================================================

/// In-memory append-only audit sink.
///
/// # Invariants
/// - Events are appended in delivery order and never mutated.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    /// Delivered events in order.
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all delivered events.
    ///
    /// # Errors
    ///
    /// Returns [`EventSinkError`] when the sink lock is poisoned.
    pub fn events(&self) -> Result<Vec<AuditEvent>, EventSinkError> {
        let guard = self
            .events
            .lock()
            .map_err(|_| EventSinkError::Delivery("sink lock poisoned".into()))?;
        Ok(guard.clone())
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: &AuditEvent) -> Result<(), EventSinkError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| EventSinkError::Delivery("sink lock poisoned".into()))?;
        guard.push(event.clone());
        Ok(())
    }
}
