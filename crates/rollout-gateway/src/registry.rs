// crates/rollout-gateway/src/registry.rs
// ============================================================================
// Module: Adapter Registry
// Description: Registry routing operations to execution-plane adapters.
// Purpose: Resolve adapters by identifier with allowlist/denylist policy.
// Dependencies: rollout-core
// ============================================================================

//! ## Overview
//! The gateway delegates every operation to one of N pluggable adapters
//! selected by adapter identifier. The registry owns the adapter instances
//! behind trait objects and enforces an access policy on every resolution:
//! a denylist entry always wins, and when an allowlist is configured only
//! listed adapters resolve.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use rollout_core::AdapterId;
use rollout_core::ExecutionAdapter;

// ============================================================================
// SECTION: Access Policy
// ============================================================================

/// Access policy controlling which adapters may be targeted.
///
/// # Invariants
/// - `denylist` overrides `allowlist` when both are present.
/// - If `allowlist` is `None`, all registered adapters are allowed unless
///   denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterAccessPolicy {
    /// Optional allowlist of adapter identifiers.
    pub allowlist: Option<BTreeSet<AdapterId>>,
    /// Explicit denylist of adapter identifiers.
    pub denylist: BTreeSet<AdapterId>,
}

impl AdapterAccessPolicy {
    /// Returns a policy that permits all registered adapters.
    #[must_use]
    pub const fn allow_all() -> Self {
        Self {
            allowlist: None,
            denylist: BTreeSet::new(),
        }
    }

    /// Returns true when the adapter is allowed by policy.
    #[must_use]
    pub fn is_allowed(&self, adapter_id: &AdapterId) -> bool {
        if self.denylist.contains(adapter_id) {
            return false;
        }
        if let Some(allowlist) = &self.allowlist {
            return allowlist.contains(adapter_id);
        }
        true
    }
}

impl Default for AdapterAccessPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

// ============================================================================
// SECTION: Registry Errors
// ============================================================================

/// Adapter resolution errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No adapter is registered under the identifier.
    #[error("unknown adapter: {adapter_id}")]
    UnknownAdapter {
        /// Requested adapter identifier.
        adapter_id: AdapterId,
    },
    /// The adapter is registered but denied by policy.
    #[error("adapter denied by policy: {adapter_id}")]
    AdapterDenied {
        /// Denied adapter identifier.
        adapter_id: AdapterId,
    },
    /// An adapter is already registered under the identifier.
    #[error("duplicate adapter registration: {adapter_id}")]
    DuplicateAdapter {
        /// Conflicting adapter identifier.
        adapter_id: AdapterId,
    },
}

// ============================================================================
// SECTION: Adapter Registry
// ============================================================================

/// Execution-plane adapter registry with policy enforcement.
///
/// # Invariants
/// - Adapter identifiers are unique within the registry.
/// - Access policy is enforced on every resolution.
pub struct AdapterRegistry {
    /// Adapter implementations keyed by identifier.
    adapters: BTreeMap<AdapterId, Arc<dyn ExecutionAdapter + Send + Sync>>,
    /// Access control policy for adapter usage.
    policy: AdapterAccessPolicy,
}

impl AdapterRegistry {
    /// Creates an empty registry with the provided policy.
    #[must_use]
    pub fn new(policy: AdapterAccessPolicy) -> Self {
        Self {
            adapters: BTreeMap::new(),
            policy,
        }
    }

    /// Registers an adapter under its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateAdapter`] when the identifier is
    /// already taken.
    pub fn register(
        &mut self,
        adapter_id: AdapterId,
        adapter: Arc<dyn ExecutionAdapter + Send + Sync>,
    ) -> Result<(), RegistryError> {
        if self.adapters.contains_key(&adapter_id) {
            return Err(RegistryError::DuplicateAdapter { adapter_id });
        }
        self.adapters.insert(adapter_id, adapter);
        Ok(())
    }

    /// Resolves an adapter, enforcing the access policy.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownAdapter`] for unregistered
    /// identifiers and [`RegistryError::AdapterDenied`] for policy denials.
    pub fn resolve(
        &self,
        adapter_id: &AdapterId,
    ) -> Result<Arc<dyn ExecutionAdapter + Send + Sync>, RegistryError> {
        if !self.policy.is_allowed(adapter_id) {
            return Err(RegistryError::AdapterDenied {
                adapter_id: adapter_id.clone(),
            });
        }
        self.adapters.get(adapter_id).cloned().ok_or_else(|| RegistryError::UnknownAdapter {
            adapter_id: adapter_id.clone(),
        })
    }

    /// Returns the registered adapter identifiers in order.
    #[must_use]
    pub fn adapter_ids(&self) -> Vec<AdapterId> {
        self.adapters.keys().cloned().collect()
    }
}
