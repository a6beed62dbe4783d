// crates/rollout-gateway/src/lib.rs
// ============================================================================
// Module: Rollout Gateway
// Description: Connector gateway, adapter registry, breaker, and retry stack.
// Purpose: Provide the single idempotent path between the core and execution planes.
// Dependencies: rollout-core, rand, serde, serde_jcs, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! This crate implements the connector layer of Rollout Control: the
//! adapter registry with access policy, deterministic idempotency keys and
//! ledger backends, per-adapter circuit breakers, the bounded retry policy
//! for transient failures, and the [`ConnectorGateway`] façade tying them
//! together. The rest of the system talks to execution planes exclusively
//! through this crate.

pub mod breaker;
pub mod gateway;
pub mod idempotency;
pub mod registry;
pub mod retry;

pub use breaker::BreakerConfig;
pub use breaker::CircuitBreaker;
pub use breaker::CircuitState;
pub use breaker::MonotonicClock;
pub use breaker::SystemMonotonicClock;
pub use gateway::CancellationToken;
pub use gateway::ConnectorGateway;
pub use gateway::GatewayConfig;
pub use gateway::GatewayError;
pub use idempotency::InMemoryLedger;
pub use idempotency::KeyError;
pub use idempotency::derive_key;
pub use registry::AdapterAccessPolicy;
pub use registry::AdapterRegistry;
pub use registry::RegistryError;
pub use retry::JitterSource;
pub use retry::RandomJitter;
pub use retry::RetryPolicy;
pub use retry::RetrySleeper;
pub use retry::ThreadSleeper;
