// crates/rollout-store-sqlite/src/lib.rs
// ============================================================================
// Module: Rollout SQLite Store
// Description: Durable intent store and idempotency ledger on SQLite WAL.
// Purpose: Keep intent state and connector write effects across process restarts.
// Dependencies: rollout-core, rusqlite, serde, serde_jcs, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! Durable backends for the two storage seams of Rollout Control: the
//! deployment intent store and the connector idempotency ledger. Records are
//! stored as canonical JSON snapshots with SHA-256 integrity hashes; loads
//! verify the hash and fail closed on corruption. One `SQLite` database
//! holds both tables so a connector write and its intent snapshot share
//! the same durability boundary.

pub mod store;

pub use store::SqliteJournalMode;
pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
