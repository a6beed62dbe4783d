// crates/rollout-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: Intent store and idempotency ledger backed by SQLite WAL.
// Purpose: Persist snapshots with deterministic serialization and hash checks.
// Dependencies: rollout-core, rusqlite, serde, serde_jcs, sha2, thiserror
// ============================================================================

//! ## Overview
//! Every record is serialized to RFC 8785 canonical JSON and stored next to
//! its SHA-256 hash. Loads recompute the hash before deserializing and fail
//! closed on any mismatch. The idempotency ledger's check-and-set runs
//! inside a `SQLite` transaction, which is what makes the gateway's
//! at-most-one-logical-effect guarantee hold across concurrent writers and
//! process restarts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use rollout_core::ConnectorOperation;
use rollout_core::DeploymentIntent;
use rollout_core::ErrorClassification;
use rollout_core::IdempotencyKey;
use rollout_core::IdempotencyLedger;
use rollout_core::IntentId;
use rollout_core::IntentStore;
use rollout_core::LedgerDecision;
use rollout_core::LedgerError;
use rollout_core::OperationPhase;
use rollout_core::PublishReceipt;
use rollout_core::StoreError;
use rollout_core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;

/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4_096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` store.
///
/// # Invariants
/// - `path` must resolve to a file path, not a directory.
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a WAL-mode config for the given database path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The configured database path is invalid.
    #[error("invalid database path: {0}")]
    InvalidPath(String),
    /// Underlying database error.
    #[error("sqlite error: {0}")]
    Db(String),
    /// Stored data failed the integrity check.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Record serialization failure.
    #[error("serialization failure: {0}")]
    Serialize(String),
    /// The connection lock is poisoned.
    #[error("store connection lock poisoned")]
    Poisoned,
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::Serialize(message) => Self::Invalid(message),
            SqliteStoreError::InvalidPath(message) | SqliteStoreError::Db(message) => {
                Self::Io(message)
            }
            SqliteStoreError::Poisoned => Self::Store("store connection lock poisoned".into()),
        }
    }
}

impl From<SqliteStoreError> for LedgerError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::Serialize(message) => Self::Ledger(message),
            SqliteStoreError::InvalidPath(message) | SqliteStoreError::Db(message) => {
                Self::Io(message)
            }
            SqliteStoreError::Poisoned => Self::Ledger("store connection lock poisoned".into()),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable intent store and idempotency ledger on one `SQLite` database.
///
/// # Invariants
/// - Loads verify stored hashes before deserialization and fail closed.
/// - Connection access is serialized through a mutex; ledger check-and-set
///   runs inside a transaction.
pub struct SqliteStore {
    /// Shared connection guarded by a mutex.
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database and initializes the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] on invalid paths, open failures, or
    /// schema initialization failures.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_path(&config.path)?;
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
        apply_pragmas(&connection, config)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Runs a closure over the locked connection.
    fn with_connection<T, E>(
        &self,
        operation: impl FnOnce(&mut Connection) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<SqliteStoreError>,
    {
        let mut guard =
            self.connection.lock().map_err(|_| E::from(SqliteStoreError::Poisoned))?;
        operation(&mut guard)
    }
}

/// Rejects over-long database paths and path components.
fn validate_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::InvalidPath("database path exceeds max length".into()));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::InvalidPath("database path component too long".into()));
        }
    }
    Ok(())
}

/// Applies journal, sync, and timeout pragmas.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .pragma_update(None, "busy_timeout", i64::try_from(config.busy_timeout_ms).unwrap_or(i64::MAX))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .pragma_update(None, "foreign_keys", "on")
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    Ok(())
}

/// Creates the schema and stamps the schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS intents (
                intent_id TEXT PRIMARY KEY,
                application_id TEXT NOT NULL,
                status_kind TEXT NOT NULL,
                terminal INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                snapshot_json TEXT NOT NULL,
                snapshot_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_intents_terminal
                ON intents (terminal, updated_at);
            CREATE TABLE IF NOT EXISTS connector_operations (
                op_key TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                record_json TEXT NOT NULL,
                record_hash TEXT NOT NULL
            );",
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Snapshots
// ============================================================================

/// Serializes a record to canonical JSON plus its SHA-256 hex hash.
fn encode_snapshot<T: Serialize>(record: &T) -> Result<(String, String), SqliteStoreError> {
    let canonical =
        serde_jcs::to_string(record).map_err(|error| SqliteStoreError::Serialize(error.to_string()))?;
    let hash = hex_digest(canonical.as_bytes());
    Ok((canonical, hash))
}

/// Verifies the stored hash and deserializes the snapshot.
fn decode_snapshot<T: DeserializeOwned>(
    json: &str,
    stored_hash: &str,
    context: &str,
) -> Result<T, SqliteStoreError> {
    let actual = hex_digest(json.as_bytes());
    if actual != stored_hash {
        return Err(SqliteStoreError::Corrupt(format!("{context}: hash mismatch")));
    }
    serde_json::from_str(json)
        .map_err(|error| SqliteStoreError::Corrupt(format!("{context}: {error}")))
}

/// Returns the lowercase hex SHA-256 of the bytes.
fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Infallible for String targets.
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

// ============================================================================
// SECTION: Intent Store Impl
// ============================================================================

impl IntentStore for SqliteStore {
    fn load(&self, intent_id: &IntentId) -> Result<Option<DeploymentIntent>, StoreError> {
        let row = self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT snapshot_json, snapshot_hash FROM intents WHERE intent_id = ?1",
                    params![intent_id.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))
        })?;
        match row {
            None => Ok(None),
            Some((json, hash)) => {
                let intent = decode_snapshot(&json, &hash, "intent snapshot")?;
                Ok(Some(intent))
            }
        }
    }

    fn save(&self, intent: &DeploymentIntent) -> Result<(), StoreError> {
        let (json, hash) = encode_snapshot(intent)?;
        let terminal = i64::from(intent.status.is_terminal());
        self.with_connection(|connection| -> Result<(), StoreError> {
            connection
                .execute(
                    "INSERT INTO intents
                        (intent_id, application_id, status_kind, terminal, updated_at,
                         snapshot_json, snapshot_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(intent_id) DO UPDATE SET
                        application_id = excluded.application_id,
                        status_kind = excluded.status_kind,
                        terminal = excluded.terminal,
                        updated_at = excluded.updated_at,
                        snapshot_json = excluded.snapshot_json,
                        snapshot_hash = excluded.snapshot_hash",
                    params![
                        intent.intent_id.as_str(),
                        intent.application_id.as_str(),
                        intent.status.kind_name(),
                        terminal,
                        intent.updated_at.as_unix_millis(),
                        json,
                        hash,
                    ],
                )
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        })?;
        Ok(())
    }

    fn list_active(&self) -> Result<Vec<DeploymentIntent>, StoreError> {
        let rows = self.with_connection(|connection| -> Result<Vec<(String, String)>, StoreError> {
            let mut statement = connection
                .prepare(
                    "SELECT snapshot_json, snapshot_hash FROM intents
                     WHERE terminal = 0 ORDER BY intent_id",
                )
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let rows = statement
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(rows)
        })?;
        decode_intent_rows(rows)
    }

    fn list_completed_since(&self, cutoff: Timestamp) -> Result<Vec<DeploymentIntent>, StoreError> {
        let rows = self.with_connection(|connection| -> Result<Vec<(String, String)>, StoreError> {
            let mut statement = connection
                .prepare(
                    "SELECT snapshot_json, snapshot_hash FROM intents
                     WHERE terminal = 1 AND updated_at >= ?1 ORDER BY intent_id",
                )
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let rows = statement
                .query_map(params![cutoff.as_unix_millis()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(rows)
        })?;
        decode_intent_rows(rows)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.with_connection(|connection| -> Result<(), StoreError> {
            connection
                .query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        })?;
        Ok(())
    }
}

/// Decodes a batch of intent snapshot rows, failing closed on corruption.
fn decode_intent_rows(rows: Vec<(String, String)>) -> Result<Vec<DeploymentIntent>, StoreError> {
    let mut intents = Vec::with_capacity(rows.len());
    for (json, hash) in rows {
        intents.push(decode_snapshot(&json, &hash, "intent snapshot")?);
    }
    Ok(intents)
}

// ============================================================================
// SECTION: Idempotency Ledger Impl
// ============================================================================

/// Returns the stable phase label stored in the phase column.
const fn phase_label(phase: OperationPhase) -> &'static str {
    match phase {
        OperationPhase::InFlight => "in_flight",
        OperationPhase::Completed => "completed",
        OperationPhase::Superseded => "superseded",
    }
}

/// Writes an operation record inside the given connection context.
fn upsert_operation(
    connection: &Connection,
    operation: &ConnectorOperation,
) -> Result<(), SqliteStoreError> {
    let (json, hash) = encode_snapshot(operation)?;
    connection
        .execute(
            "INSERT INTO connector_operations
                (op_key, phase, recorded_at, record_json, record_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(op_key) DO UPDATE SET
                phase = excluded.phase,
                recorded_at = excluded.recorded_at,
                record_json = excluded.record_json,
                record_hash = excluded.record_hash",
            params![
                operation.key.as_str(),
                phase_label(operation.phase),
                operation.recorded_at.as_unix_millis(),
                json,
                hash,
            ],
        )
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    Ok(())
}

/// Reads an operation record inside the given connection context.
fn select_operation(
    connection: &Connection,
    key: &IdempotencyKey,
) -> Result<Option<ConnectorOperation>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT record_json, record_hash FROM connector_operations WHERE op_key = ?1",
            params![key.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    match row {
        None => Ok(None),
        Some((json, hash)) => {
            let operation = decode_snapshot(&json, &hash, "connector operation")?;
            Ok(Some(operation))
        }
    }
}

impl IdempotencyLedger for SqliteStore {
    fn begin(&self, operation: ConnectorOperation) -> Result<LedgerDecision, LedgerError> {
        let decision = self.with_connection(|connection| -> Result<LedgerDecision, LedgerError> {
            let tx = connection
                .transaction()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let existing = select_operation(&tx, &operation.key)?;
            let decision = match existing {
                Some(prior) if prior.phase == OperationPhase::Completed => {
                    LedgerDecision::AlreadyCompleted(prior)
                }
                Some(prior) if prior.phase == OperationPhase::InFlight => {
                    LedgerDecision::InFlight(prior)
                }
                // Superseded records no longer guard the key.
                _ => {
                    upsert_operation(&tx, &operation)?;
                    LedgerDecision::Fresh
                }
            };
            tx.commit().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(decision)
        })?;
        Ok(decision)
    }

    fn complete(
        &self,
        key: &IdempotencyKey,
        receipt: PublishReceipt,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError> {
        self.with_connection(|connection| {
            let tx = connection
                .transaction()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let Some(mut operation) = select_operation(&tx, key)? else {
                return Err(LedgerError::MissingRecord(key.clone()));
            };
            if operation.phase != OperationPhase::InFlight {
                return Err(LedgerError::MissingRecord(key.clone()));
            }
            operation.phase = OperationPhase::Completed;
            operation.receipt = Some(receipt);
            operation.attempts = attempts;
            operation.last_classification = None;
            operation.recorded_at = recorded_at;
            upsert_operation(&tx, &operation)?;
            tx.commit().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        })?;
        Ok(())
    }

    fn abandon(
        &self,
        key: &IdempotencyKey,
        classification: Option<ErrorClassification>,
        attempts: u32,
        recorded_at: Timestamp,
    ) -> Result<(), LedgerError> {
        self.with_connection(|connection| {
            let tx = connection
                .transaction()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let Some(mut operation) = select_operation(&tx, key)? else {
                return Err(LedgerError::MissingRecord(key.clone()));
            };
            if operation.phase != OperationPhase::InFlight {
                return Err(LedgerError::MissingRecord(key.clone()));
            }
            operation.phase = OperationPhase::Superseded;
            operation.last_classification = classification;
            operation.attempts = attempts;
            operation.recorded_at = recorded_at;
            upsert_operation(&tx, &operation)?;
            tx.commit().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        })?;
        Ok(())
    }

    fn supersede(&self, key: &IdempotencyKey, recorded_at: Timestamp) -> Result<(), LedgerError> {
        self.with_connection(|connection| {
            let tx = connection
                .transaction()
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            let Some(mut operation) = select_operation(&tx, key)? else {
                return Err(LedgerError::MissingRecord(key.clone()));
            };
            operation.phase = OperationPhase::Superseded;
            operation.recorded_at = recorded_at;
            upsert_operation(&tx, &operation)?;
            tx.commit().map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, key: &IdempotencyKey) -> Result<Option<ConnectorOperation>, LedgerError> {
        let operation =
            self.with_connection(|connection| select_operation(connection, key))?;
        Ok(operation)
    }
}
