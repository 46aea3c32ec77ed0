// crates/flotilla-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Cluster Store
// Description: Durable ClusterStore backed by SQLite WAL.
// Purpose: Persist cluster documents with canonical serialization and hashes.
// Dependencies: flotilla-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`ClusterStore`] using `SQLite`. Every
//! published configuration is appended to a version table as canonical JSON
//! together with its SHA-256 digest; node reports are kept as the latest
//! document per node. Loads verify digests and fail closed on corruption.
//! Database contents are treated as untrusted input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use flotilla_core::ClusterStore;
use flotilla_core::ConfigVersion;
use flotilla_core::Configuration;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::NodeState;
use flotilla_core::StoreError;
use flotilla_core::StoreSnapshot;
use flotilla_core::canonical_json_bytes;
use flotilla_core::digest_bytes;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

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
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum size of a single stored document.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;
/// Label of the digest algorithm recorded next to each document.
const HASH_ALGORITHM: &str = "sha256";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
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
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
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

/// Configuration for the `SQLite` cluster store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `max_versions`, when set, must be greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional number of configuration versions to retain.
    #[serde(default)]
    pub max_versions: Option<u64>,
}

impl SqliteStoreConfig {
    /// Creates a configuration with default pragmas and unlimited retention.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_versions: None,
        }
    }

    /// Validates the configuration without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a limit is out of range or
    /// the path is unusable.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        validate_store_path(&self.path)?;
        if self.max_versions == Some(0) {
            return Err(SqliteStoreError::Invalid(
                "max_versions must be greater than zero".to_string(),
            ));
        }
        Ok(())
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
/// - Error messages avoid embedding raw stored documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or hash mismatch.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or request.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Document exceeded the size limit.
    #[error("sqlite store payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "document exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps a `SQLite` engine error.
fn db_error(err: &rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed cluster store with WAL support.
///
/// # Invariants
/// - Document loads verify stored hashes before deserialization.
/// - Configuration versions are append-only and strictly increasing.
/// - `SQLite` connection access is serialized through a mutex.
#[derive(Debug, Clone)]
pub struct SqliteClusterStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

/// Summary metadata for one stored configuration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationVersionSummary {
    /// Configuration version.
    pub version: ConfigVersion,
    /// Unix milliseconds when the version was saved.
    pub saved_at: i64,
    /// Stored document digest.
    pub document_hash: String,
    /// Stored document length in bytes.
    pub document_bytes: usize,
}

impl SqliteClusterStore {
    /// Opens an `SQLite`-backed cluster store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the configuration is invalid or the
    /// database cannot be opened or initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Lists stored configuration versions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn list_configuration_versions(
        &self,
    ) -> Result<Vec<ConfigurationVersionSummary>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT version, saved_at, document_hash, length(document) FROM configurations \
                 ORDER BY version ASC",
            )
            .map_err(|err| db_error(&err))?;
        let rows = stmt
            .query_map(params![], |row| {
                let version: i64 = row.get(0)?;
                let saved_at: i64 = row.get(1)?;
                let hash: String = row.get(2)?;
                let length: i64 = row.get(3)?;
                Ok((version, saved_at, hash, length))
            })
            .map_err(|err| db_error(&err))?;
        let mut summaries = Vec::new();
        for row in rows {
            let (version, saved_at, document_hash, length) = row.map_err(|err| db_error(&err))?;
            summaries.push(ConfigurationVersionSummary {
                version: version_from_i64(version)?,
                saved_at,
                document_hash,
                document_bytes: usize::try_from(length).map_err(|_| {
                    SqliteStoreError::Corrupt(format!("negative document length at {version}"))
                })?,
            });
        }
        Ok(summaries)
    }

    /// Loads a specific configuration version.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails or the stored
    /// document fails verification.
    pub fn load_configuration_version(
        &self,
        version: ConfigVersion,
    ) -> Result<Option<Configuration>, SqliteStoreError> {
        let stored = version_to_i64(version)?;
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT document, document_hash, hash_algorithm FROM configurations WHERE \
                 version = ?1",
                params![stored],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        drop(guard);
        let Some((bytes, hash, algorithm)) = row else {
            return Ok(None);
        };
        let configuration: Configuration = decode_document(&bytes, &hash, &algorithm, "configuration")?;
        ensure_configuration_key(&configuration, stored)?;
        Ok(Some(configuration))
    }

    /// Deletes all but the newest `keep` configuration versions.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if `keep` is less than 1 or if the database
    /// query fails.
    pub fn prune_versions(&self, keep: u64) -> Result<u64, SqliteStoreError> {
        if keep == 0 {
            return Err(SqliteStoreError::Invalid("keep must be >= 1".to_string()));
        }
        let keep = i64::try_from(keep)
            .map_err(|_| SqliteStoreError::Invalid(format!("keep value out of range: {keep}")))?;
        let guard = self.lock()?;
        let deleted = guard
            .execute(
                "DELETE FROM configurations WHERE version NOT IN (SELECT version FROM \
                 configurations ORDER BY version DESC LIMIT ?1)",
                params![keep],
            )
            .map_err(|err| db_error(&err))?;
        drop(guard);
        u64::try_from(deleted).map_err(|_| {
            SqliteStoreError::Invalid(format!("pruned version count exceeds u64: {deleted}"))
        })
    }

    /// Locks the connection.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }

    /// Loads nodes, the newest configuration, and node reports in one read.
    fn load_snapshot(&self) -> Result<StoreSnapshot, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        let nodes = read_nodes(&tx)?;
        let configuration = read_latest_configuration(&tx)?;
        let node_states = read_node_states(&tx)?;
        let state_revision = read_state_revision(&tx)?;
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(StoreSnapshot {
            nodes,
            configuration,
            node_states,
            state_revision,
        })
    }

    /// Inserts or updates a node row.
    fn upsert_node(&self, node: &Node) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO nodes (node_id, address, registered_at) VALUES (?1, ?2, ?3) ON \
                 CONFLICT(node_id) DO UPDATE SET address = excluded.address",
                params![node.node_id.as_str(), node.address.to_string(), unix_millis()],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    /// Deletes a node row; its report cascades.
    fn delete_node(&self, node_id: &NodeId) -> Result<(), SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .execute("DELETE FROM nodes WHERE node_id = ?1", params![node_id.as_str()])
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    /// Appends a configuration version and enforces retention.
    fn insert_configuration(&self, configuration: &Configuration) -> Result<(), SqliteStoreError> {
        let (document, hash) = encode_document(configuration)?;
        let version = version_to_i64(configuration.version)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        let latest: Option<i64> = tx
            .query_row("SELECT MAX(version) FROM configurations", params![], |row| row.get(0))
            .map_err(|err| db_error(&err))?;
        if let Some(latest) = latest
            && version <= latest
        {
            return Err(SqliteStoreError::Invalid(format!(
                "configuration version {version} is not newer than stored version {latest}"
            )));
        }
        tx.execute(
            "INSERT INTO configurations (version, document, document_hash, hash_algorithm, \
             saved_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![version, document.as_slice(), hash.as_str(), HASH_ALGORITHM, unix_millis()],
        )
        .map_err(|err| db_error(&err))?;
        enforce_retention(&tx, version, self.config.max_versions)?;
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(())
    }

    /// Replaces the stored report for a node and raises the stored revision.
    fn upsert_node_state(&self, state: &NodeState, revision: u64) -> Result<(), SqliteStoreError> {
        let (document, hash) = encode_document(state)?;
        let generation = i64::try_from(state.generation).map_err(|_| {
            SqliteStoreError::Invalid(format!("generation out of range: {}", state.generation))
        })?;
        let revision = i64::try_from(revision).map_err(|_| {
            SqliteStoreError::Invalid(format!("state revision out of range: {revision}"))
        })?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        tx.execute(
            "INSERT INTO node_states (node_id, generation, document, document_hash, \
             hash_algorithm, saved_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT(node_id) \
             DO UPDATE SET generation = excluded.generation, document = excluded.document, \
             document_hash = excluded.document_hash, hash_algorithm = \
             excluded.hash_algorithm, saved_at = excluded.saved_at",
            params![
                state.node_id.as_str(),
                generation,
                document.as_slice(),
                hash.as_str(),
                HASH_ALGORITHM,
                unix_millis()
            ],
        )
        .map_err(|err| {
            if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                SqliteStoreError::Invalid(format!("node {} is not registered", state.node_id))
            } else {
                db_error(&err)
            }
        })?;
        tx.execute(
            "UPDATE store_meta SET state_revision = MAX(state_revision, ?1)",
            params![revision],
        )
        .map_err(|err| db_error(&err))?;
        tx.commit().map_err(|err| db_error(&err))?;
        drop(guard);
        Ok(())
    }
}

impl ClusterStore for SqliteClusterStore {
    fn load(&self) -> Result<StoreSnapshot, StoreError> {
        self.load_snapshot().map_err(StoreError::from)
    }

    fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        self.upsert_node(node).map_err(StoreError::from)
    }

    fn remove_node(&self, node_id: &NodeId) -> Result<(), StoreError> {
        self.delete_node(node_id).map_err(StoreError::from)
    }

    fn save_configuration(&self, configuration: &Configuration) -> Result<(), StoreError> {
        self.insert_configuration(configuration).map_err(StoreError::from)
    }

    fn save_node_state(&self, state: &NodeState, revision: u64) -> Result<(), StoreError> {
        self.upsert_node_state(state, revision).map_err(StoreError::from)
    }
}

// ============================================================================
// SECTION: Readers
// ============================================================================

/// Reads every registered node.
fn read_nodes(tx: &Transaction<'_>) -> Result<BTreeMap<NodeId, Node>, SqliteStoreError> {
    let mut stmt = tx
        .prepare("SELECT node_id, address FROM nodes ORDER BY node_id")
        .map_err(|err| db_error(&err))?;
    let rows = stmt
        .query_map(params![], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| db_error(&err))?;
    let mut nodes = BTreeMap::new();
    for row in rows {
        let (node_id, address) = row.map_err(|err| db_error(&err))?;
        let address: IpAddr = address.parse().map_err(|_| {
            SqliteStoreError::Corrupt(format!("invalid address stored for node {node_id}"))
        })?;
        let node_id = NodeId::new(node_id);
        nodes.insert(node_id.clone(), Node::new(node_id, address));
    }
    Ok(nodes)
}

/// Reads the newest configuration version, if any.
fn read_latest_configuration(
    tx: &Transaction<'_>,
) -> Result<Option<Configuration>, SqliteStoreError> {
    let row = tx
        .query_row(
            "SELECT version, document, document_hash, hash_algorithm FROM configurations ORDER \
             BY version DESC LIMIT 1",
            params![],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    let Some((version, bytes, hash, algorithm)) = row else {
        return Ok(None);
    };
    let configuration: Configuration = decode_document(&bytes, &hash, &algorithm, "configuration")?;
    ensure_configuration_key(&configuration, version)?;
    Ok(Some(configuration))
}

/// Reads the highest recorded state revision.
fn read_state_revision(tx: &Transaction<'_>) -> Result<u64, SqliteStoreError> {
    let revision: i64 = tx
        .query_row("SELECT state_revision FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .map_err(|err| db_error(&err))?;
    u64::try_from(revision)
        .map_err(|_| SqliteStoreError::Corrupt(format!("negative state revision: {revision}")))
}

/// Reads the latest report of every node.
fn read_node_states(
    tx: &Transaction<'_>,
) -> Result<BTreeMap<NodeId, NodeState>, SqliteStoreError> {
    let mut stmt = tx
        .prepare(
            "SELECT node_id, generation, document, document_hash, hash_algorithm FROM \
             node_states ORDER BY node_id",
        )
        .map_err(|err| db_error(&err))?;
    let rows = stmt
        .query_map(params![], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(|err| db_error(&err))?;
    let mut states = BTreeMap::new();
    for row in rows {
        let (node_id, generation, bytes, hash, algorithm) = row.map_err(|err| db_error(&err))?;
        let state: NodeState = decode_document(&bytes, &hash, &algorithm, "node state")?;
        if state.node_id.as_str() != node_id {
            return Err(SqliteStoreError::Invalid(
                "node_id mismatch between key and payload".to_string(),
            ));
        }
        if i64::try_from(state.generation).ok() != Some(generation) {
            return Err(SqliteStoreError::Invalid(format!(
                "generation mismatch between key and payload for node {node_id}"
            )));
        }
        states.insert(state.node_id.clone(), state);
    }
    Ok(states)
}

// ============================================================================
// SECTION: Documents
// ============================================================================

/// Serializes a document canonically and returns it with its digest.
fn encode_document<T: Serialize>(value: &T) -> Result<(Vec<u8>, String), SqliteStoreError> {
    let bytes =
        canonical_json_bytes(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_DOCUMENT_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    let hash = digest_bytes(&bytes).as_str().to_string();
    Ok((bytes, hash))
}

/// Verifies a stored document against its digest and deserializes it.
fn decode_document<T: DeserializeOwned>(
    bytes: &[u8],
    hash: &str,
    algorithm: &str,
    label: &str,
) -> Result<T, SqliteStoreError> {
    if algorithm != HASH_ALGORITHM {
        return Err(SqliteStoreError::Invalid(format!("unsupported hash algorithm: {algorithm}")));
    }
    if bytes.len() > MAX_DOCUMENT_BYTES {
        return Err(SqliteStoreError::TooLarge {
            max_bytes: MAX_DOCUMENT_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    if digest_bytes(bytes).as_str() != hash {
        return Err(SqliteStoreError::Corrupt(format!("hash mismatch for stored {label}")));
    }
    serde_json::from_slice(bytes).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Checks that a configuration row's key matches its payload.
fn ensure_configuration_key(
    configuration: &Configuration,
    stored: i64,
) -> Result<(), SqliteStoreError> {
    if version_to_i64(configuration.version)? != stored {
        return Err(SqliteStoreError::Invalid(
            "version mismatch between key and payload".to_string(),
        ));
    }
    Ok(())
}

/// Converts a configuration version to its column value.
fn version_to_i64(version: ConfigVersion) -> Result<i64, SqliteStoreError> {
    i64::try_from(version.get())
        .map_err(|_| SqliteStoreError::Invalid(format!("configuration version out of range: {version}")))
}

/// Converts a column value back to a configuration version.
fn version_from_i64(value: i64) -> Result<ConfigVersion, SqliteStoreError> {
    u64::try_from(value)
        .map(ConfigVersion::new)
        .map_err(|_| SqliteStoreError::Corrupt(format!("negative configuration version: {value}")))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| db_error(&err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| db_error(&err))?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
            version INTEGER NOT NULL,
            state_revision INTEGER NOT NULL DEFAULT 0
        );",
    )
        .map_err(|err| db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS nodes (
                    node_id TEXT NOT NULL PRIMARY KEY,
                    address TEXT NOT NULL,
                    registered_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS configurations (
                    version INTEGER NOT NULL PRIMARY KEY,
                    document BLOB NOT NULL,
                    document_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS node_states (
                    node_id TEXT NOT NULL PRIMARY KEY,
                    generation INTEGER NOT NULL,
                    document BLOB NOT NULL,
                    document_hash TEXT NOT NULL,
                    hash_algorithm TEXT NOT NULL,
                    saved_at INTEGER NOT NULL,
                    FOREIGN KEY (node_id) REFERENCES nodes(node_id) ON DELETE CASCADE
                );",
            )
            .map_err(|err| db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_error(&err))?;
    Ok(())
}

/// Enforces version retention if configured.
fn enforce_retention(
    tx: &Transaction<'_>,
    latest_version: i64,
    max_versions: Option<u64>,
) -> Result<(), SqliteStoreError> {
    let Some(max_versions) = max_versions else {
        return Ok(());
    };
    if max_versions == 0 {
        return Err(SqliteStoreError::Invalid(
            "max_versions must be greater than zero".to_string(),
        ));
    }
    let max_versions = i64::try_from(max_versions)
        .map_err(|_| SqliteStoreError::Invalid("max_versions too large".to_string()))?;
    if latest_version >= max_versions {
        let min_version = latest_version - max_versions + 1;
        tx.execute("DELETE FROM configurations WHERE version < ?1", params![min_version])
            .map_err(|err| db_error(&err))?;
    }
    Ok(())
}

/// Returns the current unix epoch in milliseconds.
fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
