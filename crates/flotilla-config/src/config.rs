// crates/flotilla-config/src/config.rs
// ============================================================================
// Module: Flotilla Configuration
// Description: Configuration loading and validation for Flotilla.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: flotilla-core, flotilla-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The path comes from the caller, then the `FLOTILLA_CONFIG` environment
//! variable, then `flotilla.toml` in the working directory. Every section has
//! defaults, so an empty file describes a loopback control service with an
//! in-memory store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use flotilla_core::ImageRef;
use flotilla_core::MAX_IDENTIFIER_LENGTH;
use flotilla_core::NodeId;
use flotilla_store_sqlite::SqliteStoreConfig;
use flotilla_store_sqlite::SqliteStoreMode;
use flotilla_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "flotilla.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "FLOTILLA_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default control service bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:4523";
/// Default maximum request body size.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Upper bound for the request body size limit.
const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Default cap on long-poll waits.
const DEFAULT_MAX_WAIT_MS: u64 = 60_000;
/// Upper bound for the long-poll cap.
const MAX_MAX_WAIT_MS: u64 = 300_000;
/// Default agent tick interval.
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
/// Minimum agent tick interval.
const MIN_TICK_INTERVAL_MS: u64 = 10;
/// Maximum agent tick interval.
const MAX_TICK_INTERVAL_MS: u64 = 3_600_000;
/// Default HTTP request timeout for agents and clients.
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 90_000;
/// Maximum HTTP request timeout.
const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;
/// Default store busy timeout.
const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default probe image.
const DEFAULT_PROBE_IMAGE: &str = "busybox";
/// Default probe timeout.
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 60_000;
/// Maximum probe timeout.
const MAX_PROBE_TIMEOUT_MS: u64 = 3_600_000;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Flotilla configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlotillaConfig {
    /// Control service HTTP configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Audit logging configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Cluster store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Node agent configuration; required only by `flotilla agent`.
    #[serde(default)]
    pub agent: Option<AgentConfig>,
    /// Probe defaults used by `flotilla probe`.
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl FlotillaConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.audit.validate()?;
        self.store.validate()?;
        if let Some(agent) = &self.agent {
            agent.validate()?;
        }
        self.probe.validate()
    }

    /// Returns the agent section or an error naming what is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when no `[agent]` section exists.
    pub fn require_agent(&self) -> Result<&AgentConfig, ConfigError> {
        self.agent
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("missing [agent] section".to_string()))
    }
}

/// Control service HTTP configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Cap applied to long-poll `timeout_ms` parameters.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `bind` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.bind is invalid: {}", self.bind)))
    }

    /// Returns the long-poll cap.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes out of range: {} (max {MAX_MAX_BODY_BYTES})",
                self.max_body_bytes
            )));
        }
        if self.max_wait_ms == 0 || self.max_wait_ms > MAX_MAX_WAIT_MS {
            return Err(ConfigError::Invalid(format!(
                "server.max_wait_ms out of range: {} (max {MAX_MAX_WAIT_MS})",
                self.max_wait_ms
            )));
        }
        Ok(())
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Enable structured audit logging.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Optional audit log path (JSON lines); stderr when unset.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: None,
        }
    }
}

impl AuditConfig {
    /// Validates audit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.path {
            validate_path_string("audit.path", path)?;
        }
        Ok(())
    }
}

/// Cluster store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Cluster store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Optional number of configuration versions to retain.
    #[serde(default)]
    pub max_versions: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_versions: None,
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` settings when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite(&self) -> Option<SqliteStoreConfig> {
        match self.store_type {
            StoreType::Memory => None,
            StoreType::Sqlite => self.path.as_ref().map(|path| SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
                max_versions: self.max_versions,
            }),
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .ok_or_else(|| ConfigError::Invalid("sqlite store requires path".to_string()))?;
                validate_path_string("store.path", &path.to_string_lossy())?;
                if self.max_versions == Some(0) {
                    return Err(ConfigError::Invalid(
                        "store max_versions must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Node backend driven by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRuntimeKind {
    /// In-memory simulated node.
    #[default]
    Simulated,
}

/// Node agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Node identifier the agent registers as.
    pub node_id: String,
    /// Address registered for the node.
    pub address: String,
    /// Control service base URL (`http://host:port`).
    pub control_url: String,
    /// Interval between reconciliation cycles.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// HTTP request timeout; must exceed the server's long-poll cap.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Node backend.
    #[serde(default)]
    pub runtime: AgentRuntimeKind,
}

impl AgentConfig {
    /// Returns the typed node identifier.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id.clone())
    }

    /// Returns the parsed node address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `address` is not an IP address.
    pub fn address(&self) -> Result<IpAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("agent.address is invalid: {}", self.address)))
    }

    /// Returns the tick interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Returns the HTTP request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validates agent configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("agent.node_id", &self.node_id)?;
        self.address()?;
        validate_control_url("agent.control_url", &self.control_url)?;
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.tick_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "agent.tick_interval_ms out of range: {} ({MIN_TICK_INTERVAL_MS}..={MAX_TICK_INTERVAL_MS})",
                self.tick_interval_ms
            )));
        }
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "agent.request_timeout_ms out of range: {} (max {MAX_REQUEST_TIMEOUT_MS})",
                self.request_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Probe defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Image the probe container runs.
    #[serde(default = "default_probe_image")]
    pub image: String,
    /// Time a probe waits for convergence.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    /// Pull the image with a throwaway container before measuring.
    #[serde(default)]
    pub prefetch_image: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            image: default_probe_image(),
            timeout_ms: default_probe_timeout_ms(),
            prefetch_image: false,
        }
    }
}

impl ProbeConfig {
    /// Returns the typed image reference.
    #[must_use]
    pub fn image(&self) -> ImageRef {
        ImageRef::new(self.image.clone())
    }

    /// Returns the probe timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validates probe configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.image.is_empty()
            || self.image.len() > MAX_IDENTIFIER_LENGTH
            || self.image.chars().any(|ch| ch.is_whitespace() || ch.is_control())
        {
            return Err(ConfigError::Invalid("probe.image must be a single token".to_string()));
        }
        if self.timeout_ms == 0 || self.timeout_ms > MAX_PROBE_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "probe.timeout_ms out of range: {} (max {MAX_PROBE_TIMEOUT_MS})",
                self.timeout_ms
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an identifier with the same rules the control service applies.
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds {MAX_IDENTIFIER_LENGTH} bytes")));
    }
    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control() || ch == '/') {
        return Err(ConfigError::Invalid(format!(
            "{field} must not contain whitespace, control characters, or '/'"
        )));
    }
    Ok(())
}

/// Validates a plain-HTTP control service URL.
fn validate_control_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let Some(rest) = value.strip_prefix("http://") else {
        return Err(ConfigError::Invalid(format!("{field} must start with http://")));
    };
    let authority = rest.trim_end_matches('/');
    if authority.is_empty() || authority.contains('/') || authority.chars().any(char::is_whitespace)
    {
        return Err(ConfigError::Invalid(format!("{field} must be http://host:port")));
    }
    Ok(())
}

/// Returns the default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Returns the default maximum request body size.
const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

/// Returns the default long-poll cap.
const fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}

/// Returns the default audit toggle.
const fn default_audit_enabled() -> bool {
    true
}

/// Returns the default store busy timeout.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Returns the default agent tick interval.
const fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

/// Returns the default HTTP request timeout.
const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Returns the default probe image.
fn default_probe_image() -> String {
    DEFAULT_PROBE_IMAGE.to_string()
}

/// Returns the default probe timeout.
const fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}
