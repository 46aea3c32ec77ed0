// crates/flotilla-server/src/server.rs
// ============================================================================
// Module: Control Server
// Description: Builds the control service from config and serves it over HTTP.
// Purpose: Own the service lifecycle from store selection to shutdown.
// Dependencies: flotilla-config, flotilla-core, flotilla-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! [`ControlServer::from_config`] selects the cluster store and audit sink
//! named by the configuration, opens the [`ControlService`] over them, and
//! [`ControlServer::serve_on`] runs the `/v1` API until the shutdown future
//! resolves. Shutdown closes the service first so that parked long-polls
//! return immediately instead of holding graceful shutdown open.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use flotilla_config::AuditConfig;
use flotilla_config::FlotillaConfig;
use flotilla_config::ServerConfig;
use flotilla_config::StoreConfig;
use flotilla_config::StoreType;
use flotilla_core::AuditSink;
use flotilla_core::Clock;
use flotilla_core::ClusterStore;
use flotilla_core::ControlService;
use flotilla_core::InMemoryClusterStore;
use flotilla_core::SystemClock;
use flotilla_core::runtime::FileAuditSink;
use flotilla_core::runtime::NoopAuditSink;
use flotilla_core::runtime::StderrAuditSink;
use flotilla_store_sqlite::SqliteClusterStore;
use tokio::net::TcpListener;

use crate::api::ApiState;
use crate::api::router;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Control server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Control Server
// ============================================================================

/// HTTP front end for a [`ControlService`].
pub struct ControlServer {
    /// Shared control service.
    service: Arc<ControlService>,
    /// HTTP settings.
    settings: ServerConfig,
}

impl ControlServer {
    /// Builds the server from configuration using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the configuration is invalid or the store
    /// or audit log cannot be opened.
    pub fn from_config(config: &FlotillaConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let store = build_cluster_store(&config.store)?;
        let audit = build_audit_sink(&config.audit)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = ControlService::open(store, clock, audit)
            .map_err(|err| ServerError::Init(err.to_string()))?;
        Ok(Self::new(Arc::new(service), config.server.clone()))
    }

    /// Wraps an already opened service.
    #[must_use]
    pub const fn new(service: Arc<ControlService>, settings: ServerConfig) -> Self {
        Self {
            service,
            settings,
        }
    }

    /// Returns the shared control service.
    #[must_use]
    pub fn service(&self) -> Arc<ControlService> {
        Arc::clone(&self.service)
    }

    /// Returns the `/v1` router bound to this server's service.
    #[must_use]
    pub fn router(&self) -> Router {
        router(ApiState {
            service: Arc::clone(&self.service),
            max_body_bytes: self.settings.max_body_bytes,
            max_wait: self.settings.max_wait(),
        })
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the address is invalid or cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr: SocketAddr =
            self.settings.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        TcpListener::bind(addr)
            .await
            .map_err(|err| ServerError::Transport(format!("http bind failed: {err}")))
    }

    /// Serves the API on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when the server fails.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let service = Arc::clone(&self.service);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                service.shutdown();
            })
            .await
            .map_err(|err| ServerError::Transport(format!("http server failed: {err}")))
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

/// Builds the cluster store named by `config`.
///
/// # Errors
///
/// Returns [`ServerError`] when the sqlite store cannot be opened.
pub fn build_cluster_store(config: &StoreConfig) -> Result<Arc<dyn ClusterStore>, ServerError> {
    match config.store_type {
        StoreType::Memory => Ok(Arc::new(InMemoryClusterStore::new())),
        StoreType::Sqlite => {
            let sqlite = config.sqlite().ok_or_else(|| {
                ServerError::Config("sqlite store requires path".to_string())
            })?;
            let store =
                SqliteClusterStore::new(sqlite).map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Builds the audit sink named by `config`.
///
/// # Errors
///
/// Returns [`ServerError::Init`] when the audit log cannot be opened.
pub fn build_audit_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    if !config.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &config.path {
        Some(path) => {
            let sink = FileAuditSink::new(Path::new(path.trim()))
                .map_err(|err| ServerError::Init(format!("audit log: {err}")))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(StderrAuditSink)),
    }
}
