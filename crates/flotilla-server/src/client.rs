// crates/flotilla-server/src/client.rs
// ============================================================================
// Module: HTTP Control Client
// Description: ControlClient implementation speaking the /v1 HTTP API.
// Purpose: Let remote agents and clients use the control service.
// Dependencies: flotilla-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`HttpControlClient`] maps each [`ControlClient`] call onto one request.
//! Structured error bodies are decoded back into [`ControlError`] so callers
//! can match on conflicts and empty-cluster rejections exactly as they would
//! with the in-process client. Long-poll requests get their own timeout,
//! slightly longer than the wait they ask for.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flotilla_core::ClientError;
use flotilla_core::ClusterState;
use flotilla_core::ConfigVersion;
use flotilla_core::Configuration;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ControlClient;
use flotilla_core::ControlError;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::NodeState;
use flotilla_core::ReportOutcome;
use reqwest::Response;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::api::ErrorBody;
use crate::api::ErrorEnvelope;
use crate::api::RemovedResponse;
use crate::api::VersionResponse;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default timeout for non-waiting requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to long-poll requests beyond the wait itself.
const WAIT_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Client
// ============================================================================

/// [`ControlClient`] over HTTP.
#[derive(Clone)]
pub struct HttpControlClient {
    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:4523`.
    base_url: String,
    /// Shared HTTP client.
    http: reqwest::Client,
    /// Timeout for non-waiting requests.
    request_timeout: Duration,
}

impl HttpControlClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the HTTP client cannot be
    /// built or the URL is not plain HTTP.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") {
            return Err(ClientError::Transport(format!(
                "control url must start with http://: {base_url}"
            )));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        Ok(Self {
            base_url,
            http,
            request_timeout,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Removes a node from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    pub async fn deregister_node(&self, node_id: &NodeId) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/nodes/{node_id}")))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport)?;
        let _removed: RemovedResponse = decode(response).await?;
        Ok(())
    }

    /// Builds an absolute URL for `path`.
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a GET and decodes the JSON response.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    /// Sends a JSON POST and decodes the JSON response.
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    /// Sends a long-poll GET; `204 No Content` means the wait timed out.
    async fn wait_json<T: DeserializeOwned>(
        &self,
        path: &str,
        after: u64,
        timeout: Duration,
    ) -> Result<Option<T>, ClientError> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let response = self
            .http
            .get(self.url(&format!("{path}?after={after}&timeout_ms={millis}")))
            .timeout(timeout.saturating_add(WAIT_GRACE))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }
}

#[async_trait]
impl ControlClient for HttpControlClient {
    async fn nodes(&self) -> Result<Vec<Node>, ClientError> {
        self.get_json("/v1/nodes").await
    }

    async fn register_node(&self, node: Node) -> Result<(), ClientError> {
        let _registered: Node = self.post_json("/v1/nodes", &node).await?;
        Ok(())
    }

    async fn current_configuration(&self) -> Result<Arc<Configuration>, ClientError> {
        self.get_json::<Configuration>("/v1/configuration").await.map(Arc::new)
    }

    async fn propose(&self, delta: ConfigurationDelta) -> Result<ConfigVersion, ClientError> {
        let response: VersionResponse = self.post_json("/v1/configuration", &delta).await?;
        Ok(response.version)
    }

    async fn report_state(&self, state: NodeState) -> Result<ReportOutcome, ClientError> {
        self.post_json("/v1/state", &state).await
    }

    async fn current_state(&self) -> Result<ClusterState, ClientError> {
        self.get_json("/v1/state").await
    }

    async fn wait_for_configuration(
        &self,
        after: ConfigVersion,
        timeout: Duration,
    ) -> Result<Option<Arc<Configuration>>, ClientError> {
        let configuration: Option<Configuration> =
            self.wait_json("/v1/configuration/wait", after.get(), timeout).await?;
        Ok(configuration.map(Arc::new))
    }

    async fn wait_for_state(
        &self,
        after_revision: u64,
        timeout: Duration,
    ) -> Result<Option<ClusterState>, ClientError> {
        self.wait_json("/v1/state/wait", after_revision, timeout).await
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a reqwest failure to a transport error.
fn transport(err: reqwest::Error) -> ClientError {
    ClientError::Transport(err.to_string())
}

/// Decodes a success body, or the structured error on failure.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport)?;
    if status.is_success() {
        return serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()));
    }
    let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).map_err(|_| {
        ClientError::Transport(format!(
            "unexpected status {status}: {}",
            String::from_utf8_lossy(&bytes)
        ))
    })?;
    Err(ClientError::Control(control_error(envelope.error)))
}

/// Rebuilds a [`ControlError`] from its wire form.
#[must_use]
pub fn control_error(body: ErrorBody) -> ControlError {
    match body.kind.as_str() {
        "empty_cluster" => ControlError::EmptyCluster,
        "conflict" => ControlError::Conflict {
            expected: body.expected.unwrap_or_default(),
            actual: body.actual.unwrap_or_default(),
        },
        "timeout" => ControlError::Timeout(Box::new(body.report.unwrap_or_default())),
        "store" => ControlError::Store(strip_label(body.message, "store error: ")),
        "closed" => ControlError::Closed,
        _ => ControlError::Validation(strip_label(body.message, "validation failed: ")),
    }
}

/// Removes the display prefix the server added to a message.
fn strip_label(message: String, label: &str) -> String {
    match message.strip_prefix(label) {
        Some(rest) => rest.to_string(),
        None => message,
    }
}
