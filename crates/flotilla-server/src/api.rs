// crates/flotilla-server/src/api.rs
// ============================================================================
// Module: Control Service HTTP API
// Description: axum routes, wire types, and error mapping for /v1.
// Purpose: Expose the state synchronization protocol over HTTP/JSON.
// Dependencies: flotilla-core, axum, serde
// ============================================================================

//! ## Overview
//! Every route delegates to a shared [`ControlService`]. Request bodies are
//! read as raw bytes, checked against the configured size limit, and decoded
//! as JSON; failures become structured errors of the form
//! `{ "error": { "kind", "message", ... } }`.
//!
//! Long-poll routes accept `after` and `timeout_ms` query parameters. The
//! timeout is capped at the server's `max_wait`; when it elapses with nothing
//! new the route answers `204 No Content`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::extract::rejection::PathRejection;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use flotilla_core::ConfigVersion;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ControlError;
use flotilla_core::ControlService;
use flotilla_core::ConvergenceReport;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::NodeState;
use flotilla_core::runtime::error_kind;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error kind for malformed requests.
pub const INVALID_REQUEST: &str = "invalid_request";

/// Error kind for oversized request bodies.
pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Structured error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind.
    pub kind: String,
    /// Human readable message.
    pub message: String,
    /// Version the rejected delta was based on (conflicts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ConfigVersion>,
    /// Version currently published (conflicts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<ConfigVersion>,
    /// Last observed convergence report (timeouts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ConvergenceReport>,
}

/// Envelope wrapping [`ErrorBody`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error payload.
    pub error: ErrorBody,
}

/// Response to an accepted proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    /// Version assigned to the new configuration.
    pub version: ConfigVersion,
}

/// Response to a node removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedResponse {
    /// Node that was removed.
    pub removed: NodeId,
}

/// Long-poll query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WaitQuery {
    /// Version or revision the caller already has.
    #[serde(default)]
    pub after: u64,
    /// Requested wait in milliseconds; capped by the server.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error returned by a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The control service rejected the request.
    Control(ControlError),
    /// The request could not be decoded.
    InvalidRequest(String),
    /// The request body exceeds the configured limit.
    PayloadTooLarge(usize),
}

impl ApiError {
    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Control(err) => control_status(err),
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Returns the structured body for this error.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        match self {
            Self::Control(err) => {
                let (expected, actual) = match err {
                    ControlError::Conflict {
                        expected,
                        actual,
                    } => (Some(*expected), Some(*actual)),
                    _ => (None, None),
                };
                let report = match err {
                    ControlError::Timeout(report) => Some(report.as_ref().clone()),
                    _ => None,
                };
                ErrorBody {
                    kind: error_kind(err).to_string(),
                    message: err.to_string(),
                    expected,
                    actual,
                    report,
                }
            }
            Self::InvalidRequest(message) => plain_body(INVALID_REQUEST, message.clone()),
            Self::PayloadTooLarge(limit) => plain_body(
                PAYLOAD_TOO_LARGE,
                format!("request body exceeds {limit} bytes"),
            ),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self::Control(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorEnvelope {
                error: self.body(),
            }),
        )
            .into_response()
    }
}

/// Maps a control error to its HTTP status.
#[must_use]
pub const fn control_status(err: &ControlError) -> StatusCode {
    match err {
        ControlError::EmptyCluster | ControlError::Conflict { .. } => StatusCode::CONFLICT,
        ControlError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        ControlError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ControlError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Builds an error body without conflict or report details.
fn plain_body(kind: &str, message: String) -> ErrorBody {
    ErrorBody {
        kind: kind.to_string(),
        message,
        expected: None,
        actual: None,
        report: None,
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Shared state for route handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Control service all routes delegate to.
    pub service: Arc<ControlService>,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
    /// Cap applied to long-poll waits.
    pub max_wait: Duration,
}

/// Builds the `/v1` router.
pub fn router(state: ApiState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/v1/nodes", get(list_nodes).post(register_node))
        .route("/v1/nodes/{node_id}", delete(deregister_node))
        .route("/v1/configuration", get(current_configuration).post(propose))
        .route("/v1/configuration/wait", get(wait_for_configuration))
        .route("/v1/state", get(current_state).post(report_state))
        .route("/v1/state/wait", get(wait_for_state))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(Arc::new(state))
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Shared handler state.
type Shared = State<Arc<ApiState>>;

/// `GET /v1/nodes`.
async fn list_nodes(State(state): Shared) -> Result<Response, ApiError> {
    Ok(Json(state.service.nodes()?).into_response())
}

/// `POST /v1/nodes`.
async fn register_node(
    State(state): Shared,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let node: Node = decode_body(&state, body)?;
    state.service.register_node(node.clone())?;
    Ok(Json(node).into_response())
}

/// `DELETE /v1/nodes/{node_id}`.
async fn deregister_node(
    State(state): Shared,
    node_id: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(node_id) = node_id.map_err(|err| ApiError::InvalidRequest(err.body_text()))?;
    let node_id = NodeId::new(node_id);
    state.service.deregister_node(&node_id)?;
    Ok(Json(RemovedResponse {
        removed: node_id,
    })
    .into_response())
}

/// `GET /v1/configuration`.
async fn current_configuration(State(state): Shared) -> Result<Response, ApiError> {
    Ok(Json(state.service.current_configuration().as_ref()).into_response())
}

/// `POST /v1/configuration`.
async fn propose(
    State(state): Shared,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let delta: ConfigurationDelta = decode_body(&state, body)?;
    let version = state.service.propose(&delta)?;
    Ok(Json(VersionResponse {
        version,
    })
    .into_response())
}

/// `GET /v1/configuration/wait`.
async fn wait_for_configuration(
    State(state): Shared,
    query: Result<Query<WaitQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = decode_query(query)?;
    let timeout = capped_wait(&state, query.timeout_ms);
    match state.service.wait_for_configuration(ConfigVersion::new(query.after), timeout).await? {
        Some(configuration) => Ok(Json(configuration.as_ref()).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `POST /v1/state`.
async fn report_state(
    State(state): Shared,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let report: NodeState = decode_body(&state, body)?;
    Ok(Json(state.service.report_state(report)?).into_response())
}

/// `GET /v1/state`.
async fn current_state(State(state): Shared) -> Result<Response, ApiError> {
    Ok(Json(state.service.current_state()?).into_response())
}

/// `GET /v1/state/wait`.
async fn wait_for_state(
    State(state): Shared,
    query: Result<Query<WaitQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let query = decode_query(query)?;
    let timeout = capped_wait(&state, query.timeout_ms);
    match state.service.wait_for_state(query.after, timeout).await? {
        Some(cluster) => Ok(Json(cluster).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes a JSON body after enforcing the size limit.
fn decode_body<T: DeserializeOwned>(
    state: &ApiState,
    body: Result<Bytes, BytesRejection>,
) -> Result<T, ApiError> {
    let bytes = body.map_err(|err| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(state.max_body_bytes)
        } else {
            ApiError::InvalidRequest(err.body_text())
        }
    })?;
    if bytes.len() > state.max_body_bytes {
        return Err(ApiError::PayloadTooLarge(state.max_body_bytes));
    }
    serde_json::from_slice(&bytes)
        .map_err(|err| ApiError::InvalidRequest(format!("invalid json body: {err}")))
}

/// Unwraps long-poll query parameters.
fn decode_query(query: Result<Query<WaitQuery>, QueryRejection>) -> Result<WaitQuery, ApiError> {
    query
        .map(|Query(query)| query)
        .map_err(|err| ApiError::InvalidRequest(err.body_text()))
}

/// Returns the requested wait, capped at the server maximum.
fn capped_wait(state: &ApiState, timeout_ms: Option<u64>) -> Duration {
    timeout_ms.map_or(state.max_wait, |millis| Duration::from_millis(millis).min(state.max_wait))
}
