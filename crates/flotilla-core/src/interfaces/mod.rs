// crates/flotilla-core/src/interfaces/mod.rs
// ============================================================================
// Module: Flotilla Interfaces
// Description: Backend-agnostic seams for time, storage, nodes, and transport.
// Purpose: Define the contract surfaces used by the Flotilla runtime.
// Dependencies: crate::core, async-trait
// ============================================================================

//! ## Overview
//! Interfaces define how the control service and agents integrate with the
//! outside world without embedding backend details:
//! - [`Clock`]: every suspension point (agent tick, convergence deadline) goes
//!   through it, so tests can advance virtual time.
//! - [`ClusterStore`]: durable persistence behind the control service.
//! - [`NodeRuntime`]: the node-local container and volume backend.
//! - [`ControlClient`]: the state synchronization protocol, in process or over
//!   HTTP.
//!
//! Implementations must fail closed on missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::ClusterState;
use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::ConfigurationDelta;
use crate::core::ContainerName;
use crate::core::ContainerSpec;
use crate::core::ConvergenceReport;
use crate::core::DatasetId;
use crate::core::DatasetSpec;
use crate::core::ImageRef;
use crate::core::Node;
use crate::core::NodeId;
use crate::core::NodeState;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of time and suspension for every time-driven wait.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;

    /// Suspends the caller for `duration` of this clock's time.
    async fn sleep(&self, duration: Duration);

    /// Suspends the caller until `deadline`.
    async fn sleep_until(&self, deadline: Timestamp) {
        let remaining = deadline.duration_since(self.now());
        self.sleep(remaining).await;
    }
}

// ============================================================================
// SECTION: Cluster Store
// ============================================================================

/// Backing store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("cluster store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("cluster store corruption: {0}")]
    Corrupt(String),
    /// Store data version is incompatible.
    #[error("cluster store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("cluster store invalid data: {0}")]
    Invalid(String),
    /// Store reported an error.
    #[error("cluster store error: {0}")]
    Store(String),
}

/// Everything a control service needs to resume after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Registered nodes.
    pub nodes: BTreeMap<NodeId, Node>,
    /// Latest persisted configuration, if any was ever saved.
    pub configuration: Option<Configuration>,
    /// Latest accepted report per node.
    pub node_states: BTreeMap<NodeId, NodeState>,
    /// Highest cluster state revision recorded with a report.
    pub state_revision: u64,
}

/// Durable persistence for the control service.
///
/// Implementations are called while the control service holds its write
/// locks, so a successful return means the write is durable before it is
/// published to subscribers.
pub trait ClusterStore: Send + Sync {
    /// Loads the persisted cluster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails or data is corrupt.
    fn load(&self) -> Result<StoreSnapshot, StoreError>;

    /// Inserts or replaces a node record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Removes a node record and its last reported state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn remove_node(&self, node_id: &NodeId) -> Result<(), StoreError>;

    /// Appends a published configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails or the version already exists.
    fn save_configuration(&self, configuration: &Configuration) -> Result<(), StoreError>;

    /// Records the latest accepted report for a node along with the cluster
    /// state revision it produced. The store keeps the highest revision seen.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when saving fails.
    fn save_node_state(&self, state: &NodeState, revision: u64) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Node Runtime
// ============================================================================

/// A dataset present on the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDataset {
    /// Dataset identifier.
    pub dataset_id: DatasetId,
    /// Maximum size currently applied.
    pub maximum_size: Option<u64>,
}

/// A container present on the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalContainer {
    /// Container name.
    pub name: ContainerName,
    /// Image the container was created from.
    pub image: ImageRef,
    /// Dataset mounted into the container.
    pub dataset: Option<DatasetId>,
    /// Whether the container is running.
    pub running: bool,
}

/// Actual state of one node, as inspected by its agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInventory {
    /// Datasets attached to the node.
    pub datasets: BTreeMap<DatasetId, LocalDataset>,
    /// Containers that exist on the node.
    pub containers: BTreeMap<ContainerName, LocalContainer>,
}

/// A single reconciliation action failed.
///
/// Action failures are agent-local: they are recorded against one resource
/// and surface only through the reported node state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// The image could not be pulled or resolved.
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),
    /// A dataset operation failed.
    #[error("dataset operation failed: {0}")]
    Dataset(String),
    /// A container operation failed.
    #[error("container operation failed: {0}")]
    Container(String),
    /// The action was skipped because a prerequisite failed this cycle.
    #[error("skipped: prerequisite failed: {0}")]
    PrerequisiteFailed(String),
}

/// Node inspection failed; the cycle is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The node backend is unreachable.
    #[error("node runtime unavailable: {0}")]
    Unavailable(String),
}

/// Node-local backend for datasets and containers.
///
/// Every action is idempotent: applying it to a node that already matches
/// succeeds without change.
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Inspects the node's actual state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when the backend cannot be queried.
    async fn inspect(&self) -> Result<LocalInventory, RuntimeError>;

    /// Attaches (creating if needed) a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn attach_dataset(&self, dataset: &DatasetSpec) -> Result<(), ActionError>;

    /// Applies a new maximum size to an attached dataset.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn resize_dataset(
        &self,
        dataset_id: &DatasetId,
        maximum_size: Option<u64>,
    ) -> Result<(), ActionError>;

    /// Detaches a dataset from the node.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn detach_dataset(&self, dataset_id: &DatasetId) -> Result<(), ActionError>;

    /// Creates a container without starting it.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn create_container(&self, container: &ContainerSpec) -> Result<(), ActionError>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn start_container(&self, name: &ContainerName) -> Result<(), ActionError>;

    /// Stops a running container.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn stop_container(&self, name: &ContainerName) -> Result<(), ActionError>;

    /// Removes a stopped container.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError`] when the action fails.
    async fn remove_container(&self, name: &ContainerName) -> Result<(), ActionError>;
}

// ============================================================================
// SECTION: Control Protocol
// ============================================================================

/// Outcome of a node state report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    /// The report was merged; carries the new cluster state revision.
    Accepted {
        /// Cluster state revision after the merge.
        revision: u64,
    },
    /// The report's generation was not newer than the recorded one.
    Stale {
        /// Generation already recorded for the node.
        recorded: u64,
    },
}

/// Errors returned by the control service.
///
/// # Invariants
/// - Variants are stable; the HTTP API maps each to a fixed error kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The cluster has no registered nodes to place resources on.
    #[error("cluster has no registered nodes")]
    EmptyCluster,
    /// The delta was computed against an outdated configuration.
    #[error("configuration conflict: expected version {expected}, current is {actual}")]
    Conflict {
        /// Version the caller based its delta on.
        expected: ConfigVersion,
        /// Version currently published.
        actual: ConfigVersion,
    },
    /// The request was rejected by validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The cluster did not converge before the deadline.
    #[error(
        "timed out waiting for convergence ({} pending, {} failed)",
        .0.pending.len(),
        .0.failed.len()
    )]
    Timeout(Box<ConvergenceReport>),
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
    /// The control service is shutting down.
    #[error("control service closed")]
    Closed,
}

/// Errors returned by a [`ControlClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The control service rejected the request.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// The request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Client side of the state synchronization protocol.
///
/// Agents use the fetch, report, and wait operations; clients additionally
/// propose configuration changes and read cluster state.
#[async_trait]
pub trait ControlClient: Send + Sync {
    /// Lists registered nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn nodes(&self) -> Result<Vec<Node>, ClientError>;

    /// Registers a node (idempotent for an identical record).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn register_node(&self, node: Node) -> Result<(), ClientError>;

    /// Fetches the current desired configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn current_configuration(&self) -> Result<Arc<Configuration>, ClientError>;

    /// Submits a configuration delta and returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure, including
    /// [`ControlError::Conflict`] and [`ControlError::EmptyCluster`].
    async fn propose(&self, delta: ConfigurationDelta) -> Result<ConfigVersion, ClientError>;

    /// Reports a full node state snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn report_state(&self, state: NodeState) -> Result<ReportOutcome, ClientError>;

    /// Reads the current cluster state.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn current_state(&self) -> Result<ClusterState, ClientError>;

    /// Waits until a configuration newer than `after` is published.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn wait_for_configuration(
        &self,
        after: ConfigVersion,
        timeout: Duration,
    ) -> Result<Option<Arc<Configuration>>, ClientError>;

    /// Waits until the cluster state revision exceeds `after_revision`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport or service failure.
    async fn wait_for_state(
        &self,
        after_revision: u64,
        timeout: Duration,
    ) -> Result<Option<ClusterState>, ClientError>;
}
