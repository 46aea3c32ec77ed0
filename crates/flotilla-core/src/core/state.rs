// crates/flotilla-core/src/core/state.rs
// ============================================================================
// Module: Flotilla Observed State
// Description: Node reports, the aggregated cluster state, and convergence.
// Purpose: Describe what agents observe and compare it to the desired state.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Each agent reports a full [`NodeState`] snapshot tagged with a strictly
//! increasing `generation`. The control service keeps the newest snapshot per
//! node inside a [`ClusterState`], whose `revision` advances on every accepted
//! report.
//!
//! [`Configuration::convergence`] compares desired and observed state while
//! ignoring node-local bookkeeping (timestamps, generations, failure text and
//! counters).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::configuration::Configuration;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::ContainerName;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::ImageRef;
use crate::core::identifiers::NodeId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Resource States
// ============================================================================

/// Observed container lifecycle state.
///
/// `absent` is represented by the container missing from the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// The container exists but has not started.
    Creating,
    /// The container is running.
    Running,
    /// The container is shutting down.
    Stopping,
    /// The last transition failed.
    Failed,
}

/// Observed dataset state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    /// The dataset is attached to the node.
    Attached,
    /// The last attach, resize, or detach failed.
    Failed,
}

/// Observed container on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerObservation {
    /// Container name.
    pub name: ContainerName,
    /// Image the container runs (or was requested to run).
    pub image: ImageRef,
    /// Dataset mounted into the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetId>,
    /// Lifecycle state.
    pub state: ContainerState,
    /// Failure message for the most recent failed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Number of consecutive cycles with a failed action on this container.
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// Observed dataset on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetObservation {
    /// Dataset identifier.
    pub dataset_id: DatasetId,
    /// Maximum size currently applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_size: Option<u64>,
    /// Attachment state.
    pub state: DatasetState,
    /// Failure message for the most recent failed action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Number of consecutive cycles with a failed action on this dataset.
    #[serde(default)]
    pub consecutive_failures: u32,
}

// ============================================================================
// SECTION: Node State
// ============================================================================

/// Full snapshot reported by one node's agent.
///
/// # Invariants
/// - `generation` strictly increases across reports from the same agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Reporting node.
    pub node_id: NodeId,
    /// Freshness marker assigned by the agent.
    pub generation: u64,
    /// Configuration version the agent planned against.
    pub observed_version: ConfigVersion,
    /// Time the snapshot was taken.
    pub reported_at: Timestamp,
    /// Datasets present on the node.
    #[serde(default)]
    pub datasets: BTreeMap<DatasetId, DatasetObservation>,
    /// Containers present on the node.
    #[serde(default)]
    pub containers: BTreeMap<ContainerName, ContainerObservation>,
}

impl NodeState {
    /// Creates an empty snapshot.
    #[must_use]
    pub const fn new(
        node_id: NodeId,
        generation: u64,
        observed_version: ConfigVersion,
        reported_at: Timestamp,
    ) -> Self {
        Self {
            node_id,
            generation,
            observed_version,
            reported_at,
            datasets: BTreeMap::new(),
            containers: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Cluster State
// ============================================================================

/// Last accepted report per node.
///
/// # Invariants
/// - `revision` increases by one for every accepted report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Monotonic revision of the aggregate.
    pub revision: u64,
    /// Latest accepted report per node.
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeState>,
}

impl ClusterState {
    /// Returns the latest report for `node_id`.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeState> {
        self.nodes.get(node_id)
    }

    /// Finds a container anywhere in the cluster.
    #[must_use]
    pub fn container(&self, name: &ContainerName) -> Option<(&NodeId, &ContainerObservation)> {
        self.nodes
            .iter()
            .find_map(|(node_id, state)| state.containers.get(name).map(|obs| (node_id, obs)))
    }

    /// Finds a dataset anywhere in the cluster.
    #[must_use]
    pub fn dataset(&self, dataset_id: &DatasetId) -> Option<(&NodeId, &DatasetObservation)> {
        self.nodes
            .iter()
            .find_map(|(node_id, state)| state.datasets.get(dataset_id).map(|obs| (node_id, obs)))
    }

    /// Returns true when `name` is reported running on any node.
    #[must_use]
    pub fn container_running(&self, name: &ContainerName) -> bool {
        self.container(name).is_some_and(|(_, obs)| obs.state == ContainerState::Running)
    }
}

// ============================================================================
// SECTION: Convergence
// ============================================================================

/// Resource referenced by a convergence finding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceRef {
    /// A dataset.
    Dataset {
        /// Dataset identifier.
        dataset_id: DatasetId,
    },
    /// A container.
    Container {
        /// Container name.
        name: ContainerName,
    },
}

/// One difference between desired and observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIssue {
    /// Resource the finding refers to.
    pub resource: ResourceRef,
    /// Node where the difference was observed or expected.
    pub node_id: NodeId,
    /// Human readable description.
    pub detail: String,
}

/// Result of comparing a configuration to the cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Configuration version that was compared.
    pub version: ConfigVersion,
    /// Resources still moving toward their desired state.
    #[serde(default)]
    pub pending: Vec<ResourceIssue>,
    /// Resources whose last action failed.
    #[serde(default)]
    pub failed: Vec<ResourceIssue>,
}

impl ConvergenceReport {
    /// Returns true when observed state matches the configuration.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }
}

impl Configuration {
    /// Compares this configuration with the observed cluster state.
    #[must_use]
    pub fn convergence(&self, state: &ClusterState) -> ConvergenceReport {
        let mut report = ConvergenceReport {
            version: self.version,
            ..ConvergenceReport::default()
        };

        for dataset in self.datasets.values() {
            let resource = ResourceRef::Dataset {
                dataset_id: dataset.dataset_id.clone(),
            };
            let observed =
                state.node(&dataset.node_id).and_then(|node| node.datasets.get(&dataset.dataset_id));
            match observed {
                None => push_issue(&mut report.pending, resource, &dataset.node_id, "not attached"),
                Some(obs) if obs.state == DatasetState::Failed => push_issue(
                    &mut report.failed,
                    resource,
                    &dataset.node_id,
                    obs.failure.as_deref().unwrap_or("failed"),
                ),
                Some(obs) if obs.maximum_size != dataset.maximum_size => {
                    push_issue(&mut report.pending, resource, &dataset.node_id, "size differs");
                }
                Some(_) => {}
            }
        }

        for container in self.containers.values() {
            let resource = ResourceRef::Container {
                name: container.name.clone(),
            };
            let observed =
                state.node(&container.node_id).and_then(|node| node.containers.get(&container.name));
            match observed {
                None => push_issue(&mut report.pending, resource, &container.node_id, "absent"),
                Some(obs) if obs.state == ContainerState::Failed => push_issue(
                    &mut report.failed,
                    resource,
                    &container.node_id,
                    obs.failure.as_deref().unwrap_or("failed"),
                ),
                Some(obs) if obs.image != container.image || obs.dataset != container.dataset => {
                    push_issue(&mut report.pending, resource, &container.node_id, "spec differs");
                }
                Some(obs) if obs.state != ContainerState::Running => {
                    push_issue(&mut report.pending, resource, &container.node_id, "not running");
                }
                Some(_) => {}
            }
        }

        for (node_id, node) in &state.nodes {
            for dataset_id in node.datasets.keys() {
                let wanted_here =
                    self.datasets.get(dataset_id).is_some_and(|spec| &spec.node_id == node_id);
                if !wanted_here {
                    push_issue(
                        &mut report.pending,
                        ResourceRef::Dataset {
                            dataset_id: dataset_id.clone(),
                        },
                        node_id,
                        "not desired on this node",
                    );
                }
            }
            for name in node.containers.keys() {
                let wanted_here =
                    self.containers.get(name).is_some_and(|spec| &spec.node_id == node_id);
                if !wanted_here {
                    push_issue(
                        &mut report.pending,
                        ResourceRef::Container {
                            name: name.clone(),
                        },
                        node_id,
                        "not desired on this node",
                    );
                }
            }
        }

        report
    }
}

/// Appends a finding.
fn push_issue(target: &mut Vec<ResourceIssue>, resource: ResourceRef, node_id: &NodeId, detail: &str) {
    target.push(ResourceIssue {
        resource,
        node_id: node_id.clone(),
        detail: detail.to_string(),
    });
}

// ============================================================================
// SECTION: Tests
// ============================================================================
