// crates/flotilla-core/src/core/cluster.rs
// ============================================================================
// Module: Flotilla Cluster Resources
// Description: Nodes plus the desired-state specs for datasets and containers.
// Purpose: Define the resource records that configurations are built from.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Node`] is a registered machine. [`DatasetSpec`] and [`ContainerSpec`]
//! describe what a configuration wants to exist on a node; what actually
//! exists is described by the observation types in [`crate::core::state`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ContainerName;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::ImageRef;
use crate::core::identifiers::NodeId;

// ============================================================================
// SECTION: Nodes
// ============================================================================

/// A registered cluster node.
///
/// # Invariants
/// - Immutable once registered; only explicit deregistration removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub node_id: NodeId,
    /// Address the node's agent is reachable at.
    pub address: IpAddr,
}

impl Node {
    /// Creates a node record.
    #[must_use]
    pub const fn new(node_id: NodeId, address: IpAddr) -> Self {
        Self {
            node_id,
            address,
        }
    }
}

// ============================================================================
// SECTION: Datasets
// ============================================================================

/// Desired dataset placement.
///
/// # Invariants
/// - A dataset lives on exactly one node and backs at most one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Dataset identifier.
    pub dataset_id: DatasetId,
    /// Node the dataset should be attached to.
    pub node_id: NodeId,
    /// Optional maximum size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_size: Option<u64>,
    /// Free-form metadata carried with the dataset.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DatasetSpec {
    /// Creates a dataset spec without size limit or metadata.
    #[must_use]
    pub fn new(dataset_id: DatasetId, node_id: NodeId) -> Self {
        Self {
            dataset_id,
            node_id,
            maximum_size: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the maximum size in bytes.
    #[must_use]
    pub const fn with_maximum_size(mut self, bytes: u64) -> Self {
        self.maximum_size = Some(bytes);
        self
    }
}

// ============================================================================
// SECTION: Containers
// ============================================================================

/// Desired container placement.
///
/// # Invariants
/// - `name` is unique across the whole cluster.
/// - When `dataset` is set, that dataset is placed on the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: ContainerName,
    /// Image the container runs.
    pub image: ImageRef,
    /// Node the container should run on.
    pub node_id: NodeId,
    /// Dataset mounted into the container, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetId>,
}

impl ContainerSpec {
    /// Creates a container spec without a dataset.
    #[must_use]
    pub const fn new(name: ContainerName, image: ImageRef, node_id: NodeId) -> Self {
        Self {
            name,
            image,
            node_id,
            dataset: None,
        }
    }

    /// Attaches a dataset to the container.
    #[must_use]
    pub fn with_dataset(mut self, dataset: DatasetId) -> Self {
        self.dataset = Some(dataset);
        self
    }
}
