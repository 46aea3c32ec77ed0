// crates/flotilla-core/src/core/configuration.rs
// ============================================================================
// Module: Flotilla Configuration
// Description: Versioned desired-state document and the deltas that edit it.
// Purpose: Apply configuration changes with fail-closed validation.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`Configuration`] is the full desired state of the cluster. It is never
//! edited in place: [`Configuration::apply`] builds the successor document
//! from a list of [`ConfigurationChange`]s and validates the result against
//! the registered nodes before anything is published.
//!
//! Invariants enforced on every published configuration:
//! - every dataset and container targets a registered node;
//! - container names and dataset identifiers are unique;
//! - a container's dataset exists, lives on the container's node, and is not
//!   shared with another container.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::cluster::ContainerSpec;
use crate::core::cluster::DatasetSpec;
use crate::core::cluster::Node;
use crate::core::hashing::ContentDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::digest_canonical_json;
use crate::core::identifiers::ConfigVersion;
use crate::core::identifiers::ContainerName;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::MAX_IDENTIFIER_LENGTH;
use crate::core::identifiers::NodeId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of changes accepted in a single delta.
pub const MAX_DELTA_CHANGES: usize = 1_024;

// ============================================================================
// SECTION: Configuration Document
// ============================================================================

/// Desired state of the whole cluster at a given version.
///
/// # Invariants
/// - Published configurations satisfy every rule in the module overview.
/// - `version` strictly increases with each accepted proposal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Version assigned by the control service.
    pub version: ConfigVersion,
    /// Desired datasets keyed by identifier.
    #[serde(default)]
    pub datasets: BTreeMap<DatasetId, DatasetSpec>,
    /// Desired containers keyed by name.
    #[serde(default)]
    pub containers: BTreeMap<ContainerName, ContainerSpec>,
}

impl Configuration {
    /// Returns the empty configuration at [`ConfigVersion::INITIAL`].
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the datasets placed on `node_id`.
    pub fn datasets_on<'a>(
        &'a self,
        node_id: &'a NodeId,
    ) -> impl Iterator<Item = &'a DatasetSpec> + 'a {
        self.datasets.values().filter(move |dataset| &dataset.node_id == node_id)
    }

    /// Returns the containers placed on `node_id`.
    pub fn containers_on<'a>(
        &'a self,
        node_id: &'a NodeId,
    ) -> impl Iterator<Item = &'a ContainerSpec> + 'a {
        self.containers.values().filter(move |container| &container.node_id == node_id)
    }

    /// Returns true when any dataset or container is placed on `node_id`.
    #[must_use]
    pub fn references_node(&self, node_id: &NodeId) -> bool {
        self.datasets_on(node_id).next().is_some() || self.containers_on(node_id).next().is_some()
    }

    /// Returns the canonical content digest, ignoring nothing (version included).
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn fingerprint(&self) -> Result<ContentDigest, HashError> {
        digest_canonical_json(self)
    }

    /// Builds the successor configuration by applying `changes` in order.
    ///
    /// The returned document carries `self.version.next()`. Nothing is
    /// returned unless the final document validates against `nodes`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for the first change that cannot be
    /// applied, or when the resulting document violates an invariant.
    pub fn apply(
        &self,
        changes: &[ConfigurationChange],
        nodes: &BTreeMap<NodeId, Node>,
    ) -> Result<Self, ConfigurationError> {
        if changes.is_empty() {
            return Err(ConfigurationError::EmptyDelta);
        }
        if changes.len() > MAX_DELTA_CHANGES {
            return Err(ConfigurationError::TooManyChanges {
                max: MAX_DELTA_CHANGES,
                actual: changes.len(),
            });
        }
        let mut next = self.clone();
        next.version = self.version.next();
        for change in changes {
            next.apply_change(change, nodes)?;
        }
        next.validate(nodes)?;
        Ok(next)
    }

    /// Validates the whole document against the registered nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] describing the first violated invariant.
    pub fn validate(&self, nodes: &BTreeMap<NodeId, Node>) -> Result<(), ConfigurationError> {
        for (dataset_id, dataset) in &self.datasets {
            validate_identifier("dataset_id", dataset_id.as_str())?;
            if dataset_id != &dataset.dataset_id {
                return Err(ConfigurationError::Inconsistent(format!(
                    "dataset key {dataset_id} does not match record {}",
                    dataset.dataset_id
                )));
            }
            ensure_node(nodes, &dataset.node_id)?;
        }
        let mut claimed: BTreeSet<&DatasetId> = BTreeSet::new();
        for (name, container) in &self.containers {
            validate_identifier("container name", name.as_str())?;
            if name != &container.name {
                return Err(ConfigurationError::Inconsistent(format!(
                    "container key {name} does not match record {}",
                    container.name
                )));
            }
            if container.image.as_str().trim().is_empty() {
                return Err(ConfigurationError::InvalidIdentifier {
                    field: "image",
                    reason: "must be non-empty".to_string(),
                });
            }
            ensure_node(nodes, &container.node_id)?;
            if let Some(dataset_id) = &container.dataset {
                let dataset = self
                    .datasets
                    .get(dataset_id)
                    .ok_or_else(|| ConfigurationError::UnknownDataset(dataset_id.clone()))?;
                if dataset.node_id != container.node_id {
                    return Err(ConfigurationError::DatasetNodeMismatch {
                        dataset_id: dataset_id.clone(),
                        dataset_node: dataset.node_id.clone(),
                        container_node: container.node_id.clone(),
                    });
                }
                if !claimed.insert(dataset_id) {
                    return Err(ConfigurationError::DatasetInUse(dataset_id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Returns the container using `dataset_id`, if any.
    fn container_using(&self, dataset_id: &DatasetId) -> Option<&ContainerSpec> {
        self.containers.values().find(|container| container.dataset.as_ref() == Some(dataset_id))
    }

    /// Applies a single change to this working copy.
    fn apply_change(
        &mut self,
        change: &ConfigurationChange,
        nodes: &BTreeMap<NodeId, Node>,
    ) -> Result<(), ConfigurationError> {
        match change {
            ConfigurationChange::AddDataset {
                dataset,
            } => {
                validate_identifier("dataset_id", dataset.dataset_id.as_str())?;
                ensure_node(nodes, &dataset.node_id)?;
                if self.datasets.contains_key(&dataset.dataset_id) {
                    return Err(ConfigurationError::DuplicateDataset(dataset.dataset_id.clone()));
                }
                self.datasets.insert(dataset.dataset_id.clone(), dataset.clone());
            }
            ConfigurationChange::RemoveDataset {
                dataset_id,
            } => {
                if !self.datasets.contains_key(dataset_id) {
                    return Err(ConfigurationError::UnknownDataset(dataset_id.clone()));
                }
                if self.container_using(dataset_id).is_some() {
                    return Err(ConfigurationError::DatasetInUse(dataset_id.clone()));
                }
                self.datasets.remove(dataset_id);
            }
            ConfigurationChange::ResizeDataset {
                dataset_id,
                maximum_size,
            } => {
                let dataset = self
                    .datasets
                    .get_mut(dataset_id)
                    .ok_or_else(|| ConfigurationError::UnknownDataset(dataset_id.clone()))?;
                dataset.maximum_size = *maximum_size;
            }
            ConfigurationChange::MoveDataset {
                dataset_id,
                node_id,
            } => {
                ensure_node(nodes, node_id)?;
                if self.container_using(dataset_id).is_some() {
                    return Err(ConfigurationError::DatasetInUse(dataset_id.clone()));
                }
                let dataset = self
                    .datasets
                    .get_mut(dataset_id)
                    .ok_or_else(|| ConfigurationError::UnknownDataset(dataset_id.clone()))?;
                dataset.node_id = node_id.clone();
            }
            ConfigurationChange::AddContainer {
                container,
            } => {
                validate_identifier("container name", container.name.as_str())?;
                ensure_node(nodes, &container.node_id)?;
                if self.containers.contains_key(&container.name) {
                    return Err(ConfigurationError::DuplicateContainer(container.name.clone()));
                }
                if let Some(dataset_id) = &container.dataset
                    && self.container_using(dataset_id).is_some()
                {
                    return Err(ConfigurationError::DatasetInUse(dataset_id.clone()));
                }
                self.containers.insert(container.name.clone(), container.clone());
            }
            ConfigurationChange::RemoveContainer {
                name,
            } => {
                if self.containers.remove(name).is_none() {
                    return Err(ConfigurationError::UnknownContainer(name.clone()));
                }
            }
            ConfigurationChange::MoveContainer {
                name,
                node_id,
            } => {
                ensure_node(nodes, node_id)?;
                let container = self
                    .containers
                    .get_mut(name)
                    .ok_or_else(|| ConfigurationError::UnknownContainer(name.clone()))?;
                container.node_id = node_id.clone();
                // The attached dataset travels with its container.
                if let Some(dataset_id) = container.dataset.clone()
                    && let Some(dataset) = self.datasets.get_mut(&dataset_id)
                {
                    dataset.node_id = node_id.clone();
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Deltas
// ============================================================================

/// One edit to the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConfigurationChange {
    /// Place a new dataset on a node.
    AddDataset {
        /// Dataset to add.
        dataset: DatasetSpec,
    },
    /// Remove a dataset that no container uses.
    RemoveDataset {
        /// Dataset to remove.
        dataset_id: DatasetId,
    },
    /// Change a dataset's maximum size.
    ResizeDataset {
        /// Dataset to resize.
        dataset_id: DatasetId,
        /// New maximum size in bytes, or unlimited.
        maximum_size: Option<u64>,
    },
    /// Move an unused dataset to another node.
    MoveDataset {
        /// Dataset to move.
        dataset_id: DatasetId,
        /// Destination node.
        node_id: NodeId,
    },
    /// Place a new container on a node.
    AddContainer {
        /// Container to add.
        container: ContainerSpec,
    },
    /// Remove a container.
    RemoveContainer {
        /// Container to remove.
        name: ContainerName,
    },
    /// Move a container (and its dataset) to another node.
    MoveContainer {
        /// Container to move.
        name: ContainerName,
        /// Destination node.
        node_id: NodeId,
    },
}

impl ConfigurationChange {
    /// Returns true when the change places a resource on a node.
    #[must_use]
    pub const fn requires_placement(&self) -> bool {
        matches!(
            self,
            Self::AddDataset { .. }
                | Self::MoveDataset { .. }
                | Self::AddContainer { .. }
                | Self::MoveContainer { .. }
        )
    }

    /// Returns a stable label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AddDataset { .. } => "add_dataset",
            Self::RemoveDataset { .. } => "remove_dataset",
            Self::ResizeDataset { .. } => "resize_dataset",
            Self::MoveDataset { .. } => "move_dataset",
            Self::AddContainer { .. } => "add_container",
            Self::RemoveContainer { .. } => "remove_container",
            Self::MoveContainer { .. } => "move_container",
        }
    }
}

/// A proposed edit computed against a specific configuration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationDelta {
    /// Version the changes were computed against (compare-and-swap guard).
    pub base_version: ConfigVersion,
    /// Changes applied in order.
    pub changes: Vec<ConfigurationChange>,
}

impl ConfigurationDelta {
    /// Creates an empty delta against `base_version`.
    #[must_use]
    pub const fn new(base_version: ConfigVersion) -> Self {
        Self {
            base_version,
            changes: Vec::new(),
        }
    }

    /// Appends a change.
    #[must_use]
    pub fn with(mut self, change: ConfigurationChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Returns true when any change places a resource on a node.
    #[must_use]
    pub fn requires_placement(&self) -> bool {
        self.changes.iter().any(ConfigurationChange::requires_placement)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reasons a configuration change is rejected.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The delta carried no changes.
    #[error("delta contains no changes")]
    EmptyDelta,
    /// The delta exceeded [`MAX_DELTA_CHANGES`].
    #[error("delta has {actual} changes (max {max})")]
    TooManyChanges {
        /// Maximum accepted changes.
        max: usize,
        /// Changes submitted.
        actual: usize,
    },
    /// An identifier failed format checks.
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier {
        /// Field label.
        field: &'static str,
        /// Failure reason.
        reason: String,
    },
    /// A referenced node is not registered.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
    /// A referenced dataset does not exist.
    #[error("unknown dataset: {0}")]
    UnknownDataset(DatasetId),
    /// A referenced container does not exist.
    #[error("unknown container: {0}")]
    UnknownContainer(ContainerName),
    /// The dataset identifier is already taken.
    #[error("duplicate dataset: {0}")]
    DuplicateDataset(DatasetId),
    /// The container name is already taken.
    #[error("duplicate container name: {0}")]
    DuplicateContainer(ContainerName),
    /// The dataset is already used by a container.
    #[error("dataset in use by a container: {0}")]
    DatasetInUse(DatasetId),
    /// The dataset and its container target different nodes.
    #[error(
        "dataset {dataset_id} is on node {dataset_node} but its container targets {container_node}"
    )]
    DatasetNodeMismatch {
        /// Dataset identifier.
        dataset_id: DatasetId,
        /// Node holding the dataset.
        dataset_node: NodeId,
        /// Node targeted by the container.
        container_node: NodeId,
    },
    /// The document is internally inconsistent.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures `node_id` is registered.
fn ensure_node(nodes: &BTreeMap<NodeId, Node>, node_id: &NodeId) -> Result<(), ConfigurationError> {
    if nodes.contains_key(node_id) {
        Ok(())
    } else {
        Err(ConfigurationError::UnknownNode(node_id.clone()))
    }
}

/// Validates the shape of an identifier string.
pub(crate) fn validate_identifier(field: &'static str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::InvalidIdentifier {
            field,
            reason: "must be non-empty".to_string(),
        });
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ConfigurationError::InvalidIdentifier {
            field,
            reason: format!("exceeds {MAX_IDENTIFIER_LENGTH} bytes"),
        });
    }
    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control() || ch == '/') {
        return Err(ConfigurationError::InvalidIdentifier {
            field,
            reason: "must not contain whitespace, control characters, or '/'".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use std::collections::BTreeMap;
    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::core::identifiers::ImageRef;

    fn nodes(ids: &[&str]) -> BTreeMap<NodeId, Node> {
        ids.iter()
            .map(|id| {
                let node = Node::new(NodeId::new(*id), IpAddr::V4(Ipv4Addr::LOCALHOST));
                (node.node_id.clone(), node)
            })
            .collect()
    }

    fn container(name: &str, node: &str) -> ContainerSpec {
        ContainerSpec::new(ContainerName::new(name), ImageRef::new("busybox"), NodeId::new(node))
    }

    #[test]
    fn apply_bumps_version_and_keeps_original() {
        let base = Configuration::empty();
        let next = base
            .apply(
                &[ConfigurationChange::AddContainer {
                    container: container("web", "n1"),
                }],
                &nodes(&["n1"]),
            )
            .unwrap();
        assert_eq!(next.version, ConfigVersion::new(1));
        assert!(base.containers.is_empty());
        assert_eq!(next.containers.len(), 1);
    }

    #[test]
    fn apply_rejects_unknown_node() {
        let err = Configuration::empty()
            .apply(
                &[ConfigurationChange::AddContainer {
                    container: container("web", "missing"),
                }],
                &nodes(&["n1"]),
            )
            .unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownNode(NodeId::new("missing")));
    }

    #[test]
    fn apply_rejects_duplicate_container_name() {
        let change = ConfigurationChange::AddContainer {
            container: container("web", "n1"),
        };
        let err = Configuration::empty()
            .apply(&[change.clone(), change], &nodes(&["n1"]))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateContainer(ContainerName::new("web")));
    }

    #[test]
    fn apply_rejects_dataset_on_other_node() {
        let err = Configuration::empty()
            .apply(
                &[
                    ConfigurationChange::AddDataset {
                        dataset: DatasetSpec::new(DatasetId::new("d1"), NodeId::new("n2")),
                    },
                    ConfigurationChange::AddContainer {
                        container: container("db", "n1").with_dataset(DatasetId::new("d1")),
                    },
                ],
                &nodes(&["n1", "n2"]),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DatasetNodeMismatch { .. }));
    }

    #[test]
    fn apply_rejects_shared_dataset() {
        let err = Configuration::empty()
            .apply(
                &[
                    ConfigurationChange::AddDataset {
                        dataset: DatasetSpec::new(DatasetId::new("d1"), NodeId::new("n1")),
                    },
                    ConfigurationChange::AddContainer {
                        container: container("a", "n1").with_dataset(DatasetId::new("d1")),
                    },
                    ConfigurationChange::AddContainer {
                        container: container("b", "n1").with_dataset(DatasetId::new("d1")),
                    },
                ],
                &nodes(&["n1"]),
            )
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DatasetInUse(DatasetId::new("d1")));
    }

    #[test]
    fn move_container_carries_its_dataset() {
        let all = nodes(&["n1", "n2"]);
        let placed = Configuration::empty()
            .apply(
                &[
                    ConfigurationChange::AddDataset {
                        dataset: DatasetSpec::new(DatasetId::new("d1"), NodeId::new("n1")),
                    },
                    ConfigurationChange::AddContainer {
                        container: container("db", "n1").with_dataset(DatasetId::new("d1")),
                    },
                ],
                &all,
            )
            .unwrap();
        let moved = placed
            .apply(
                &[ConfigurationChange::MoveContainer {
                    name: ContainerName::new("db"),
                    node_id: NodeId::new("n2"),
                }],
                &all,
            )
            .unwrap();
        assert_eq!(moved.datasets[&DatasetId::new("d1")].node_id, NodeId::new("n2"));
        assert_eq!(moved.containers[&ContainerName::new("db")].node_id, NodeId::new("n2"));
    }

    #[test]
    fn remove_dataset_in_use_is_rejected() {
        let all = nodes(&["n1"]);
        let placed = Configuration::empty()
            .apply(
                &[
                    ConfigurationChange::AddDataset {
                        dataset: DatasetSpec::new(DatasetId::new("d1"), NodeId::new("n1")),
                    },
                    ConfigurationChange::AddContainer {
                        container: container("db", "n1").with_dataset(DatasetId::new("d1")),
                    },
                ],
                &all,
            )
            .unwrap();
        let err = placed
            .apply(
                &[ConfigurationChange::RemoveDataset {
                    dataset_id: DatasetId::new("d1"),
                }],
                &all,
            )
            .unwrap_err();
        assert_eq!(err, ConfigurationError::DatasetInUse(DatasetId::new("d1")));
    }

    #[test]
    fn empty_delta_is_rejected() {
        let err = Configuration::empty().apply(&[], &nodes(&["n1"])).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyDelta);
    }

    #[test]
    fn identifiers_reject_slashes_and_blanks() {
        assert!(validate_identifier("name", "ok-name").is_ok());
        assert!(validate_identifier("name", " ").is_err());
        assert!(validate_identifier("name", "a/b").is_err());
        assert!(validate_identifier("name", &"x".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
    }

    #[test]
    fn change_serializes_with_op_tag() {
        let change = ConfigurationChange::RemoveContainer {
            name: ContainerName::new("web"),
        };
        let json = serde_json::to_value(&change).expect("serialize");
        assert_eq!(json, serde_json::json!({"op": "remove_container", "name": "web"}));
    }
}
