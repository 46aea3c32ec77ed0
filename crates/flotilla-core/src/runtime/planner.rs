// crates/flotilla-core/src/runtime/planner.rs
// ============================================================================
// Module: Flotilla Reconciliation Planner
// Description: Diff desired configuration against a node's local inventory.
// Purpose: Produce the minimal, phase-ordered action list for one node.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`plan_actions`] is a pure function: given the configuration, the node it
//! runs for, and what that node currently holds, it returns the actions that
//! close the gap, ordered by [`ActionPhase`]. Running it again on a node that
//! already matches yields an empty plan.
//!
//! Each action lists the resources it requires. The executor skips an action
//! when one of those resources failed earlier in the same cycle.
//!
//! A dataset lives on at most one node. While another node's latest report
//! still lists a dataset, this node neither attaches it nor creates the
//! containers that mount it; the source node detaches first and the next
//! cycle here picks the dataset up.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::ClusterState;
use crate::core::Configuration;
use crate::core::ContainerName;
use crate::core::ContainerSpec;
use crate::core::DatasetId;
use crate::core::DatasetSpec;
use crate::core::NodeId;
use crate::core::ResourceRef;
use crate::interfaces::LocalContainer;
use crate::interfaces::LocalInventory;

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Dependency phase an action runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    /// Stop containers that are going away or being replaced.
    StopContainers,
    /// Remove stopped containers.
    RemoveContainers,
    /// Detach datasets no longer wanted on this node.
    DetachDatasets,
    /// Attach new datasets and resize existing ones.
    AttachDatasets,
    /// Create missing containers.
    CreateContainers,
    /// Start created containers.
    StartContainers,
}

/// One idempotent change to the local node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Stop a running container.
    StopContainer {
        /// Container name.
        name: ContainerName,
    },
    /// Remove a container.
    RemoveContainer {
        /// Container name.
        name: ContainerName,
    },
    /// Detach a dataset.
    DetachDataset {
        /// Dataset identifier.
        dataset_id: DatasetId,
    },
    /// Attach a dataset.
    AttachDataset {
        /// Desired dataset.
        dataset: DatasetSpec,
    },
    /// Apply a new maximum size.
    ResizeDataset {
        /// Dataset identifier.
        dataset_id: DatasetId,
        /// New maximum size.
        maximum_size: Option<u64>,
    },
    /// Create a container.
    CreateContainer {
        /// Desired container.
        container: ContainerSpec,
    },
    /// Start a container.
    StartContainer {
        /// Container name.
        name: ContainerName,
    },
}

impl ReconcileAction {
    /// Returns the phase this action belongs to.
    #[must_use]
    pub const fn phase(&self) -> ActionPhase {
        match self {
            Self::StopContainer { .. } => ActionPhase::StopContainers,
            Self::RemoveContainer { .. } => ActionPhase::RemoveContainers,
            Self::DetachDataset { .. } => ActionPhase::DetachDatasets,
            Self::AttachDataset { .. } | Self::ResizeDataset { .. } => ActionPhase::AttachDatasets,
            Self::CreateContainer { .. } => ActionPhase::CreateContainers,
            Self::StartContainer { .. } => ActionPhase::StartContainers,
        }
    }

    /// Returns the resource this action changes.
    #[must_use]
    pub fn resource(&self) -> ResourceRef {
        match self {
            Self::StopContainer {
                name,
            }
            | Self::RemoveContainer {
                name,
            }
            | Self::StartContainer {
                name,
            } => container_ref(name),
            Self::CreateContainer {
                container,
            } => container_ref(&container.name),
            Self::DetachDataset {
                dataset_id,
            }
            | Self::ResizeDataset {
                dataset_id,
                ..
            } => dataset_ref(dataset_id),
            Self::AttachDataset {
                dataset,
            } => dataset_ref(&dataset.dataset_id),
        }
    }
}

/// An action plus the resources that must not have failed before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Action to apply.
    pub action: ReconcileAction,
    /// Resources whose failure earlier in the cycle blocks this action.
    pub requires: Vec<ResourceRef>,
}

// ============================================================================
// SECTION: Planning
// ============================================================================

/// Computes the actions that move `inventory` toward `configuration`.
///
/// `cluster` is the latest aggregate state; datasets other nodes still report
/// are left pending together with the containers that use them.
///
/// The result is sorted by [`ActionPhase`]; within a phase, actions are
/// ordered by resource identifier.
#[must_use]
pub fn plan_actions(
    node_id: &NodeId,
    configuration: &Configuration,
    inventory: &LocalInventory,
    cluster: &ClusterState,
) -> Vec<PlannedAction> {
    let mut plan = Vec::new();
    let held_elsewhere = datasets_held_elsewhere(node_id, cluster);

    for (name, local) in &inventory.containers {
        let desired = configuration.containers.get(name).filter(|spec| &spec.node_id == node_id);
        let keep = desired.is_some_and(|spec| container_matches(spec, local));
        if keep {
            continue;
        }
        if local.running {
            plan.push(PlannedAction {
                action: ReconcileAction::StopContainer {
                    name: name.clone(),
                },
                requires: Vec::new(),
            });
        }
        plan.push(PlannedAction {
            action: ReconcileAction::RemoveContainer {
                name: name.clone(),
            },
            requires: vec![container_ref(name)],
        });
    }

    for (dataset_id, local) in &inventory.datasets {
        match configuration.datasets.get(dataset_id).filter(|spec| &spec.node_id == node_id) {
            None => {
                let users = inventory
                    .containers
                    .values()
                    .filter(|container| container.dataset.as_ref() == Some(dataset_id))
                    .map(|container| container_ref(&container.name))
                    .collect();
                plan.push(PlannedAction {
                    action: ReconcileAction::DetachDataset {
                        dataset_id: dataset_id.clone(),
                    },
                    requires: users,
                });
            }
            Some(spec) if spec.maximum_size != local.maximum_size => {
                plan.push(PlannedAction {
                    action: ReconcileAction::ResizeDataset {
                        dataset_id: dataset_id.clone(),
                        maximum_size: spec.maximum_size,
                    },
                    requires: Vec::new(),
                });
            }
            Some(_) => {}
        }
    }

    for dataset in configuration.datasets_on(node_id) {
        if !inventory.datasets.contains_key(&dataset.dataset_id)
            && !held_elsewhere.contains(&dataset.dataset_id)
        {
            plan.push(PlannedAction {
                action: ReconcileAction::AttachDataset {
                    dataset: dataset.clone(),
                },
                requires: Vec::new(),
            });
        }
    }

    for container in configuration.containers_on(node_id) {
        let local = inventory.containers.get(&container.name);
        let mut requires = vec![container_ref(&container.name)];
        if let Some(dataset_id) = &container.dataset {
            requires.push(dataset_ref(dataset_id));
        }
        let blocked = container.dataset.as_ref().is_some_and(|dataset_id| {
            held_elsewhere.contains(dataset_id) && !inventory.datasets.contains_key(dataset_id)
        });
        match local {
            _ if blocked => {}
            Some(local) if container_matches(container, local) => {
                if !local.running {
                    plan.push(PlannedAction {
                        action: ReconcileAction::StartContainer {
                            name: container.name.clone(),
                        },
                        requires,
                    });
                }
            }
            _ => {
                plan.push(PlannedAction {
                    action: ReconcileAction::CreateContainer {
                        container: container.clone(),
                    },
                    requires: requires.clone(),
                });
                plan.push(PlannedAction {
                    action: ReconcileAction::StartContainer {
                        name: container.name.clone(),
                    },
                    requires,
                });
            }
        }
    }

    plan.sort_by(|a, b| {
        a.action.phase().cmp(&b.action.phase()).then_with(|| a.action.resource().cmp(&b.action.resource()))
    });
    plan
}

/// Returns datasets listed in any other node's latest report.
fn datasets_held_elsewhere(node_id: &NodeId, cluster: &ClusterState) -> BTreeSet<DatasetId> {
    cluster
        .nodes
        .iter()
        .filter(|(other, _)| *other != node_id)
        .flat_map(|(_, state)| state.datasets.keys().cloned())
        .collect()
}

/// Returns true when a local container can stay as is.
fn container_matches(spec: &ContainerSpec, local: &LocalContainer) -> bool {
    spec.image == local.image && spec.dataset == local.dataset
}

/// Builds a container resource reference.
fn container_ref(name: &ContainerName) -> ResourceRef {
    ResourceRef::Container {
        name: name.clone(),
    }
}

/// Builds a dataset resource reference.
fn dataset_ref(dataset_id: &DatasetId) -> ResourceRef {
    ResourceRef::Dataset {
        dataset_id: dataset_id.clone(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
