// crates/flotilla-core/src/runtime/simulated.rs
// ============================================================================
// Module: Flotilla Simulated Node Runtime
// Description: In-memory node backend with injectable failures.
// Purpose: Drive agents in tests and in `flotilla agent --runtime simulated`.
// Dependencies: crate::{core, interfaces}, async-trait
// ============================================================================

//! ## Overview
//! [`SimulatedNodeRuntime`] keeps a [`LocalInventory`] in memory and applies
//! actions to it with the same idempotency and precondition rules a real
//! backend would have. Tests can mark images unavailable, make dataset
//! operations fail, or take the whole node offline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::core::ContainerName;
use crate::core::ContainerSpec;
use crate::core::DatasetId;
use crate::core::DatasetSpec;
use crate::core::ImageRef;
use crate::interfaces::ActionError;
use crate::interfaces::LocalContainer;
use crate::interfaces::LocalDataset;
use crate::interfaces::LocalInventory;
use crate::interfaces::NodeRuntime;
use crate::interfaces::RuntimeError;

// ============================================================================
// SECTION: Simulated Runtime
// ============================================================================

/// Mutable state of the simulated node.
#[derive(Debug, Default)]
struct SimulatedState {
    /// What exists on the node.
    inventory: LocalInventory,
    /// Images that fail to resolve.
    unavailable_images: BTreeSet<ImageRef>,
    /// Datasets whose operations fail.
    failing_datasets: BTreeSet<DatasetId>,
    /// When set, inspection fails.
    offline: bool,
    /// Count of state-changing operations applied.
    mutations: usize,
}

/// In-memory [`NodeRuntime`].
#[derive(Debug, Default)]
pub struct SimulatedNodeRuntime {
    /// Node state.
    state: Mutex<SimulatedState>,
}

impl SimulatedNodeRuntime {
    /// Creates an empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `image` unavailable for container creation.
    pub fn fail_image(&self, image: ImageRef) {
        self.lock().unavailable_images.insert(image);
    }

    /// Makes `image` available again.
    pub fn restore_image(&self, image: &ImageRef) {
        self.lock().unavailable_images.remove(image);
    }

    /// Makes every operation on `dataset_id` fail.
    pub fn fail_dataset(&self, dataset_id: DatasetId) {
        self.lock().failing_datasets.insert(dataset_id);
    }

    /// Lets operations on `dataset_id` succeed again.
    pub fn restore_dataset(&self, dataset_id: &DatasetId) {
        self.lock().failing_datasets.remove(dataset_id);
    }

    /// Takes the node offline (inspection fails) or back online.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Returns a copy of the node inventory.
    #[must_use]
    pub fn inventory(&self) -> LocalInventory {
        self.lock().inventory.clone()
    }

    /// Returns the number of state-changing operations applied so far.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.lock().mutations
    }

    /// Locks the node state.
    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl NodeRuntime for SimulatedNodeRuntime {
    async fn inspect(&self) -> Result<LocalInventory, RuntimeError> {
        let state = self.lock();
        if state.offline {
            return Err(RuntimeError::Unavailable("simulated node is offline".to_string()));
        }
        Ok(state.inventory.clone())
    }

    async fn attach_dataset(&self, dataset: &DatasetSpec) -> Result<(), ActionError> {
        let mut state = self.lock();
        if state.failing_datasets.contains(&dataset.dataset_id) {
            return Err(ActionError::Dataset(format!("attach {} failed", dataset.dataset_id)));
        }
        if state.inventory.datasets.contains_key(&dataset.dataset_id) {
            return Ok(());
        }
        state.inventory.datasets.insert(
            dataset.dataset_id.clone(),
            LocalDataset {
                dataset_id: dataset.dataset_id.clone(),
                maximum_size: dataset.maximum_size,
            },
        );
        state.mutations += 1;
        Ok(())
    }

    async fn resize_dataset(
        &self,
        dataset_id: &DatasetId,
        maximum_size: Option<u64>,
    ) -> Result<(), ActionError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.failing_datasets.contains(dataset_id) {
            return Err(ActionError::Dataset(format!("resize {dataset_id} failed")));
        }
        let dataset = state
            .inventory
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| ActionError::Dataset(format!("{dataset_id} is not attached")))?;
        if dataset.maximum_size != maximum_size {
            dataset.maximum_size = maximum_size;
            state.mutations += 1;
        }
        Ok(())
    }

    async fn detach_dataset(&self, dataset_id: &DatasetId) -> Result<(), ActionError> {
        let mut state = self.lock();
        if state.failing_datasets.contains(dataset_id) {
            return Err(ActionError::Dataset(format!("detach {dataset_id} failed")));
        }
        let in_use = state
            .inventory
            .containers
            .values()
            .any(|container| container.dataset.as_ref() == Some(dataset_id));
        if in_use {
            return Err(ActionError::Dataset(format!("{dataset_id} is in use")));
        }
        if state.inventory.datasets.remove(dataset_id).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }

    async fn create_container(&self, container: &ContainerSpec) -> Result<(), ActionError> {
        let mut state = self.lock();
        if state.unavailable_images.contains(&container.image) {
            return Err(ActionError::ImageUnavailable(container.image.to_string()));
        }
        if let Some(existing) = state.inventory.containers.get(&container.name) {
            if existing.image == container.image && existing.dataset == container.dataset {
                return Ok(());
            }
            return Err(ActionError::Container(format!(
                "{} already exists with a different spec",
                container.name
            )));
        }
        if let Some(dataset_id) = &container.dataset
            && !state.inventory.datasets.contains_key(dataset_id)
        {
            return Err(ActionError::Dataset(format!("{dataset_id} is not attached")));
        }
        state.inventory.containers.insert(
            container.name.clone(),
            LocalContainer {
                name: container.name.clone(),
                image: container.image.clone(),
                dataset: container.dataset.clone(),
                running: false,
            },
        );
        state.mutations += 1;
        Ok(())
    }

    async fn start_container(&self, name: &ContainerName) -> Result<(), ActionError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let container = state
            .inventory
            .containers
            .get_mut(name)
            .ok_or_else(|| ActionError::Container(format!("no such container: {name}")))?;
        if !container.running {
            container.running = true;
            state.mutations += 1;
        }
        Ok(())
    }

    async fn stop_container(&self, name: &ContainerName) -> Result<(), ActionError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(container) = state.inventory.containers.get_mut(name)
            && container.running
        {
            container.running = false;
            state.mutations += 1;
        }
        Ok(())
    }

    async fn remove_container(&self, name: &ContainerName) -> Result<(), ActionError> {
        let mut state = self.lock();
        if state.inventory.containers.get(name).is_some_and(|container| container.running) {
            return Err(ActionError::Container(format!("{name} is still running")));
        }
        if state.inventory.containers.remove(name).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
