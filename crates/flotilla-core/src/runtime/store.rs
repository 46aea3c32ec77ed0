// crates/flotilla-core/src/runtime/store.rs
// ============================================================================
// Module: Flotilla In-Memory Store
// Description: Simple in-memory cluster store for tests and local demos.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of [`ClusterStore`]
//! for tests and local demos. It is not intended for production use; see the
//! `flotilla-store-sqlite` crate for durable storage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::Node;
use crate::core::NodeId;
use crate::core::NodeState;
use crate::interfaces::ClusterStore;
use crate::interfaces::StoreError;
use crate::interfaces::StoreSnapshot;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Mutable contents of the in-memory store.
#[derive(Debug, Default)]
struct MemoryContents {
    /// Registered nodes.
    nodes: BTreeMap<NodeId, Node>,
    /// Every saved configuration, keyed by version.
    configurations: BTreeMap<ConfigVersion, Configuration>,
    /// Latest report per node.
    node_states: BTreeMap<NodeId, NodeState>,
    /// Highest state revision recorded.
    state_revision: u64,
}

/// In-memory cluster store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClusterStore {
    /// Store contents protected by a mutex.
    contents: Arc<Mutex<MemoryContents>>,
}

impl InMemoryClusterStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of configuration versions saved so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store mutex is poisoned.
    pub fn configuration_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.configurations.len())
    }

    /// Locks the store contents.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryContents>, StoreError> {
        self.contents
            .lock()
            .map_err(|_| StoreError::Store("cluster store mutex poisoned".to_string()))
    }
}

impl ClusterStore for InMemoryClusterStore {
    fn load(&self) -> Result<StoreSnapshot, StoreError> {
        let guard = self.lock()?;
        Ok(StoreSnapshot {
            nodes: guard.nodes.clone(),
            configuration: guard.configurations.values().next_back().cloned(),
            node_states: guard.node_states.clone(),
            state_revision: guard.state_revision,
        })
    }

    fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        self.lock()?.nodes.insert(node.node_id.clone(), node.clone());
        Ok(())
    }

    fn remove_node(&self, node_id: &NodeId) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard.nodes.remove(node_id);
        guard.node_states.remove(node_id);
        drop(guard);
        Ok(())
    }

    fn save_configuration(&self, configuration: &Configuration) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.configurations.contains_key(&configuration.version) {
            return Err(StoreError::Invalid(format!(
                "configuration version {} already saved",
                configuration.version
            )));
        }
        guard.configurations.insert(configuration.version, configuration.clone());
        drop(guard);
        Ok(())
    }

    fn save_node_state(&self, state: &NodeState, revision: u64) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard.node_states.insert(state.node_id.clone(), state.clone());
        guard.state_revision = guard.state_revision.max(revision);
        drop(guard);
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
