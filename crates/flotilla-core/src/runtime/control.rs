// crates/flotilla-core/src/runtime/control.rs
// ============================================================================
// Module: Flotilla Control Service
// Description: Desired configuration and observed state, versioned and shared.
// Purpose: Serialize configuration writes and merge agent reports.
// Dependencies: crate::{core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! The [`ControlService`] is the single writer of the cluster's desired
//! configuration and the aggregator of agent reports.
//!
//! - Configuration writes (proposals and node registry changes) are serialized
//!   by one write lock and use compare-and-swap on `base_version`.
//! - Node reports take a per-node lock, so reports from different nodes merge
//!   concurrently. A report is accepted only when its generation is newer.
//! - Every published configuration and every accepted report is persisted to
//!   the backing [`ClusterStore`] before subscribers are woken through
//!   `tokio::sync::watch` channels.
//! - All waits are bounded by the injected [`Clock`] and are cancelled by
//!   dropping the returned future.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;

use crate::core::ClusterState;
use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::ConfigurationDelta;
use crate::core::Node;
use crate::core::NodeId;
use crate::core::NodeState;
use crate::core::configuration::validate_identifier;
use crate::interfaces::Clock;
use crate::interfaces::ClusterStore;
use crate::interfaces::ControlError;
use crate::interfaces::ReportOutcome;
use crate::interfaces::StoreError;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditEventKind;
use crate::runtime::audit::AuditSink;

// ============================================================================
// SECTION: Node Slots
// ============================================================================

/// Per-node report slot guarded by its own lock.
#[derive(Debug, Default)]
struct NodeSlot {
    /// Latest accepted report.
    state: Option<NodeState>,
    /// Set once the node is deregistered; later reports are rejected.
    retired: bool,
}

/// Shared handle to a node slot.
type SlotHandle = Arc<Mutex<NodeSlot>>;

// ============================================================================
// SECTION: Control Service
// ============================================================================

/// Central store of desired configuration and observed cluster state.
///
/// # Invariants
/// - Published configuration versions increase by exactly one per proposal.
/// - A node's recorded generation never decreases.
/// - Nothing is published to subscribers before the backing store accepted it.
pub struct ControlService {
    /// Durable backing store.
    store: Arc<dyn ClusterStore>,
    /// Injected time source for deadlines and audit timestamps.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Serializes configuration and node registry writes.
    write_lock: Mutex<()>,
    /// Registered nodes.
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    /// Per-node report slots.
    slots: RwLock<BTreeMap<NodeId, SlotHandle>>,
    /// Current configuration; subscribers observe every publish.
    configuration: watch::Sender<Arc<Configuration>>,
    /// Current cluster state revision; bumped on every state change.
    revision: watch::Sender<u64>,
    /// Set when the service is shutting down.
    closed: AtomicBool,
}

impl ControlService {
    /// Opens a control service over `store`, restoring persisted state.
    ///
    /// The state revision resumes above the highest persisted one, so
    /// long-polls started before a restart see the restored state.
    ///
    /// When the store holds no configuration yet, the empty configuration at
    /// [`ConfigVersion::INITIAL`] is persisted first.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Store`] when the store cannot be loaded, or
    /// when the persisted configuration references unknown nodes.
    pub fn open(
        store: Arc<dyn ClusterStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ControlError> {
        let snapshot = store.load().map_err(store_error)?;
        let configuration = match snapshot.configuration {
            Some(configuration) => {
                configuration.validate(&snapshot.nodes).map_err(|err| {
                    ControlError::Store(format!("persisted configuration is invalid: {err}"))
                })?;
                configuration
            }
            None => {
                let initial = Configuration::empty();
                store.save_configuration(&initial).map_err(store_error)?;
                initial
            }
        };
        let mut slots = BTreeMap::new();
        for node_id in snapshot.nodes.keys() {
            let slot = NodeSlot {
                state: snapshot.node_states.get(node_id).cloned(),
                retired: false,
            };
            slots.insert(node_id.clone(), Arc::new(Mutex::new(slot)));
        }
        let (configuration, _) = watch::channel(Arc::new(configuration));
        // Concurrent reports may each persist a revision one short of the
        // published one, so resume past every restored report.
        let restored = u64::try_from(snapshot.node_states.len()).unwrap_or(u64::MAX);
        let (revision, _) = watch::channel(snapshot.state_revision.saturating_add(restored));
        Ok(Self {
            store,
            clock,
            audit,
            write_lock: Mutex::new(()),
            nodes: RwLock::new(snapshot.nodes),
            slots: RwLock::new(slots),
            configuration,
            revision,
            closed: AtomicBool::new(false),
        })
    }

    /// Marks the service closed and wakes every waiter.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.configuration.send_modify(|_| {});
        self.revision.send_modify(|_| {});
    }

    /// Returns the injected clock.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // ------------------------------------------------------------------------
    // Node registry
    // ------------------------------------------------------------------------

    /// Registers a node.
    ///
    /// Registering an identical record again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Validation`] for malformed identifiers or when
    /// the node is already registered with a different address, and
    /// [`ControlError::Store`] when persistence fails.
    pub fn register_node(&self, node: Node) -> Result<(), ControlError> {
        self.ensure_open()?;
        validate_identifier("node_id", node.node_id.as_str())
            .map_err(|err| ControlError::Validation(err.to_string()))?;
        let _write = self.write_lock.lock().map_err(|_| poisoned("configuration write"))?;
        {
            let nodes = self.nodes.read().map_err(|_| poisoned("node registry"))?;
            if let Some(existing) = nodes.get(&node.node_id) {
                if existing == &node {
                    return Ok(());
                }
                return Err(ControlError::Validation(format!(
                    "node {} is already registered with address {}",
                    existing.node_id, existing.address
                )));
            }
        }
        self.store.save_node(&node).map_err(store_error)?;
        self.slots
            .write()
            .map_err(|_| poisoned("node slots"))?
            .insert(node.node_id.clone(), Arc::new(Mutex::new(NodeSlot::default())));
        self.nodes
            .write()
            .map_err(|_| poisoned("node registry"))?
            .insert(node.node_id.clone(), node.clone());
        self.audit.record(
            &AuditEvent::new(AuditEventKind::NodeRegistered, self.clock.now())
                .with_node(&node.node_id),
        );
        Ok(())
    }

    /// Deregisters a node and drops its reported state.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Validation`] when the node is unknown or still
    /// referenced by the configuration, and [`ControlError::Store`] when
    /// persistence fails.
    pub fn deregister_node(&self, node_id: &NodeId) -> Result<(), ControlError> {
        self.ensure_open()?;
        let _write = self.write_lock.lock().map_err(|_| poisoned("configuration write"))?;
        if !self.nodes.read().map_err(|_| poisoned("node registry"))?.contains_key(node_id) {
            return Err(ControlError::Validation(format!("unknown node: {node_id}")));
        }
        if self.configuration.borrow().references_node(node_id) {
            return Err(ControlError::Validation(format!(
                "node {node_id} is still referenced by the configuration"
            )));
        }
        self.store.remove_node(node_id).map_err(store_error)?;
        let slot = self.slots.write().map_err(|_| poisoned("node slots"))?.remove(node_id);
        if let Some(slot) = slot {
            let mut slot = slot.lock().map_err(|_| poisoned("node slot"))?;
            slot.retired = true;
            slot.state = None;
        }
        self.nodes.write().map_err(|_| poisoned("node registry"))?.remove(node_id);
        self.bump_revision();
        self.audit.record(
            &AuditEvent::new(AuditEventKind::NodeDeregistered, self.clock.now()).with_node(node_id),
        );
        Ok(())
    }

    /// Returns the registered nodes.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Store`] when the registry lock is poisoned.
    pub fn nodes(&self) -> Result<Vec<Node>, ControlError> {
        Ok(self.nodes.read().map_err(|_| poisoned("node registry"))?.values().cloned().collect())
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Returns the currently published configuration.
    #[must_use]
    pub fn current_configuration(&self) -> Arc<Configuration> {
        Arc::clone(&self.configuration.borrow())
    }

    /// Subscribes to configuration publications.
    #[must_use]
    pub fn subscribe_configuration(&self) -> watch::Receiver<Arc<Configuration>> {
        self.configuration.subscribe()
    }

    /// Applies a delta and publishes the resulting configuration.
    ///
    /// Checks run in order and all precede any mutation: empty delta, empty
    /// cluster, version conflict, then validation of the result.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Validation`], [`ControlError::EmptyCluster`],
    /// [`ControlError::Conflict`], [`ControlError::Store`], or
    /// [`ControlError::Closed`].
    pub fn propose(&self, delta: &ConfigurationDelta) -> Result<ConfigVersion, ControlError> {
        let result = self.propose_inner(delta);
        let now = self.clock.now();
        match &result {
            Ok(version) => self.audit.record(
                &AuditEvent::new(AuditEventKind::ProposalAccepted, now).with_version(*version),
            ),
            Err(err) => self.audit.record(
                &AuditEvent::new(AuditEventKind::ProposalRejected, now)
                    .with_version(delta.base_version)
                    .with_error(error_kind(err), err.to_string()),
            ),
        }
        result
    }

    /// Proposal body without auditing.
    fn propose_inner(&self, delta: &ConfigurationDelta) -> Result<ConfigVersion, ControlError> {
        self.ensure_open()?;
        if delta.changes.is_empty() {
            return Err(ControlError::Validation("delta contains no changes".to_string()));
        }
        let _write = self.write_lock.lock().map_err(|_| poisoned("configuration write"))?;
        let nodes = self.nodes.read().map_err(|_| poisoned("node registry"))?.clone();
        if nodes.is_empty() && delta.requires_placement() {
            return Err(ControlError::EmptyCluster);
        }
        let current = self.current_configuration();
        if delta.base_version != current.version {
            return Err(ControlError::Conflict {
                expected: delta.base_version,
                actual: current.version,
            });
        }
        let next = current
            .apply(&delta.changes, &nodes)
            .map_err(|err| ControlError::Validation(err.to_string()))?;
        self.store.save_configuration(&next).map_err(store_error)?;
        let version = next.version;
        self.configuration.send_replace(Arc::new(next));
        Ok(version)
    }

    /// Waits for a configuration newer than `after`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses on the injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Closed`] when the service shuts down.
    pub async fn wait_for_configuration(
        &self,
        after: ConfigVersion,
        timeout: Duration,
    ) -> Result<Option<Arc<Configuration>>, ControlError> {
        let deadline = self.clock.now().saturating_add(timeout);
        let mut receiver = self.configuration.subscribe();
        loop {
            {
                let current = receiver.borrow_and_update();
                if current.version > after {
                    return Ok(Some(Arc::clone(&current)));
                }
            }
            self.ensure_open()?;
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(ControlError::Closed);
                    }
                }
                () = self.clock.sleep_until(deadline) => return Ok(None),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Observed state
    // ------------------------------------------------------------------------

    /// Merges a node report into the cluster state.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Validation`] for unknown nodes and
    /// [`ControlError::Store`] when persistence fails.
    pub fn report_state(&self, state: NodeState) -> Result<ReportOutcome, ControlError> {
        self.ensure_open()?;
        let node_id = state.node_id.clone();
        let generation = state.generation;
        let slot = self
            .slots
            .read()
            .map_err(|_| poisoned("node slots"))?
            .get(&node_id)
            .cloned()
            .ok_or_else(|| ControlError::Validation(format!("unknown node: {node_id}")))?;
        let mut slot = slot.lock().map_err(|_| poisoned("node slot"))?;
        if slot.retired {
            return Err(ControlError::Validation(format!("unknown node: {node_id}")));
        }
        if let Some(existing) = &slot.state
            && generation <= existing.generation
        {
            let recorded = existing.generation;
            drop(slot);
            self.audit.record(
                &AuditEvent::new(AuditEventKind::ReportStale, self.clock.now())
                    .with_node(&node_id)
                    .with_generation(generation),
            );
            return Ok(ReportOutcome::Stale {
                recorded,
            });
        }
        let provisional = self.revision.borrow().saturating_add(1);
        self.store.save_node_state(&state, provisional).map_err(store_error)?;
        let observed_version = state.observed_version;
        slot.state = Some(state);
        let revision = self.bump_revision();
        drop(slot);
        self.audit.record(
            &AuditEvent::new(AuditEventKind::ReportAccepted, self.clock.now())
                .with_node(&node_id)
                .with_generation(generation)
                .with_version(observed_version),
        );
        Ok(ReportOutcome::Accepted {
            revision,
        })
    }

    /// Returns a snapshot of the cluster state.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Store`] when a state lock is poisoned.
    pub fn current_state(&self) -> Result<ClusterState, ControlError> {
        let revision = *self.revision.borrow();
        let slots: Vec<SlotHandle> =
            self.slots.read().map_err(|_| poisoned("node slots"))?.values().cloned().collect();
        let mut nodes = BTreeMap::new();
        for slot in slots {
            let slot = slot.lock().map_err(|_| poisoned("node slot"))?;
            if let Some(state) = &slot.state {
                nodes.insert(state.node_id.clone(), state.clone());
            }
        }
        Ok(ClusterState {
            revision,
            nodes,
        })
    }

    /// Subscribes to cluster state revisions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Waits for a cluster state newer than `after_revision`.
    ///
    /// Returns `Ok(None)` when `timeout` elapses on the injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Closed`] when the service shuts down.
    pub async fn wait_for_state(
        &self,
        after_revision: u64,
        timeout: Duration,
    ) -> Result<Option<ClusterState>, ControlError> {
        let deadline = self.clock.now().saturating_add(timeout);
        let mut receiver = self.revision.subscribe();
        loop {
            let revision = *receiver.borrow_and_update();
            if revision > after_revision {
                return self.current_state().map(Some);
            }
            self.ensure_open()?;
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(ControlError::Closed);
                    }
                }
                () = self.clock.sleep_until(deadline) => return Ok(None),
            }
        }
    }

    /// Waits until `predicate` holds for the cluster state.
    ///
    /// The predicate is re-evaluated on every state change. Dropping the
    /// returned future cancels the wait and releases its subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Timeout`] carrying the convergence report of
    /// the last observed state when `timeout` elapses on the injected clock,
    /// and [`ControlError::Closed`] when the service shuts down.
    pub async fn await_convergence<P>(
        &self,
        predicate: P,
        timeout: Duration,
    ) -> Result<ClusterState, ControlError>
    where
        P: Fn(&ClusterState) -> bool + Send,
    {
        let deadline = self.clock.now().saturating_add(timeout);
        let mut receiver = self.revision.subscribe();
        loop {
            let _seen = *receiver.borrow_and_update();
            let state = self.current_state()?;
            if predicate(&state) {
                return Ok(state);
            }
            self.ensure_open()?;
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return Err(ControlError::Closed);
                    }
                }
                () = self.clock.sleep_until(deadline) => {
                    let state = self.current_state()?;
                    if predicate(&state) {
                        return Ok(state);
                    }
                    let report = self.current_configuration().convergence(&state);
                    return Err(ControlError::Timeout(Box::new(report)));
                }
            }
        }
    }

    /// Waits until the cluster matches the current configuration.
    ///
    /// # Errors
    ///
    /// See [`ControlService::await_convergence`].
    pub async fn await_configuration_converged(
        &self,
        timeout: Duration,
    ) -> Result<ClusterState, ControlError> {
        self.await_convergence(
            |state| self.current_configuration().convergence(state).is_converged(),
            timeout,
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Fails with [`ControlError::Closed`] after shutdown.
    fn ensure_open(&self) -> Result<(), ControlError> {
        if self.closed.load(Ordering::SeqCst) { Err(ControlError::Closed) } else { Ok(()) }
    }

    /// Increments the state revision, waking subscribers.
    fn bump_revision(&self) -> u64 {
        let mut revision = 0;
        self.revision.send_modify(|current| {
            *current = current.saturating_add(1);
            revision = *current;
        });
        revision
    }
}

// ============================================================================
// SECTION: Error Helpers
// ============================================================================

/// Maps a poisoned lock into a store error.
fn poisoned(what: &str) -> ControlError {
    ControlError::Store(format!("{what} lock poisoned"))
}

/// Maps a backing store error.
fn store_error(err: StoreError) -> ControlError {
    ControlError::Store(err.to_string())
}

/// Returns the stable label for a control error.
#[must_use]
pub const fn error_kind(err: &ControlError) -> &'static str {
    match err {
        ControlError::EmptyCluster => "empty_cluster",
        ControlError::Conflict { .. } => "conflict",
        ControlError::Validation(_) => "validation",
        ControlError::Timeout(_) => "timeout",
        ControlError::Store(_) => "store",
        ControlError::Closed => "closed",
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::core::ConfigurationChange;
    use crate::core::ContainerName;
    use crate::core::ContainerSpec;
    use crate::core::ImageRef;
    use crate::core::Timestamp;
    use crate::runtime::audit::MemoryAuditSink;
    use crate::runtime::clock::ManualClock;
    use crate::runtime::store::InMemoryClusterStore;

    fn service() -> (ControlService, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let service = ControlService::open(
            Arc::new(InMemoryClusterStore::new()),
            Arc::new(ManualClock::new()),
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        )
        .expect("open");
        (service, audit)
    }

    fn node(id: &str) -> Node {
        Node::new(NodeId::new(id), IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn add_web(base: ConfigVersion, node_id: &str) -> ConfigurationDelta {
        ConfigurationDelta::new(base).with(ConfigurationChange::AddContainer {
            container: ContainerSpec::new(
                ContainerName::new("web"),
                ImageRef::new("nginx"),
                NodeId::new(node_id),
            ),
        })
    }

    #[test]
    fn open_persists_initial_configuration() {
        let store = Arc::new(InMemoryClusterStore::new());
        let service = ControlService::open(
            Arc::clone(&store) as Arc<dyn ClusterStore>,
            Arc::new(ManualClock::new()),
            Arc::new(crate::runtime::audit::NoopAuditSink),
        )
        .unwrap();
        assert_eq!(service.current_configuration().version, ConfigVersion::INITIAL);
        assert_eq!(store.configuration_count().unwrap(), 1);
    }

    #[test]
    fn register_node_is_idempotent_and_immutable() {
        let (service, audit) = service();
        service.register_node(node("n1")).unwrap();
        service.register_node(node("n1")).unwrap();
        let moved = Node::new(NodeId::new("n1"), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(matches!(service.register_node(moved), Err(ControlError::Validation(_))));
        assert_eq!(audit.events_of(AuditEventKind::NodeRegistered).len(), 1);
    }

    #[test]
    fn propose_checks_run_in_order() {
        let (service, _) = service();
        assert!(matches!(
            service.propose(&ConfigurationDelta::new(ConfigVersion::new(9))),
            Err(ControlError::Validation(_))
        ));
        assert_eq!(
            service.propose(&add_web(ConfigVersion::new(9), "n1")),
            Err(ControlError::EmptyCluster)
        );
        service.register_node(node("n1")).unwrap();
        assert_eq!(
            service.propose(&add_web(ConfigVersion::new(9), "n1")),
            Err(ControlError::Conflict {
                expected: ConfigVersion::new(9),
                actual: ConfigVersion::INITIAL,
            })
        );
        assert!(matches!(
            service.propose(&add_web(ConfigVersion::INITIAL, "missing")),
            Err(ControlError::Validation(_))
        ));
        assert_eq!(service.current_configuration().version, ConfigVersion::INITIAL);
        assert_eq!(
            service.propose(&add_web(ConfigVersion::INITIAL, "n1")),
            Ok(ConfigVersion::new(1))
        );
    }

    #[test]
    fn removal_on_empty_cluster_is_validated_not_empty_cluster() {
        let (service, _) = service();
        let delta = ConfigurationDelta::new(ConfigVersion::INITIAL).with(
            ConfigurationChange::RemoveContainer {
                name: ContainerName::new("ghost"),
            },
        );
        assert!(matches!(service.propose(&delta), Err(ControlError::Validation(_))));
    }

    #[test]
    fn stale_and_duplicate_reports_are_discarded() {
        let (service, audit) = service();
        service.register_node(node("n1")).unwrap();
        let report = |generation| {
            NodeState::new(NodeId::new("n1"), generation, ConfigVersion::INITIAL, Timestamp::EPOCH)
        };
        assert_eq!(
            service.report_state(report(5)).unwrap(),
            ReportOutcome::Accepted {
                revision: 1
            }
        );
        assert_eq!(
            service.report_state(report(5)).unwrap(),
            ReportOutcome::Stale {
                recorded: 5
            }
        );
        assert_eq!(
            service.report_state(report(4)).unwrap(),
            ReportOutcome::Stale {
                recorded: 5
            }
        );
        let state = service.current_state().unwrap();
        assert_eq!(state.revision, 1);
        assert_eq!(state.nodes[&NodeId::new("n1")].generation, 5);
        assert_eq!(audit.events_of(AuditEventKind::ReportStale).len(), 2);
    }

    #[test]
    fn report_from_unknown_node_is_rejected() {
        let (service, _) = service();
        let report =
            NodeState::new(NodeId::new("ghost"), 1, ConfigVersion::INITIAL, Timestamp::EPOCH);
        assert!(matches!(service.report_state(report), Err(ControlError::Validation(_))));
    }

    #[test]
    fn deregister_referenced_node_is_rejected() {
        let (service, _) = service();
        service.register_node(node("n1")).unwrap();
        service.propose(&add_web(ConfigVersion::INITIAL, "n1")).unwrap();
        assert!(matches!(
            service.deregister_node(&NodeId::new("n1")),
            Err(ControlError::Validation(_))
        ));
        let remove = ConfigurationDelta::new(ConfigVersion::new(1)).with(
            ConfigurationChange::RemoveContainer {
                name: ContainerName::new("web"),
            },
        );
        service.propose(&remove).unwrap();
        service.deregister_node(&NodeId::new("n1")).unwrap();
        assert!(service.nodes().unwrap().is_empty());
    }

    #[test]
    fn shutdown_closes_writes() {
        let (service, _) = service();
        service.shutdown();
        assert_eq!(service.register_node(node("n1")), Err(ControlError::Closed));
    }
}
