// crates/flotilla-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Integrity Unit Tests
// Description: Targeted integrity tests for the SQLite cluster store.
// Purpose: Validate path safety, schema versioning, append-only versions,
//          retention, and corruption detection.
// ============================================================================

//! ## Overview
//! Unit-level tests for `SQLite` store integrity invariants:
//! - Path safety checks (empty/directory rejection)
//! - Schema version validation
//! - Payload integrity and tamper detection
//! - Append-only configuration versions and retention pruning
//! - Node removal cascading to node reports
//! - Restoring a control service from disk

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use flotilla_core::ClusterStore;
use flotilla_core::ConfigVersion;
use flotilla_core::Configuration;
use flotilla_core::ConfigurationChange;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ContainerName;
use flotilla_core::ContainerSpec;
use flotilla_core::ControlService;
use flotilla_core::ImageRef;
use flotilla_core::ManualClock;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::NodeState;
use flotilla_core::StoreError;
use flotilla_core::Timestamp;
use flotilla_core::runtime::NoopAuditSink;
use flotilla_store_sqlite::SqliteClusterStore;
use flotilla_store_sqlite::SqliteStoreConfig;
use flotilla_store_sqlite::SqliteStoreError;
use flotilla_store_sqlite::SqliteStoreMode;
use flotilla_store_sqlite::SqliteSyncMode;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_at(path: &Path) -> SqliteClusterStore {
    SqliteClusterStore::new(SqliteStoreConfig::new(path)).expect("open store")
}

fn node(id: &str, octet: u8) -> Node {
    Node::new(NodeId::new(id), IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet)))
}

fn registry() -> BTreeMap<NodeId, Node> {
    BTreeMap::from([(NodeId::new("n1"), node("n1", 1))])
}

/// Returns configurations at versions 0..=last, one container added per step.
fn configuration_chain(last: u64) -> Vec<Configuration> {
    let nodes = registry();
    let mut chain = vec![Configuration::empty()];
    for index in 1..=last {
        let previous = chain.last().unwrap();
        let change = ConfigurationChange::AddContainer {
            container: ContainerSpec::new(
                ContainerName::new(format!("c{index}")),
                ImageRef::new("nginx"),
                NodeId::new("n1"),
            ),
        };
        chain.push(previous.apply(&[change], &nodes).unwrap());
    }
    chain
}

fn report(node_id: &str, generation: u64) -> NodeState {
    NodeState::new(
        NodeId::new(node_id),
        generation,
        ConfigVersion::INITIAL,
        Timestamp::from_millis(generation),
    )
}

// ============================================================================
// SECTION: Path Safety
// ============================================================================

#[test]
fn rejects_empty_path() {
    let result = SqliteClusterStore::new(SqliteStoreConfig::new(""));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn rejects_directory_path() {
    let dir = TempDir::new().unwrap();
    let result = SqliteClusterStore::new(SqliteStoreConfig::new(dir.path()));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn rejects_zero_retention() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path().join("store.db"));
    config.max_versions = Some(0);
    assert!(matches!(SqliteClusterStore::new(config), Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn creates_missing_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("state").join("store.db");
    let _store = store_at(&path);
    assert!(path.exists());
}

#[test]
fn delete_journal_and_normal_sync_are_accepted() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path().join("store.db"));
    config.journal_mode = SqliteStoreMode::Delete;
    config.sync_mode = SqliteSyncMode::Normal;
    let store = SqliteClusterStore::new(config).unwrap();
    assert_eq!(store.load().unwrap().configuration, None);
}

// ============================================================================
// SECTION: Schema
// ============================================================================

#[test]
fn rejects_unknown_schema_version() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    drop(store_at(&path));
    let connection = Connection::open(&path).unwrap();
    connection.execute("UPDATE store_meta SET version = ?1", params![99]).unwrap();
    drop(connection);

    let result = SqliteClusterStore::new(SqliteStoreConfig::new(&path));
    assert!(matches!(result, Err(SqliteStoreError::VersionMismatch(_))));
}

// ============================================================================
// SECTION: Round Trips
// ============================================================================

#[test]
fn snapshot_round_trips_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let chain = configuration_chain(2);
    {
        let store = store_at(&path);
        store.save_node(&node("n1", 1)).unwrap();
        for configuration in &chain {
            store.save_configuration(configuration).unwrap();
        }
        store.save_node_state(&report("n1", 4), 9).unwrap();
    }

    let snapshot = store_at(&path).load().unwrap();

    assert_eq!(snapshot.nodes, registry());
    assert_eq!(snapshot.configuration.as_ref(), chain.last());
    assert_eq!(snapshot.node_states.get(&NodeId::new("n1")), Some(&report("n1", 4)));
    assert_eq!(snapshot.state_revision, 9);
}

#[test]
fn node_state_upsert_keeps_latest_report() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    store.save_node(&node("n1", 1)).unwrap();
    store.save_node_state(&report("n1", 1), 5).unwrap();
    store.save_node_state(&report("n1", 2), 3).unwrap();

    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.node_states[&NodeId::new("n1")].generation, 2);
    assert_eq!(snapshot.state_revision, 5);
}

#[test]
fn node_state_for_unregistered_node_is_invalid() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    let result = store.save_node_state(&report("ghost", 1), 1);
    assert!(matches!(result, Err(StoreError::Invalid(message)) if message.contains("ghost")));
}

#[test]
fn removing_a_node_drops_its_report() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    store.save_node(&node("n1", 1)).unwrap();
    store.save_node(&node("n2", 2)).unwrap();
    store.save_node_state(&report("n1", 1), 1).unwrap();
    store.save_node_state(&report("n2", 1), 2).unwrap();

    store.remove_node(&NodeId::new("n1")).unwrap();

    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.nodes.len(), 1);
    assert!(!snapshot.node_states.contains_key(&NodeId::new("n1")));
    assert!(snapshot.node_states.contains_key(&NodeId::new("n2")));
}

// ============================================================================
// SECTION: Versions
// ============================================================================

#[test]
fn configuration_versions_are_append_only() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    let chain = configuration_chain(1);
    store.save_configuration(&chain[0]).unwrap();
    store.save_configuration(&chain[1]).unwrap();

    assert!(matches!(store.save_configuration(&chain[1]), Err(StoreError::Invalid(_))));
    assert!(matches!(store.save_configuration(&chain[0]), Err(StoreError::Invalid(_))));
    assert_eq!(store.list_configuration_versions().unwrap().len(), 2);
}

#[test]
fn historical_versions_can_be_loaded() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    let chain = configuration_chain(3);
    for configuration in &chain {
        store.save_configuration(configuration).unwrap();
    }

    let loaded = store.load_configuration_version(ConfigVersion::new(1)).unwrap();
    assert_eq!(loaded.as_ref(), Some(&chain[1]));
    assert_eq!(store.load_configuration_version(ConfigVersion::new(9)).unwrap(), None);

    let summaries = store.list_configuration_versions().unwrap();
    let versions: Vec<u64> = summaries.iter().map(|summary| summary.version.get()).collect();
    assert_eq!(versions, vec![0, 1, 2, 3]);
    assert!(summaries.iter().all(|summary| summary.document_hash.len() == 64));
}

#[test]
fn retention_keeps_newest_versions() {
    let dir = TempDir::new().unwrap();
    let mut config = SqliteStoreConfig::new(dir.path().join("store.db"));
    config.max_versions = Some(2);
    let store = SqliteClusterStore::new(config).unwrap();
    for configuration in &configuration_chain(3) {
        store.save_configuration(configuration).unwrap();
    }

    let versions: Vec<u64> = store
        .list_configuration_versions()
        .unwrap()
        .iter()
        .map(|summary| summary.version.get())
        .collect();
    assert_eq!(versions, vec![2, 3]);
    assert_eq!(store.load().unwrap().configuration.unwrap().version, ConfigVersion::new(3));
}

#[test]
fn prune_versions_deletes_older_rows() {
    let dir = TempDir::new().unwrap();
    let store = store_at(&dir.path().join("store.db"));
    for configuration in &configuration_chain(4) {
        store.save_configuration(configuration).unwrap();
    }

    assert!(store.prune_versions(0).is_err());
    assert_eq!(store.prune_versions(2).unwrap(), 3);
    assert_eq!(store.list_configuration_versions().unwrap().len(), 2);
}

// ============================================================================
// SECTION: Integrity
// ============================================================================

#[test]
fn tampered_configuration_fails_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let store = store_at(&path);
    for configuration in &configuration_chain(1) {
        store.save_configuration(configuration).unwrap();
    }
    drop(store);

    let connection = Connection::open(&path).unwrap();
    connection
        .execute(
            "UPDATE configurations SET document = ?1 WHERE version = 1",
            params![br#"{"containers":{},"datasets":{},"version":1}"#.as_slice()],
        )
        .unwrap();
    drop(connection);

    let result = store_at(&path).load();
    assert!(matches!(result, Err(StoreError::Corrupt(_))));
}

#[test]
fn tampered_node_address_fails_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    store_at(&path).save_node(&node("n1", 1)).unwrap();

    let connection = Connection::open(&path).unwrap();
    connection.execute("UPDATE nodes SET address = 'not-an-ip'", params![]).unwrap();
    drop(connection);

    assert!(matches!(store_at(&path).load(), Err(StoreError::Corrupt(_))));
}

// ============================================================================
// SECTION: Concurrency and Restore
// ============================================================================

#[test]
fn concurrent_reports_for_different_nodes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(store_at(&dir.path().join("store.db")));
    for octet in 1..=4u8 {
        store.save_node(&node(&format!("n{octet}"), octet)).unwrap();
    }

    let handles: Vec<_> = (1..=4u8)
        .map(|octet| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for generation in 1..=10 {
                    let revision = u64::from(octet) * 100 + generation;
                    let state = report(&format!("n{octet}"), generation);
                    store.save_node_state(&state, revision).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = store.load().unwrap();
    assert_eq!(snapshot.node_states.len(), 4);
    assert!(snapshot.node_states.values().all(|state| state.generation == 10));
    assert_eq!(snapshot.state_revision, 410);
}

#[test]
fn control_service_restores_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let clock = Arc::new(ManualClock::new());
    {
        let service = ControlService::open(
            Arc::new(store_at(&path)),
            Arc::clone(&clock) as _,
            Arc::new(NoopAuditSink),
        )
        .unwrap();
        service.register_node(node("n1", 1)).unwrap();
        let delta = ConfigurationDelta::new(ConfigVersion::INITIAL).with(
            ConfigurationChange::AddContainer {
                container: ContainerSpec::new(
                    ContainerName::new("web"),
                    ImageRef::new("nginx"),
                    NodeId::new("n1"),
                ),
            },
        );
        service.propose(&delta).unwrap();
        service.report_state(report("n1", 1)).unwrap();
        service.report_state(report("n1", 2)).unwrap();
        assert_eq!(service.current_state().unwrap().revision, 2);
    }

    let service =
        ControlService::open(Arc::new(store_at(&path)), clock as _, Arc::new(NoopAuditSink))
            .unwrap();
    let configuration = service.current_configuration();
    assert_eq!(configuration.version, ConfigVersion::new(1));
    assert!(configuration.containers.contains_key(&ContainerName::new("web")));
    assert_eq!(service.nodes().unwrap(), vec![node("n1", 1)]);
    let state = service.current_state().unwrap();
    assert!(state.revision >= 2, "revision restarted at {}", state.revision);
    assert_eq!(state.node(&NodeId::new("n1")), Some(&report("n1", 2)));
}
