// crates/flotilla-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and CLI helpers.
// Purpose: Keep the command surface and input handling stable.
// Dependencies: flotilla-cli main helpers, clap, flotilla-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Validates command parsing, bounded reads, delta decoding, configuration
//! history inspection, and audit log splitting for diagnostics export.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::net::Ipv4Addr;

use clap::Parser;
use flotilla_config::FlotillaConfig;
use flotilla_config::StoreConfig;
use flotilla_config::StoreType;
use flotilla_core::ClusterStore;
use flotilla_core::ConfigVersion;
use flotilla_core::Configuration;
use flotilla_core::ConfigurationChange;
use flotilla_core::ContainerName;
use flotilla_core::ContainerSpec;
use flotilla_core::ImageRef;
use flotilla_core::Node;
use flotilla_core::NodeId;

use super::Cli;
use super::Commands;
use super::ConfigCommand;
use super::DEFAULT_CONTROL_URL;
use super::DiagnosticsCommand;
use super::HistoryCommand;
use super::history_report;
use super::open_history_store;
use super::read_bounded;
use super::read_delta;
use super::split_audit_log;

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn propose_parses_delta_and_rebase() {
    let cli = Cli::try_parse_from([
        "flotilla",
        "propose",
        "--control-url",
        "http://10.0.0.1:4523",
        "--delta",
        "delta.json",
        "--rebase",
    ])
    .unwrap();
    let Commands::Propose(command) = cli.command else {
        panic!("expected propose");
    };
    assert_eq!(command.control.control_url, "http://10.0.0.1:4523");
    assert_eq!(command.delta.to_str(), Some("delta.json"));
    assert!(command.rebase);
}

#[test]
fn client_commands_default_control_url() {
    let cli = Cli::try_parse_from(["flotilla", "state", "--convergence"]).unwrap();
    let Commands::State(command) = cli.command else {
        panic!("expected state");
    };
    assert_eq!(command.control.control_url, DEFAULT_CONTROL_URL);
    assert!(command.convergence);

    let cli = Cli::try_parse_from(["flotilla", "wait"]).unwrap();
    let Commands::Wait(command) = cli.command else {
        panic!("expected wait");
    };
    assert_eq!(command.timeout_ms, 60_000);
}

#[test]
fn probe_overrides_are_optional() {
    let cli = Cli::try_parse_from(["flotilla", "probe", "--image", "alpine", "--prefetch-image"])
        .unwrap();
    let Commands::Probe(command) = cli.command else {
        panic!("expected probe");
    };
    assert_eq!(command.image.as_deref(), Some("alpine"));
    assert_eq!(command.timeout_ms, None);
    assert!(command.prefetch_image);
    assert!(command.config.is_none());
}

#[test]
fn nested_subcommands_parse() {
    let cli = Cli::try_parse_from(["flotilla", "config", "validate", "--config", "x.toml"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommand::Validate(_)
        }
    ));

    let cli =
        Cli::try_parse_from(["flotilla", "diagnostics", "verify", "--archive", "a.tar.gz"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Diagnostics {
            command: DiagnosticsCommand::Verify(_)
        }
    ));
}

#[test]
fn history_subcommands_parse() {
    let cli =
        Cli::try_parse_from(["flotilla", "history", "show", "--config", "x.toml", "--version", "4"])
            .unwrap();
    let Commands::History {
        command: HistoryCommand::Show(show),
    } = cli.command
    else {
        panic!("expected history show");
    };
    assert_eq!(show.version, 4);
    assert_eq!(show.config.config.as_ref().and_then(|path| path.to_str()), Some("x.toml"));

    assert!(Cli::try_parse_from(["flotilla", "history", "prune"]).is_err());
    assert!(Cli::try_parse_from(["flotilla", "history", "list"]).is_ok());
}

#[test]
fn propose_requires_delta() {
    assert!(Cli::try_parse_from(["flotilla", "propose"]).is_err());
    assert!(Cli::try_parse_from(["flotilla", "diagnostics", "export"]).is_err());
}

// ============================================================================
// SECTION: History
// ============================================================================

/// Returns a config selecting a sqlite store at `path`.
fn sqlite_config(path: &std::path::Path) -> FlotillaConfig {
    FlotillaConfig {
        store: StoreConfig {
            store_type: StoreType::Sqlite,
            path: Some(path.to_path_buf()),
            ..StoreConfig::default()
        },
        ..FlotillaConfig::default()
    }
}

/// Saves versions 0..=3, one container added per version.
fn seed_history(store: &flotilla_store_sqlite::SqliteClusterStore) {
    let node_id = NodeId::new("n1");
    let nodes = BTreeMap::from([(
        node_id.clone(),
        Node::new(node_id.clone(), IpAddr::V4(Ipv4Addr::LOCALHOST)),
    )]);
    store.save_node(&nodes[&node_id]).unwrap();
    let mut configuration = Configuration::empty();
    store.save_configuration(&configuration).unwrap();
    for index in 1..=3 {
        let change = ConfigurationChange::AddContainer {
            container: ContainerSpec::new(
                ContainerName::new(format!("c{index}")),
                ImageRef::new("nginx"),
                node_id.clone(),
            ),
        };
        configuration = configuration.apply(&[change], &nodes).unwrap();
        store.save_configuration(&configuration).unwrap();
    }
}

#[test]
fn history_lists_shows_and_prunes_stored_versions() {
    let dir = tempfile::tempdir().unwrap();
    let config = sqlite_config(&dir.path().join("store.db"));
    let store = open_history_store(&config).unwrap();
    seed_history(&store);
    let args = || super::ConfigArgs {
        config: None,
    };

    let listed = history_report(&store, &HistoryCommand::List(args())).unwrap();
    let versions: Vec<u64> =
        listed.as_array().unwrap().iter().map(|entry| entry["version"].as_u64().unwrap()).collect();
    assert_eq!(versions, vec![0, 1, 2, 3]);

    let show = |version| {
        HistoryCommand::Show(super::HistoryShowCommand {
            config: args(),
            version,
        })
    };
    let shown = history_report(&store, &show(2)).unwrap();
    assert_eq!(shown["version"].as_u64(), Some(2));
    assert_eq!(shown["containers"].as_object().map(serde_json::Map::len), Some(2));

    let pruned = history_report(
        &store,
        &HistoryCommand::Prune(super::HistoryPruneCommand {
            config: args(),
            keep: 2,
        }),
    )
    .unwrap();
    assert_eq!(pruned["deleted"].as_u64(), Some(2));
    let err = history_report(&store, &show(1)).unwrap_err();
    assert!(err.to_string().contains("configuration version 1 is not stored"), "{err}");
    assert_eq!(store.load().unwrap().configuration.map(|current| current.version.get()), Some(3));
}

#[test]
fn history_requires_a_sqlite_store() {
    let err = open_history_store(&FlotillaConfig::default()).unwrap_err();
    assert!(err.to_string().contains("requires a sqlite store"), "{err}");
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

#[test]
fn read_bounded_rejects_oversized_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.json");
    fs::write(&path, vec![b'x'; 64]).unwrap();
    assert_eq!(read_bounded(&path, 64).unwrap().len(), 64);
    let err = read_bounded(&path, 63).unwrap_err();
    assert!(err.to_string().contains("exceeds size limit"), "{err}");
}

#[test]
fn read_delta_decodes_tagged_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delta.json");
    fs::write(
        &path,
        r#"{"base_version": 3, "changes": [{"op": "remove_container", "name": "web"}]}"#,
    )
    .unwrap();
    let delta = read_delta(&path).unwrap();
    assert_eq!(delta.base_version, ConfigVersion::new(3));
    assert!(matches!(delta.changes.as_slice(), [ConfigurationChange::RemoveContainer { .. }]));

    fs::write(&path, "{\"base_version\": ").unwrap();
    let err = read_delta(&path).unwrap_err();
    assert!(err.to_string().starts_with("invalid delta"), "{err}");
}

#[test]
fn audit_log_splits_agent_events() {
    let log = concat!(
        "{\"event\":\"proposal_accepted\",\"version\":1}\n",
        "{\"event\":\"agent_cycle_completed\",\"node_id\":\"n1\"}\n",
        "\n",
        "not json\n",
        "{\"event\":\"agent_report_failed\"}\n",
    );
    let (control, agent) = split_audit_log(log.as_bytes());
    assert_eq!(
        String::from_utf8(control).unwrap(),
        "{\"event\":\"proposal_accepted\",\"version\":1}\nnot json\n"
    );
    assert_eq!(
        String::from_utf8(agent).unwrap(),
        "{\"event\":\"agent_cycle_completed\",\"node_id\":\"n1\"}\n{\"event\":\"agent_report_failed\"}\n"
    );
}
