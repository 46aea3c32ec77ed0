// crates/flotilla-diagnostics/tests/archive_contract.rs
// ============================================================================
// Module: Diagnostics Archive Contract Tests
// Description: Exported archives hold exactly the fixed entry set.
// Purpose: Exercise bundle assembly, file export, and verification together.
// Dependencies: flotilla-diagnostics, flate2, tar, tempfile
// ============================================================================

//! Diagnostics archive contract tests.

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
use std::io::Read;

use flate2::read::GzDecoder;
use flotilla_core::Timestamp;
use flotilla_diagnostics::ARCHIVE_ENTRIES;
use flotilla_diagnostics::DiagnosticsBundle;
use flotilla_diagnostics::DiagnosticsError;
use flotilla_diagnostics::DiagnosticsInputs;
use flotilla_diagnostics::HostFacts;
use flotilla_diagnostics::build_bundle;
use flotilla_diagnostics::verify_archive_entries;
use flotilla_diagnostics::verify_archive_file;
use tar::Archive;
use tar::EntryType;
use tar::Header;
use tempfile::TempDir;

fn sample_inputs() -> DiagnosticsInputs {
    let host = HostFacts {
        os_release: b"NAME=\"Test Linux\"\n".to_vec(),
        uname: b"linux 6.1.0 x86_64\n".to_vec(),
    };
    let mut inputs = DiagnosticsInputs::new(Timestamp::from_millis(1_700_000_000_123), host);
    inputs.control_service.insert("audit.jsonl".to_string(), b"{\"event\":\"x\"}\n".to_vec());
    inputs.control_service.insert("configuration.json".to_string(), b"{}".to_vec());
    inputs.container_agent.insert("node-1.log".to_string(), b"cycle ok\n".to_vec());
    inputs.syslog = b"Oct 19 12:00:00 host flotilla: started\n".to_vec();
    inputs
}

/// Reads all entries of an uncompressed tar into (path, type, bytes).
fn read_entries(bytes: &[u8]) -> Vec<(String, EntryType, Vec<u8>)> {
    let mut archive = Archive::new(bytes);
    let mut out = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let kind = entry.header().entry_type();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        out.push((path, kind, contents));
    }
    out
}

#[test]
fn exported_archive_contains_exactly_the_fixed_entries() {
    let bundle = build_bundle(&sample_inputs()).unwrap();
    let bytes = bundle.write_to(Vec::new()).unwrap();
    let verification = verify_archive_entries(bytes.as_slice()).unwrap();
    assert!(verification.is_complete(), "{verification}");

    let entries = read_entries(&bytes);
    assert_eq!(entries.len(), ARCHIVE_ENTRIES.len() + 1);
    assert_eq!(entries[0].0.trim_end_matches('/'), "flotilla-diagnostics-1700000000123");
    assert_eq!(entries[0].1, EntryType::Directory);
    for (path, kind, _) in &entries[1 ..] {
        assert_eq!(*kind, EntryType::Regular);
        assert!(path.starts_with("flotilla-diagnostics-1700000000123/"));
    }
}

#[test]
fn service_bundles_are_gzipped_tars_of_the_log_files() {
    let bundle = build_bundle(&sample_inputs()).unwrap();
    let bytes = bundle.write_to(Vec::new()).unwrap();
    let entries = read_entries(&bytes);
    let (_, _, control) =
        entries.iter().find(|(path, _, _)| path.ends_with("/control-service.tar.gz")).unwrap();

    let inner = read_entries_gz(control);
    let names: Vec<&str> = inner.iter().map(|(path, _, _)| path.as_str()).collect();
    assert_eq!(names, vec!["audit.jsonl", "configuration.json"]);

    let (_, _, syslog) =
        entries.iter().find(|(path, _, _)| path.ends_with("/syslog.gz")).unwrap();
    let mut decoded = String::new();
    GzDecoder::new(syslog.as_slice()).read_to_string(&mut decoded).unwrap();
    assert!(decoded.contains("flotilla: started"));

    let (_, _, version) =
        entries.iter().find(|(path, _, _)| path.ends_with("/flotilla-version")).unwrap();
    assert_eq!(String::from_utf8_lossy(version).trim(), env!("CARGO_PKG_VERSION"));
}

fn read_entries_gz(bytes: &[u8]) -> Vec<(String, EntryType, Vec<u8>)> {
    let mut decoded = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut decoded).unwrap();
    read_entries(&decoded)
}

#[test]
fn empty_service_logs_still_produce_every_entry() {
    let inputs = DiagnosticsInputs::new(Timestamp::from_millis(0), HostFacts::gather());
    let bundle = build_bundle(&inputs).unwrap();
    assert!(bundle.missing().is_empty());
    let bytes = bundle.write_to(Vec::new()).unwrap();
    assert!(verify_archive_entries(bytes.as_slice()).unwrap().is_complete());
}

#[test]
fn incomplete_bundle_refuses_to_write() {
    let mut bundle = DiagnosticsBundle::new("partial", 0).unwrap();
    bundle.insert("uname", b"linux\n".to_vec()).unwrap();
    match bundle.write_to(Vec::new()) {
        Err(DiagnosticsError::Incomplete(missing)) => {
            assert_eq!(missing.len(), ARCHIVE_ENTRIES.len() - 1);
            assert!(!missing.contains(&"uname".to_string()));
        }
        other => panic!("expected incomplete bundle, got {other:?}"),
    }
}

#[test]
fn bundle_rejects_unknown_and_duplicate_entries() {
    let mut bundle = DiagnosticsBundle::new("dup", 0).unwrap();
    assert!(matches!(
        bundle.insert("docker-info", Vec::new()),
        Err(DiagnosticsError::Invalid(message)) if message.contains("unknown archive entry")
    ));
    bundle.insert("uname", Vec::new()).unwrap();
    assert!(matches!(
        bundle.insert("uname", Vec::new()),
        Err(DiagnosticsError::Invalid(message)) if message.contains("duplicate archive entry")
    ));
}

#[test]
fn verifier_reports_missing_and_unexpected_entries() {
    let mut builder = tar::Builder::new(Vec::new());
    let names = ["uname", "os-release", "docker-info"];
    for name in names {
        let mut header = Header::new_gnu();
        header.set_size(1);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, format!("diag/{name}"), &b"x"[..]).unwrap();
    }
    let bytes = builder.into_inner().unwrap();
    let verification = verify_archive_entries(bytes.as_slice()).unwrap();
    assert_eq!(verification.unexpected.iter().collect::<Vec<_>>(), vec!["docker-info"]);
    assert_eq!(verification.missing.len(), ARCHIVE_ENTRIES.len() - 2);
    assert!(verification.missing.contains("syslog.gz"));
    assert!(!verification.missing.contains("uname"));
}

#[test]
fn verifier_skips_top_level_entries_and_counts_nested_ones() {
    let mut builder = tar::Builder::new(Vec::new());
    let mut append = |path: String, entry_type: EntryType| {
        let mut header = Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o755);
        header.set_entry_type(entry_type);
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
    };
    append("diag/".to_string(), EntryType::Directory);
    append("README".to_string(), EntryType::Regular);
    for name in ARCHIVE_ENTRIES {
        append(format!("diag/{name}"), EntryType::Regular);
    }
    append("diag/extra/".to_string(), EntryType::Directory);
    let bytes = builder.into_inner().unwrap();

    let verification = verify_archive_entries(bytes.as_slice()).unwrap();

    assert!(verification.missing.is_empty());
    assert_eq!(verification.unexpected.iter().collect::<Vec<_>>(), vec!["extra"]);
}

#[test]
fn export_to_file_then_verify_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.tar");
    let bundle = build_bundle(&sample_inputs()).unwrap();
    bundle.write_file(&path).unwrap();
    assert!(verify_archive_file(&path).unwrap().is_complete());
    assert!(matches!(bundle.write_file(&path), Err(DiagnosticsError::Io(_))));
}

#[test]
fn missing_syslog_file_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let mut inputs = sample_inputs();
    inputs.read_syslog(&dir.path().join("absent.log")).unwrap();
    assert!(!inputs.syslog.is_empty());
    let mut logs = BTreeMap::new();
    logs.insert("agent.log".to_string(), b"ok".to_vec());
    inputs.dataset_agent = logs;
    assert!(build_bundle(&inputs).is_ok());
}
