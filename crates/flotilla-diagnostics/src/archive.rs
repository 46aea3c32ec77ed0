// crates/flotilla-diagnostics/src/archive.rs
// ============================================================================
// Module: Diagnostics Archive
// Description: Tar archive builder and entry verifier for diagnostics exports.
// Purpose: Produce and check archives holding exactly the fixed entry set.
// Dependencies: flate2, tar, serde
// ============================================================================

//! ## Overview
//! A diagnostics archive is an uncompressed tar whose first entry is a single
//! top-level directory. Every other entry is a regular file inside it, and the
//! set of file basenames is exactly [`ARCHIVE_ENTRIES`]. Per-service log
//! bundles inside the archive are themselves gzip-compressed tars.
//!
//! [`DiagnosticsBundle`] refuses to write an archive that is missing an entry
//! or carries an unknown one. [`verify_archive_entries`] checks an archive
//! produced elsewhere and reports both directions of mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde::Serialize;
use tar::Archive;
use tar::Builder;
use tar::EntryType;
use tar::Header;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Basenames every diagnostics archive contains, and nothing else.
pub const ARCHIVE_ENTRIES: [&str; 10] = [
    "control-service.tar.gz",
    "dataset-agent.tar.gz",
    "container-agent.tar.gz",
    "flotilla-version",
    "runtime-info",
    "runtime-version",
    "os-release",
    "syslog.gz",
    "uname",
    "service-status",
];

/// Maximum number of entries read while verifying an archive.
const MAX_VERIFY_ENTRIES: usize = 4_096;

/// Maximum length of the archive's top-level directory name.
const MAX_DIRECTORY_NAME_LENGTH: usize = 255;

/// File mode for archive entries.
const ENTRY_MODE: u32 = 0o644;

/// Directory mode for the top-level entry.
const DIRECTORY_MODE: u32 = 0o755;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Diagnostics export and verification errors.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// I/O failure while reading or writing an archive.
    #[error("diagnostics io error: {0}")]
    Io(String),
    /// Invalid entry name, duplicate entry, or malformed archive.
    #[error("diagnostics invalid: {0}")]
    Invalid(String),
    /// The bundle does not hold every required entry.
    #[error("diagnostics bundle incomplete: missing {}", .0.join(", "))]
    Incomplete(Vec<String>),
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Result of comparing an archive's entries against [`ARCHIVE_ENTRIES`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveVerification {
    /// Required basenames absent from the archive.
    pub missing: BTreeSet<String>,
    /// Basenames present in the archive but not required.
    pub unexpected: BTreeSet<String>,
}

impl ArchiveVerification {
    /// Compares observed basenames with the required set.
    #[must_use]
    pub fn from_basenames<I, S>(basenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actual: BTreeSet<String> = basenames.into_iter().map(Into::into).collect();
        let expected: BTreeSet<String> =
            ARCHIVE_ENTRIES.iter().map(|name| (*name).to_string()).collect();
        Self {
            missing: expected.difference(&actual).cloned().collect(),
            unexpected: actual.difference(&expected).cloned().collect(),
        }
    }

    /// Returns true when the archive holds exactly the required entries.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl fmt::Display for ArchiveVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_complete() {
            return f.write_str("archive content matches");
        }
        f.write_str("unexpected archive content")?;
        if !self.unexpected.is_empty() {
            let names: Vec<&str> = self.unexpected.iter().map(String::as_str).collect();
            write!(f, "\nunexpected entries: {}", names.join(", "))?;
        }
        if !self.missing.is_empty() {
            let names: Vec<&str> = self.missing.iter().map(String::as_str).collect();
            write!(f, "\nmissing entries: {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// Reads a tar archive and compares its file basenames with
/// [`ARCHIVE_ENTRIES`].
///
/// Entries whose name is their own basename sit at the top level and are
/// skipped, whatever their type. Every nested entry counts by basename, so the
/// top-level directory name does not matter while a stray top-level file goes
/// unnoticed and a nested subdirectory is reported as unexpected.
///
/// # Errors
///
/// Returns [`DiagnosticsError`] when the archive cannot be read, holds more
/// than the entry limit, or contains an entry with no usable name.
pub fn verify_archive_entries<R: Read>(reader: R) -> Result<ArchiveVerification, DiagnosticsError> {
    let mut archive = Archive::new(reader);
    let mut basenames = Vec::new();
    let entries = archive.entries().map_err(|err| DiagnosticsError::Io(err.to_string()))?;
    for (index, entry) in entries.enumerate() {
        if index >= MAX_VERIFY_ENTRIES {
            return Err(DiagnosticsError::Invalid("archive has too many entries".to_string()));
        }
        let entry = entry.map_err(|err| DiagnosticsError::Io(err.to_string()))?;
        let path = entry.path().map_err(|err| DiagnosticsError::Invalid(err.to_string()))?;
        if path.components().count() <= 1 {
            continue;
        }
        let basename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| DiagnosticsError::Invalid("archive entry has no name".to_string()))?;
        basenames.push(basename.to_string());
    }
    Ok(ArchiveVerification::from_basenames(basenames))
}

/// Opens `path` and runs [`verify_archive_entries`] on it.
///
/// # Errors
///
/// Returns [`DiagnosticsError`] when the file cannot be opened or read.
pub fn verify_archive_file(path: &Path) -> Result<ArchiveVerification, DiagnosticsError> {
    let file = fs::File::open(path).map_err(|err| DiagnosticsError::Io(err.to_string()))?;
    verify_archive_entries(file)
}

// ============================================================================
// SECTION: Bundle
// ============================================================================

/// In-memory diagnostics archive under construction.
///
/// # Invariants
/// - Every entry name is one of [`ARCHIVE_ENTRIES`] and appears once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsBundle {
    /// Top-level directory name inside the archive.
    directory: String,
    /// Modification time stamped on every entry, in seconds since the epoch.
    mtime: u64,
    /// Entry contents keyed by basename.
    entries: BTreeMap<String, Vec<u8>>,
}

impl DiagnosticsBundle {
    /// Creates an empty bundle rooted at `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::Invalid`] when `directory` is not a single
    /// plain path segment.
    pub fn new(directory: impl Into<String>, mtime: u64) -> Result<Self, DiagnosticsError> {
        let directory = directory.into();
        if directory.is_empty()
            || directory.len() > MAX_DIRECTORY_NAME_LENGTH
            || directory == "."
            || directory == ".."
            || directory.contains(['/', '\\'])
            || directory.chars().any(char::is_control)
        {
            return Err(DiagnosticsError::Invalid(format!(
                "archive directory must be a single path segment: {directory}"
            )));
        }
        Ok(Self {
            directory,
            mtime,
            entries: BTreeMap::new(),
        })
    }

    /// Returns the top-level directory name.
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::Invalid`] for names outside
    /// [`ARCHIVE_ENTRIES`] or names already present.
    pub fn insert(&mut self, name: &str, contents: Vec<u8>) -> Result<(), DiagnosticsError> {
        if !ARCHIVE_ENTRIES.contains(&name) {
            return Err(DiagnosticsError::Invalid(format!("unknown archive entry: {name}")));
        }
        if self.entries.contains_key(name) {
            return Err(DiagnosticsError::Invalid(format!("duplicate archive entry: {name}")));
        }
        self.entries.insert(name.to_string(), contents);
        Ok(())
    }

    /// Returns required entries that have not been added yet.
    #[must_use]
    pub fn missing(&self) -> Vec<String> {
        ARCHIVE_ENTRIES
            .iter()
            .filter(|name| !self.entries.contains_key(**name))
            .map(|name| (*name).to_string())
            .collect()
    }

    /// Writes the archive to `writer` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::Incomplete`] when any entry is missing, or
    /// [`DiagnosticsError::Io`] when writing fails.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<W, DiagnosticsError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(DiagnosticsError::Incomplete(missing));
        }
        let mut builder = Builder::new(writer);
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(DIRECTORY_MODE);
        header.set_mtime(self.mtime);
        builder
            .append_data(&mut header, format!("{}/", self.directory), std::io::empty())
            .map_err(|err| DiagnosticsError::Io(err.to_string()))?;
        for (name, contents) in &self.entries {
            append_file(&mut builder, &format!("{}/{name}", self.directory), contents, self.mtime)?;
        }
        builder.into_inner().map_err(|err| DiagnosticsError::Io(err.to_string()))
    }

    /// Writes the archive to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError`] when the bundle is incomplete, the file
    /// already exists, or writing fails.
    pub fn write_file(&self, path: &Path) -> Result<(), DiagnosticsError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| DiagnosticsError::Io(err.to_string()))?;
        let mut file = self.write_to(file)?;
        file.flush().map_err(|err| DiagnosticsError::Io(err.to_string()))?;
        file.sync_all().map_err(|err| DiagnosticsError::Io(err.to_string()))
    }
}

// ============================================================================
// SECTION: Compression Helpers
// ============================================================================

/// Gzip-compresses `bytes`.
///
/// # Errors
///
/// Returns [`DiagnosticsError::Io`] when compression fails.
pub fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>, DiagnosticsError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).map_err(|err| DiagnosticsError::Io(err.to_string()))?;
    encoder.finish().map_err(|err| DiagnosticsError::Io(err.to_string()))
}

/// Builds a gzip-compressed tar holding `files` at its root.
///
/// # Errors
///
/// Returns [`DiagnosticsError`] when a file name is not a plain segment or
/// writing fails.
pub fn tar_gz_bytes(
    files: &BTreeMap<String, Vec<u8>>,
    mtime: u64,
) -> Result<Vec<u8>, DiagnosticsError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    for (name, contents) in files {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(DiagnosticsError::Invalid(format!("invalid log file name: {name}")));
        }
        append_file(&mut builder, name, contents, mtime)?;
    }
    let encoder = builder.into_inner().map_err(|err| DiagnosticsError::Io(err.to_string()))?;
    encoder.finish().map_err(|err| DiagnosticsError::Io(err.to_string()))
}

/// Appends one regular file to a tar builder.
fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &str,
    contents: &[u8],
    mtime: u64,
) -> Result<(), DiagnosticsError> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(contents.len() as u64);
    header.set_mode(ENTRY_MODE);
    header.set_mtime(mtime);
    builder
        .append_data(&mut header, path, contents)
        .map_err(|err| DiagnosticsError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
