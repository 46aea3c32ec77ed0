// crates/flotilla-diagnostics/src/collect.rs
// ============================================================================
// Module: Diagnostics Collection
// Description: Gathers service logs and host facts into a diagnostics bundle.
// Purpose: Map collected inputs onto the fixed archive entry set.
// Dependencies: crate::archive, flotilla-core
// ============================================================================

//! ## Overview
//! [`DiagnosticsInputs`] holds everything an export needs: per-service log
//! files, node runtime facts, the system log, and service status text.
//! [`HostFacts::gather`] fills in the host-level entries from the running
//! machine, falling back to a placeholder when a source is unreadable.
//! [`build_bundle`] turns the inputs into a complete [`DiagnosticsBundle`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use flotilla_core::Timestamp;

use crate::archive::DiagnosticsBundle;
use crate::archive::DiagnosticsError;
use crate::archive::gzip_bytes;
use crate::archive::tar_gz_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Version string written to the `flotilla-version` entry.
pub const FLOTILLA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder written when a host source cannot be read.
const UNAVAILABLE: &str = "unavailable\n";

/// Location of the OS release file.
const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Location of the kernel release string.
const KERNEL_RELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

/// Prefix of the archive's top-level directory.
const DIRECTORY_PREFIX: &str = "flotilla-diagnostics";

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Host-level facts captured at export time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Contents of the OS release file.
    pub os_release: Vec<u8>,
    /// Kernel and architecture summary.
    pub uname: Vec<u8>,
}

impl HostFacts {
    /// Reads host facts from the running machine.
    #[must_use]
    pub fn gather() -> Self {
        let os_release = fs::read(OS_RELEASE_PATH).unwrap_or_else(|_| UNAVAILABLE.into());
        let kernel = fs::read_to_string(KERNEL_RELEASE_PATH)
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let uname = format!(
            "{} {} {}\n",
            std::env::consts::OS,
            kernel,
            std::env::consts::ARCH
        );
        Self {
            os_release,
            uname: uname.into_bytes(),
        }
    }
}

/// Everything needed to produce one diagnostics archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsInputs {
    /// Time of the export; names the archive directory.
    pub exported_at: Timestamp,
    /// Control service log files keyed by file name.
    pub control_service: BTreeMap<String, Vec<u8>>,
    /// Dataset agent log files keyed by file name.
    pub dataset_agent: BTreeMap<String, Vec<u8>>,
    /// Container agent log files keyed by file name.
    pub container_agent: BTreeMap<String, Vec<u8>>,
    /// Node runtime description (inventory and backend details).
    pub runtime_info: Vec<u8>,
    /// Node runtime version string.
    pub runtime_version: Vec<u8>,
    /// Uncompressed system log.
    pub syslog: Vec<u8>,
    /// Service status text.
    pub service_status: Vec<u8>,
    /// Host facts.
    pub host: HostFacts,
}

impl DiagnosticsInputs {
    /// Creates inputs with empty service logs and the given host facts.
    #[must_use]
    pub fn new(exported_at: Timestamp, host: HostFacts) -> Self {
        Self {
            exported_at,
            control_service: BTreeMap::new(),
            dataset_agent: BTreeMap::new(),
            container_agent: BTreeMap::new(),
            runtime_info: UNAVAILABLE.into(),
            runtime_version: UNAVAILABLE.into(),
            syslog: Vec::new(),
            service_status: UNAVAILABLE.into(),
            host,
        }
    }

    /// Reads `path` into the system log, leaving it empty when absent.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::Io`] when the file exists but cannot be
    /// read.
    pub fn read_syslog(&mut self, path: &Path) -> Result<(), DiagnosticsError> {
        match fs::read(path) {
            Ok(bytes) => {
                self.syslog = bytes;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DiagnosticsError::Io(err.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Bundle Assembly
// ============================================================================

/// Assembles a complete bundle from `inputs`.
///
/// # Errors
///
/// Returns [`DiagnosticsError`] when a log file name is invalid or
/// compression fails.
pub fn build_bundle(inputs: &DiagnosticsInputs) -> Result<DiagnosticsBundle, DiagnosticsError> {
    let millis = inputs.exported_at.as_millis();
    let mtime = millis / 1_000;
    let mut bundle = DiagnosticsBundle::new(format!("{DIRECTORY_PREFIX}-{millis}"), mtime)?;
    bundle.insert("control-service.tar.gz", tar_gz_bytes(&inputs.control_service, mtime)?)?;
    bundle.insert("dataset-agent.tar.gz", tar_gz_bytes(&inputs.dataset_agent, mtime)?)?;
    bundle.insert("container-agent.tar.gz", tar_gz_bytes(&inputs.container_agent, mtime)?)?;
    bundle.insert("flotilla-version", format!("{FLOTILLA_VERSION}\n").into_bytes())?;
    bundle.insert("runtime-info", inputs.runtime_info.clone())?;
    bundle.insert("runtime-version", inputs.runtime_version.clone())?;
    bundle.insert("os-release", inputs.host.os_release.clone())?;
    bundle.insert("syslog.gz", gzip_bytes(&inputs.syslog)?)?;
    bundle.insert("uname", inputs.host.uname.clone())?;
    bundle.insert("service-status", inputs.service_status.clone())?;
    Ok(bundle)
}
