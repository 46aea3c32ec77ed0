// crates/flotilla-diagnostics/src/lib.rs
// ============================================================================
// Module: Flotilla Diagnostics Library
// Description: Diagnostics archive export and verification.
// Purpose: Package service logs and host facts in a fixed archive layout.
// Dependencies: flotilla-core, flate2, tar
// ============================================================================

//! ## Overview
//! `flotilla-diagnostics` builds the archive an operator attaches to a bug
//! report and verifies that an archive carries exactly the expected entries.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod archive;
pub mod collect;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use archive::ARCHIVE_ENTRIES;
pub use archive::ArchiveVerification;
pub use archive::DiagnosticsBundle;
pub use archive::DiagnosticsError;
pub use archive::gzip_bytes;
pub use archive::tar_gz_bytes;
pub use archive::verify_archive_entries;
pub use archive::verify_archive_file;
pub use collect::DiagnosticsInputs;
pub use collect::FLOTILLA_VERSION;
pub use collect::HostFacts;
pub use collect::build_bundle;
