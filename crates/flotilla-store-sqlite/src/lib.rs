// crates/flotilla-store-sqlite/src/lib.rs
// ============================================================================
// Module: Flotilla SQLite Store
// Description: Durable ClusterStore implementation backed by SQLite.
// Purpose: Persist nodes, configuration versions, and node reports.
// Dependencies: flotilla-core, rusqlite
// ============================================================================

//! ## Overview
//! Provides [`SqliteClusterStore`], the durable backing store for the
//! Flotilla control service. Configurations are stored append-only, one row
//! per version, with a SHA-256 digest of their canonical JSON that is verified
//! on every load.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::ConfigurationVersionSummary;
pub use store::MAX_DOCUMENT_BYTES;
pub use store::SqliteClusterStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
