// crates/flotilla-core/src/core/mod.rs
// ============================================================================
// Module: Flotilla Core Types
// Description: Cluster data model, configurations, and observed state.
// Purpose: Provide stable, serializable types shared by every Flotilla crate.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Core types describe registered nodes, the versioned desired configuration,
//! and the observed cluster state reported by agents. These types are the
//! canonical source of truth for the HTTP API and the durable stores.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod cluster;
pub mod configuration;
pub mod hashing;
pub mod identifiers;
pub mod state;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cluster::ContainerSpec;
pub use cluster::DatasetSpec;
pub use cluster::Node;
pub use configuration::Configuration;
pub use configuration::ConfigurationChange;
pub use configuration::ConfigurationDelta;
pub use configuration::ConfigurationError;
pub use configuration::MAX_DELTA_CHANGES;
pub use hashing::ContentDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::digest_bytes;
pub use hashing::digest_canonical_json;
pub use identifiers::ConfigVersion;
pub use identifiers::ContainerName;
pub use identifiers::DatasetId;
pub use identifiers::ImageRef;
pub use identifiers::MAX_IDENTIFIER_LENGTH;
pub use identifiers::NodeId;
pub use state::ClusterState;
pub use state::ContainerObservation;
pub use state::ContainerState;
pub use state::ConvergenceReport;
pub use state::DatasetObservation;
pub use state::DatasetState;
pub use state::NodeState;
pub use state::ResourceIssue;
pub use state::ResourceRef;
pub use time::Timestamp;
