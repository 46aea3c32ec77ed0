// crates/flotilla-server/src/lib.rs
// ============================================================================
// Module: Flotilla Server Library
// Description: HTTP control service and remote control client.
// Purpose: Carry the state synchronization protocol between processes.
// Dependencies: flotilla-core, flotilla-config, axum, reqwest
// ============================================================================

//! ## Overview
//! `flotilla-server` puts the control service behind a small JSON API and
//! provides [`HttpControlClient`], the remote counterpart of the in-process
//! client. Agents, probes, and the CLI can use either transport without
//! change.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod client;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use api::ApiError;
pub use api::ErrorBody;
pub use api::ErrorEnvelope;
pub use api::VersionResponse;
pub use client::HttpControlClient;
pub use server::ControlServer;
pub use server::ServerError;
pub use server::build_audit_sink;
pub use server::build_cluster_store;
