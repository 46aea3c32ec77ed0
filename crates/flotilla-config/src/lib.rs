// crates/flotilla-config/src/lib.rs
// ============================================================================
// Module: Flotilla Config Library
// Description: Canonical config model, validation, and example generation.
// Purpose: Single source of truth for flotilla.toml semantics.
// Dependencies: flotilla-core, flotilla-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `flotilla-config` defines the configuration model shared by the control
//! service, node agents, and the probe CLI. Loading is strict and fails
//! closed: unknown store types, malformed addresses, and out-of-range limits
//! are rejected before anything starts.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
