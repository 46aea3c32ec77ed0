// crates/flotilla-core/src/lib.rs
// ============================================================================
// Module: Flotilla Core Library
// Description: Public API surface for the Flotilla convergence control loop.
// Purpose: Expose core types, interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Flotilla places datasets and containers across a fleet of nodes. A central
//! control service holds the desired configuration and the last observed
//! state; per-node agents reconcile their node toward the configuration and
//! report back; clients propose changes and wait for the cluster to converge.
//! This crate is transport and storage agnostic: backends plug in through
//! the traits in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::ActionError;
pub use interfaces::ClientError;
pub use interfaces::Clock;
pub use interfaces::ClusterStore;
pub use interfaces::ControlClient;
pub use interfaces::ControlError;
pub use interfaces::LocalContainer;
pub use interfaces::LocalDataset;
pub use interfaces::LocalInventory;
pub use interfaces::NodeRuntime;
pub use interfaces::ReportOutcome;
pub use interfaces::RuntimeError;
pub use interfaces::StoreError;
pub use interfaces::StoreSnapshot;
pub use runtime::AgentError;
pub use runtime::AgentSettings;
pub use runtime::AuditEvent;
pub use runtime::AuditEventKind;
pub use runtime::AuditSink;
pub use runtime::ControlService;
pub use runtime::CreateContainer;
pub use runtime::CycleReport;
pub use runtime::InMemoryClusterStore;
pub use runtime::LocalControlClient;
pub use runtime::ManualClock;
pub use runtime::Operation;
pub use runtime::Probe;
pub use runtime::ProbeError;
pub use runtime::ProbeOutcome;
pub use runtime::ReconciliationAgent;
pub use runtime::SimulatedNodeRuntime;
pub use runtime::SystemClock;
pub use runtime::run_probe;
