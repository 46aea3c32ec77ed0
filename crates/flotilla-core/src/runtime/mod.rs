// crates/flotilla-core/src/runtime/mod.rs
// ============================================================================
// Module: Flotilla Runtime
// Description: Control service, reconciliation agent, probes, and helpers.
// Purpose: Execute the convergence control loop against injected backends.
// Dependencies: crate::{core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! Runtime modules implement the control service store, the per-node
//! reconciliation agent, the client-side operation/probe contract, and the
//! in-memory backends used by tests and local demos. Every transport (in
//! process or HTTP) calls into the same [`ControlService`] logic.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod agent;
pub mod audit;
pub mod clock;
pub mod control;
pub mod executor;
pub mod local;
pub mod planner;
pub mod probe;
pub mod simulated;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use agent::AgentError;
pub use agent::AgentSettings;
pub use agent::CycleReport;
pub use agent::DEFAULT_TICK_INTERVAL;
pub use agent::ReconciliationAgent;
pub use audit::AuditEvent;
pub use audit::AuditEventKind;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use control::ControlService;
pub use control::error_kind;
pub use executor::PlanExecution;
pub use executor::execute_plan;
pub use local::LocalControlClient;
pub use planner::ActionPhase;
pub use planner::PlannedAction;
pub use planner::ReconcileAction;
pub use planner::plan_actions;
pub use probe::CreateContainer;
pub use probe::CreateContainerProbe;
pub use probe::Operation;
pub use probe::Probe;
pub use probe::ProbeError;
pub use probe::ProbeOutcome;
pub use probe::await_cluster_state;
pub use probe::run_probe;
pub use simulated::SimulatedNodeRuntime;
pub use store::InMemoryClusterStore;
