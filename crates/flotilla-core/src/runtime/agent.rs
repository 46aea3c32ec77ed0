// crates/flotilla-core/src/runtime/agent.rs
// ============================================================================
// Module: Flotilla Reconciliation Agent
// Description: Per-node diff-and-apply loop reporting back to the control service.
// Purpose: Converge one node toward the desired configuration, cycle by cycle.
// Dependencies: crate::{core, interfaces, runtime}, tokio
// ============================================================================

//! ## Overview
//! One [`ReconciliationAgent`] runs per node. Each cycle:
//! 1. fetches the current configuration and cluster state;
//! 2. inspects the node;
//! 3. plans and applies the missing actions in dependency phases;
//! 4. re-inspects and reports the resulting [`NodeState`], with failed
//!    resources overlaid as `failed`.
//!
//! Between cycles the agent waits until either one tick of the injected clock
//! passes or a configuration newer than the one it planned against is
//! published. The wait is keyed on the version number, so a publish that
//! happens mid-cycle is never missed.
//!
//! When the control service already holds a newer generation for the node
//! (a restarted agent whose clock is behind its predecessor's), the agent
//! adopts the recorded generation and resubmits once, so its reports are not
//! discarded forever.
//!
//! Action failures never abort a cycle. Fetch, inspection, and report
//! failures abort the current cycle only; the loop keeps running.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::ContainerObservation;
use crate::core::ContainerState;
use crate::core::DatasetObservation;
use crate::core::DatasetState;
use crate::core::NodeId;
use crate::core::NodeState;
use crate::core::ResourceRef;
use crate::interfaces::ActionError;
use crate::interfaces::ClientError;
use crate::interfaces::Clock;
use crate::interfaces::ControlClient;
use crate::interfaces::LocalInventory;
use crate::interfaces::NodeRuntime;
use crate::interfaces::ReportOutcome;
use crate::interfaces::RuntimeError;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditEventKind;
use crate::runtime::audit::AuditSink;
use crate::runtime::executor::PlanExecution;
use crate::runtime::executor::execute_plan;
use crate::runtime::planner::plan_actions;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default interval between reconciliation cycles.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// Node this agent reconciles.
    pub node_id: NodeId,
    /// Interval between cycles when nothing changes.
    pub tick_interval: Duration,
}

impl AgentSettings {
    /// Creates settings with [`DEFAULT_TICK_INTERVAL`].
    #[must_use]
    pub const fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Overrides the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Configuration version the cycle planned against.
    pub version: ConfigVersion,
    /// Generation of the submitted report.
    pub generation: u64,
    /// Number of planned actions.
    pub planned: usize,
    /// Result of applying the plan.
    pub execution: PlanExecution,
    /// How the control service handled the report.
    pub outcome: ReportOutcome,
}

/// Reasons a cycle aborted before its report was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The configuration or cluster state could not be fetched.
    #[error("configuration fetch failed: {0}")]
    Fetch(ClientError),
    /// The node could not be inspected.
    #[error(transparent)]
    Inspect(#[from] RuntimeError),
    /// The state report could not be delivered.
    #[error("state report failed: {0}")]
    Report(ClientError),
}

impl AgentError {
    /// Returns a stable label for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Inspect(_) => "inspect",
            Self::Report(_) => "report",
        }
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Reconciliation loop for a single node.
///
/// # Invariants
/// - Report generations strictly increase for the lifetime of the agent.
pub struct ReconciliationAgent {
    /// Agent settings.
    settings: AgentSettings,
    /// Control protocol client.
    client: Arc<dyn ControlClient>,
    /// Node backend.
    runtime: Arc<dyn NodeRuntime>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Generation of the most recent report.
    last_generation: u64,
    /// Version the most recent successful fetch returned.
    last_version: ConfigVersion,
    /// Consecutive failing cycles per resource.
    failure_counts: BTreeMap<ResourceRef, u32>,
}

impl ReconciliationAgent {
    /// Creates an agent.
    #[must_use]
    pub fn new(
        settings: AgentSettings,
        client: Arc<dyn ControlClient>,
        runtime: Arc<dyn NodeRuntime>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            settings,
            client,
            runtime,
            clock,
            audit,
            last_generation: 0,
            last_version: ConfigVersion::INITIAL,
            failure_counts: BTreeMap::new(),
        }
    }

    /// Returns the node this agent reconciles.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.settings.node_id
    }

    /// Runs one fetch, plan, apply, and report cycle.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] when fetching, inspection, or reporting fails.
    /// Individual action failures are reported, not returned.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, AgentError> {
        let configuration = self.client.current_configuration().await.map_err(AgentError::Fetch)?;
        self.last_version = configuration.version;
        let cluster = self.client.current_state().await.map_err(AgentError::Fetch)?;
        let before = self.runtime.inspect().await?;
        let plan = plan_actions(&self.settings.node_id, &configuration, &before, &cluster);
        let execution = execute_plan(self.runtime.as_ref(), &plan).await;
        let after = self.runtime.inspect().await?;

        self.update_failure_counts(&execution.failures);
        let mut generation = self.next_generation();
        let state = self.build_state(generation, &configuration, &after, &execution.failures);
        let mut outcome =
            self.client.report_state(state.clone()).await.map_err(AgentError::Report)?;
        if let ReportOutcome::Stale {
            recorded,
        } = outcome
        {
            self.last_generation = recorded;
            generation = self.next_generation();
            self.audit.record(
                &AuditEvent::new(AuditEventKind::AgentReportResynced, self.clock.now())
                    .with_node(&self.settings.node_id)
                    .with_version(configuration.version)
                    .with_generation(generation),
            );
            let mut state = state;
            state.generation = generation;
            outcome = self.client.report_state(state).await.map_err(AgentError::Report)?;
        }

        self.audit.record(
            &AuditEvent::new(AuditEventKind::AgentCycleCompleted, self.clock.now())
                .with_node(&self.settings.node_id)
                .with_version(configuration.version)
                .with_generation(generation)
                .with_actions(plan.len(), execution.failures.len()),
        );
        Ok(CycleReport {
            version: configuration.version,
            generation,
            planned: plan.len(),
            execution,
            outcome,
        })
    }

    /// Runs cycles until `shutdown` becomes true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if let Err(err) = self.run_cycle().await {
                let kind = if matches!(err, AgentError::Report(_)) {
                    AuditEventKind::AgentReportFailed
                } else {
                    AuditEventKind::AgentCycleFailed
                };
                self.audit.record(
                    &AuditEvent::new(kind, self.clock.now())
                        .with_node(&self.settings.node_id)
                        .with_error(err.kind(), err.to_string()),
                );
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = self.wait_for_next_cycle() => {}
            }
        }
    }

    /// Waits for one tick or a configuration newer than the last one planned.
    async fn wait_for_next_cycle(&self) {
        let tick = self.settings.tick_interval;
        if self.client.wait_for_configuration(self.last_version, tick).await.is_err() {
            self.clock.sleep(tick).await;
        }
    }

    /// Returns the next report generation.
    fn next_generation(&mut self) -> u64 {
        let now = self.clock.now().as_millis();
        self.last_generation = self.last_generation.saturating_add(1).max(now);
        self.last_generation
    }

    /// Tracks consecutive failures for every resource that failed this cycle.
    fn update_failure_counts(&mut self, failures: &BTreeMap<ResourceRef, ActionError>) {
        self.failure_counts.retain(|resource, _| failures.contains_key(resource));
        for resource in failures.keys() {
            let count = self.failure_counts.entry(resource.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }
    }

    /// Builds the report from the inspected inventory and this cycle's failures.
    fn build_state(
        &self,
        generation: u64,
        configuration: &Configuration,
        inventory: &LocalInventory,
        failures: &BTreeMap<ResourceRef, ActionError>,
    ) -> NodeState {
        let node_id = &self.settings.node_id;
        let mut state =
            NodeState::new(node_id.clone(), generation, configuration.version, self.clock.now());

        for (dataset_id, local) in &inventory.datasets {
            state.datasets.insert(
                dataset_id.clone(),
                DatasetObservation {
                    dataset_id: dataset_id.clone(),
                    maximum_size: local.maximum_size,
                    state: DatasetState::Attached,
                    failure: None,
                    consecutive_failures: 0,
                },
            );
        }
        for (name, local) in &inventory.containers {
            let desired_here = configuration
                .containers
                .get(name)
                .is_some_and(|spec| &spec.node_id == node_id);
            let container_state = if local.running {
                ContainerState::Running
            } else if desired_here {
                ContainerState::Creating
            } else {
                ContainerState::Stopping
            };
            state.containers.insert(
                name.clone(),
                ContainerObservation {
                    name: name.clone(),
                    image: local.image.clone(),
                    dataset: local.dataset.clone(),
                    state: container_state,
                    failure: None,
                    consecutive_failures: 0,
                },
            );
        }

        for (resource, error) in failures {
            let count = self.failure_counts.get(resource).copied().unwrap_or(1);
            match resource {
                ResourceRef::Dataset {
                    dataset_id,
                } => {
                    let desired = configuration
                        .datasets
                        .get(dataset_id)
                        .filter(|spec| &spec.node_id == node_id);
                    if !state.datasets.contains_key(dataset_id)
                        && let Some(spec) = desired
                    {
                        state.datasets.insert(
                            dataset_id.clone(),
                            DatasetObservation {
                                dataset_id: dataset_id.clone(),
                                maximum_size: spec.maximum_size,
                                state: DatasetState::Failed,
                                failure: None,
                                consecutive_failures: 0,
                            },
                        );
                    }
                    if let Some(entry) = state.datasets.get_mut(dataset_id) {
                        entry.state = DatasetState::Failed;
                        entry.failure = Some(error.to_string());
                        entry.consecutive_failures = count;
                    }
                }
                ResourceRef::Container {
                    name,
                } => {
                    let desired =
                        configuration.containers.get(name).filter(|spec| &spec.node_id == node_id);
                    if !state.containers.contains_key(name)
                        && let Some(spec) = desired
                    {
                        state.containers.insert(
                            name.clone(),
                            ContainerObservation {
                                name: name.clone(),
                                image: spec.image.clone(),
                                dataset: spec.dataset.clone(),
                                state: ContainerState::Failed,
                                failure: None,
                                consecutive_failures: 0,
                            },
                        );
                    }
                    if let Some(entry) = state.containers.get_mut(name) {
                        entry.state = ContainerState::Failed;
                        entry.failure = Some(error.to_string());
                        entry.consecutive_failures = count;
                    }
                }
            }
        }
        state
    }
}
