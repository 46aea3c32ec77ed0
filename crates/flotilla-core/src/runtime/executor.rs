// crates/flotilla-core/src/runtime/executor.rs
// ============================================================================
// Module: Flotilla Plan Executor
// Description: Apply planned actions against a node runtime.
// Purpose: Record per-resource failures and skip dependent actions.
// Dependencies: crate::{core, interfaces, runtime::planner}
// ============================================================================

//! ## Overview
//! Actions run in plan order. A failed action marks its resource failed; any
//! later action that requires a failed resource is skipped and recorded as
//! [`ActionError::PrerequisiteFailed`]. Independent actions still run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::ResourceRef;
use crate::interfaces::ActionError;
use crate::interfaces::NodeRuntime;
use crate::runtime::planner::PlannedAction;
use crate::runtime::planner::ReconcileAction;

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// Outcome of applying one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanExecution {
    /// Actions that completed successfully.
    pub applied: usize,
    /// First failure per resource.
    pub failures: BTreeMap<ResourceRef, ActionError>,
}

impl PlanExecution {
    /// Returns true when every action succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Applies `plan` in order against `runtime`.
pub async fn execute_plan(runtime: &dyn NodeRuntime, plan: &[PlannedAction]) -> PlanExecution {
    let mut execution = PlanExecution::default();
    for planned in plan {
        let resource = planned.action.resource();
        if let Some(blocker) =
            planned.requires.iter().find(|required| execution.failures.contains_key(*required))
        {
            let error = ActionError::PrerequisiteFailed(describe(blocker));
            execution.failures.entry(resource).or_insert(error);
            continue;
        }
        match apply_action(runtime, &planned.action).await {
            Ok(()) => execution.applied += 1,
            Err(error) => {
                execution.failures.entry(resource).or_insert(error);
            }
        }
    }
    execution
}

/// Dispatches one action to the runtime.
async fn apply_action(runtime: &dyn NodeRuntime, action: &ReconcileAction) -> Result<(), ActionError> {
    match action {
        ReconcileAction::StopContainer {
            name,
        } => runtime.stop_container(name).await,
        ReconcileAction::RemoveContainer {
            name,
        } => runtime.remove_container(name).await,
        ReconcileAction::DetachDataset {
            dataset_id,
        } => runtime.detach_dataset(dataset_id).await,
        ReconcileAction::AttachDataset {
            dataset,
        } => runtime.attach_dataset(dataset).await,
        ReconcileAction::ResizeDataset {
            dataset_id,
            maximum_size,
        } => runtime.resize_dataset(dataset_id, *maximum_size).await,
        ReconcileAction::CreateContainer {
            container,
        } => runtime.create_container(container).await,
        ReconcileAction::StartContainer {
            name,
        } => runtime.start_container(name).await,
    }
}

/// Renders a resource reference for error messages.
fn describe(resource: &ResourceRef) -> String {
    match resource {
        ResourceRef::Dataset {
            dataset_id,
        } => format!("dataset {dataset_id}"),
        ResourceRef::Container {
            name,
        } => format!("container {name}"),
    }
}
