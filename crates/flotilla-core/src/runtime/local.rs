// crates/flotilla-core/src/runtime/local.rs
// ============================================================================
// Module: Flotilla In-Process Control Client
// Description: ControlClient implementation calling a ControlService directly.
// Purpose: Run agents and probes in the same process as the control service.
// Dependencies: crate::{core, interfaces, runtime::control}, async-trait
// ============================================================================

//! ## Overview
//! [`LocalControlClient`] is the in-process transport: every call goes
//! straight to a shared [`ControlService`]. Tests and the single-process demo
//! mode use it; remote agents use the HTTP client in `flotilla-cli` instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::ClusterState;
use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::ConfigurationDelta;
use crate::core::Node;
use crate::core::NodeState;
use crate::interfaces::ClientError;
use crate::interfaces::ControlClient;
use crate::interfaces::ReportOutcome;
use crate::runtime::control::ControlService;

// ============================================================================
// SECTION: Local Client
// ============================================================================

/// [`ControlClient`] backed by an in-process [`ControlService`].
#[derive(Clone)]
pub struct LocalControlClient {
    /// Shared control service.
    service: Arc<ControlService>,
}

impl LocalControlClient {
    /// Wraps a shared control service.
    #[must_use]
    pub const fn new(service: Arc<ControlService>) -> Self {
        Self {
            service,
        }
    }
}

#[async_trait]
impl ControlClient for LocalControlClient {
    async fn nodes(&self) -> Result<Vec<Node>, ClientError> {
        Ok(self.service.nodes()?)
    }

    async fn register_node(&self, node: Node) -> Result<(), ClientError> {
        Ok(self.service.register_node(node)?)
    }

    async fn current_configuration(&self) -> Result<Arc<Configuration>, ClientError> {
        Ok(self.service.current_configuration())
    }

    async fn propose(&self, delta: ConfigurationDelta) -> Result<ConfigVersion, ClientError> {
        Ok(self.service.propose(&delta)?)
    }

    async fn report_state(&self, state: NodeState) -> Result<ReportOutcome, ClientError> {
        Ok(self.service.report_state(state)?)
    }

    async fn current_state(&self) -> Result<ClusterState, ClientError> {
        Ok(self.service.current_state()?)
    }

    async fn wait_for_configuration(
        &self,
        after: ConfigVersion,
        timeout: Duration,
    ) -> Result<Option<Arc<Configuration>>, ClientError> {
        Ok(self.service.wait_for_configuration(after, timeout).await?)
    }

    async fn wait_for_state(
        &self,
        after_revision: u64,
        timeout: Duration,
    ) -> Result<Option<ClusterState>, ClientError> {
        Ok(self.service.wait_for_state(after_revision, timeout).await?)
    }
}
