// crates/flotilla-core/src/runtime/probe.rs
// ============================================================================
// Module: Flotilla Operations and Probes
// Description: Client-driven operations that change the cluster and await it.
// Purpose: Measure an operation end to end with guaranteed teardown.
// Dependencies: crate::{core, interfaces}, async-trait
// ============================================================================

//! ## Overview
//! An [`Operation`] hands out a [`Probe`]. Running the probe performs the
//! operation's action and then waits until the cluster has realized it, not
//! merely accepted it. [`Probe::cleanup`] removes whatever the probe created;
//! [`run_probe`] always calls it, whether or not the run succeeded.
//!
//! [`CreateContainer`] is the built-in operation: it places a uniquely named
//! container on the first registered node and waits until an agent reports
//! it running.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::ClusterState;
use crate::core::ConfigVersion;
use crate::core::Configuration;
use crate::core::ConfigurationChange;
use crate::core::ConfigurationDelta;
use crate::core::ContainerName;
use crate::core::ContainerSpec;
use crate::core::ImageRef;
use crate::core::NodeId;
use crate::interfaces::ClientError;
use crate::interfaces::Clock;
use crate::interfaces::ControlClient;
use crate::interfaces::ControlError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default image used by [`CreateContainer`].
pub const DEFAULT_PROBE_IMAGE: &str = "busybox";

/// Default time a probe waits for convergence.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum proposal attempts when racing other writers.
const MAX_PROPOSE_ATTEMPTS: usize = 16;

/// Sequence used to keep probe container names unique within a process.
static PROBE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// SECTION: Contracts
// ============================================================================

/// Errors raised by operations and probes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The cluster has no nodes to run the operation on.
    #[error("cluster has no registered nodes")]
    EmptyCluster,
    /// The cluster did not converge in time.
    #[error("cluster did not converge within {} ms", .0.as_millis())]
    Timeout(Duration),
    /// Proposals kept conflicting with concurrent writers.
    #[error("gave up after {0} conflicting proposals")]
    Contention(usize),
    /// The control service or transport failed.
    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for ProbeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Control(ControlError::EmptyCluster) => Self::EmptyCluster,
            other => Self::Client(other),
        }
    }
}

/// Result of a successful probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Configuration version the probe's change was published as.
    pub version: ConfigVersion,
    /// Time from submitting the change to observing convergence.
    pub elapsed: Duration,
}

/// A measurable client-side operation.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Prepares a probe for one run of the operation.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::EmptyCluster`] when there is no node to use.
    async fn get_probe(&self) -> Result<Box<dyn Probe>, ProbeError>;
}

/// One prepared execution of an [`Operation`].
#[async_trait]
pub trait Probe: Send + Sync {
    /// Performs the action and waits until the cluster has realized it.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the action is rejected or convergence is
    /// not observed before the timeout.
    async fn run(&mut self) -> Result<ProbeOutcome, ProbeError>;

    /// Removes whatever the probe created. Calls after the first successful
    /// cleanup are no-ops; a failed cleanup may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when removal is rejected or not observed.
    async fn cleanup(&mut self) -> Result<(), ProbeError>;
}

/// Runs `probe` and then always cleans it up.
///
/// # Errors
///
/// Returns the run error when the run failed, otherwise the cleanup error
/// when only cleanup failed.
pub async fn run_probe(probe: &mut dyn Probe) -> Result<ProbeOutcome, ProbeError> {
    let result = probe.run().await;
    let cleaned = probe.cleanup().await;
    match (result, cleaned) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(err)) | (Err(err), _) => Err(err),
    }
}

/// Waits until `predicate` holds for the cluster state seen through `client`.
///
/// # Errors
///
/// Returns [`ProbeError::Timeout`] when `timeout` elapses on `clock`, or
/// [`ProbeError::Client`] on transport failures.
pub async fn await_cluster_state<P>(
    client: &dyn ControlClient,
    clock: &dyn Clock,
    predicate: P,
    timeout: Duration,
) -> Result<ClusterState, ProbeError>
where
    P: Fn(&ClusterState) -> bool + Send,
{
    let deadline = clock.now().saturating_add(timeout);
    let mut state = client.current_state().await?;
    loop {
        if predicate(&state) {
            return Ok(state);
        }
        let now = clock.now();
        if now >= deadline {
            return Err(ProbeError::Timeout(timeout));
        }
        match client.wait_for_state(state.revision, deadline.duration_since(now)).await? {
            Some(next) => state = next,
            None => return Err(ProbeError::Timeout(timeout)),
        }
    }
}

/// Proposes a delta built from the latest configuration, retrying conflicts.
///
/// `build` returns `None` when no change is needed any more.
async fn propose_with_retry<F>(
    client: &dyn ControlClient,
    build: F,
) -> Result<Option<ConfigVersion>, ProbeError>
where
    F: Fn(&Configuration) -> Option<ConfigurationChange> + Send + Sync,
{
    for _ in 0..MAX_PROPOSE_ATTEMPTS {
        let current = client.current_configuration().await?;
        let Some(change) = build(&current) else {
            return Ok(None);
        };
        let delta = ConfigurationDelta::new(current.version).with(change);
        match client.propose(delta).await {
            Ok(version) => return Ok(Some(version)),
            Err(ClientError::Control(ControlError::Conflict { .. })) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Err(ProbeError::Contention(MAX_PROPOSE_ATTEMPTS))
}

// ============================================================================
// SECTION: Create Container
// ============================================================================

/// Operation that creates a container and waits for it to run.
pub struct CreateContainer {
    /// Control protocol client.
    client: Arc<dyn ControlClient>,
    /// Clock used for deadlines and elapsed time.
    clock: Arc<dyn Clock>,
    /// Image the probe container runs.
    image: ImageRef,
    /// Convergence timeout.
    timeout: Duration,
    /// Pull the image with a throwaway container before measuring.
    prefetch_image: bool,
}

impl CreateContainer {
    /// Creates the operation with default image and timeout.
    #[must_use]
    pub fn new(client: Arc<dyn ControlClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            image: ImageRef::new(DEFAULT_PROBE_IMAGE),
            timeout: DEFAULT_PROBE_TIMEOUT,
            prefetch_image: false,
        }
    }

    /// Overrides the image.
    #[must_use]
    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = image;
        self
    }

    /// Overrides the convergence timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pulls the image on the target node while preparing the probe, so the
    /// measured run does not include the image download.
    #[must_use]
    pub const fn with_image_prefetch(mut self, prefetch_image: bool) -> Self {
        self.prefetch_image = prefetch_image;
        self
    }

    /// Returns a fresh container name.
    fn unique_name(&self, purpose: &str) -> ContainerName {
        let sequence = PROBE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        ContainerName::new(format!(
            "flotilla-{purpose}-{}-{sequence}",
            self.clock.now().as_millis()
        ))
    }
}

#[async_trait]
impl Operation for CreateContainer {
    async fn get_probe(&self) -> Result<Box<dyn Probe>, ProbeError> {
        let nodes = self.client.nodes().await?;
        let node = nodes.first().ok_or(ProbeError::EmptyCluster)?;
        if self.prefetch_image {
            let mut pull = CreateContainerProbe::new(
                Arc::clone(&self.client),
                Arc::clone(&self.clock),
                ContainerSpec::new(self.unique_name("pull"), self.image.clone(), node.node_id.clone()),
                self.timeout,
            );
            run_probe(&mut pull).await?;
        }
        Ok(Box::new(CreateContainerProbe::new(
            Arc::clone(&self.client),
            Arc::clone(&self.clock),
            ContainerSpec::new(self.unique_name("probe"), self.image.clone(), node.node_id.clone()),
            self.timeout,
        )))
    }
}

/// Probe created by [`CreateContainer`].
pub struct CreateContainerProbe {
    /// Control protocol client.
    client: Arc<dyn ControlClient>,
    /// Clock used for deadlines and elapsed time.
    clock: Arc<dyn Clock>,
    /// Container the probe places.
    container: ContainerSpec,
    /// Convergence timeout.
    timeout: Duration,
    /// Set once the container was added to the configuration.
    created: bool,
    /// Set once the container was removed and its teardown observed.
    cleaned: bool,
}

impl CreateContainerProbe {
    /// Creates a probe for `container`.
    #[must_use]
    pub fn new(
        client: Arc<dyn ControlClient>,
        clock: Arc<dyn Clock>,
        container: ContainerSpec,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            clock,
            container,
            timeout,
            created: false,
            cleaned: false,
        }
    }

    /// Returns the probe container's name.
    #[must_use]
    pub const fn container_name(&self) -> &ContainerName {
        &self.container.name
    }

    /// Returns the node the container is placed on.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.container.node_id
    }
}

#[async_trait]
impl Probe for CreateContainerProbe {
    async fn run(&mut self) -> Result<ProbeOutcome, ProbeError> {
        let started = self.clock.now();
        let container = self.container.clone();
        let version = propose_with_retry(self.client.as_ref(), |current| {
            (!current.containers.contains_key(&container.name)).then(|| {
                ConfigurationChange::AddContainer {
                    container: container.clone(),
                }
            })
        })
        .await?
        .ok_or_else(|| {
            ProbeError::Client(ClientError::Control(ControlError::Validation(format!(
                "container {} already exists",
                self.container.name
            ))))
        })?;
        self.created = true;
        let name = self.container.name.clone();
        await_cluster_state(
            self.client.as_ref(),
            self.clock.as_ref(),
            |state| state.container_running(&name),
            self.timeout,
        )
        .await?;
        Ok(ProbeOutcome {
            version,
            elapsed: self.clock.now().duration_since(started),
        })
    }

    async fn cleanup(&mut self) -> Result<(), ProbeError> {
        if self.cleaned || !self.created {
            self.cleaned = true;
            return Ok(());
        }
        // The removal is only proposed while the container is still
        // configured, so a retry after a failed attempt resumes the wait.
        let name = self.container.name.clone();
        propose_with_retry(self.client.as_ref(), |current| {
            current.containers.contains_key(&name).then(|| ConfigurationChange::RemoveContainer {
                name: name.clone(),
            })
        })
        .await?;
        await_cluster_state(
            self.client.as_ref(),
            self.clock.as_ref(),
            |state| state.container(&name).is_none(),
            self.timeout,
        )
        .await?;
        self.cleaned = true;
        Ok(())
    }
}
