// crates/flotilla-core/tests/probe_scenarios.rs
// ============================================================================
// Module: Operation and Probe Integration Tests
// Description: End-to-end create-container probes against simulated nodes.
// Purpose: Validate probe resolution timing, empty clusters, and cleanup.
// ============================================================================

//! ## Overview
//! Probes never resolve on acceptance alone: these tests interleave probe
//! tasks with hand-driven agent cycles to show exactly how many passes each
//! scenario needs, and that cleanup always runs exactly once.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use common::Harness;
use common::settle;
use flotilla_core::ConfigVersion;
use flotilla_core::ContainerName;
use flotilla_core::ContainerSpec;
use flotilla_core::CreateContainer;
use flotilla_core::ImageRef;
use flotilla_core::NodeId;
use flotilla_core::Operation;
use flotilla_core::Probe;
use flotilla_core::ProbeError;
use flotilla_core::ProbeOutcome;
use flotilla_core::run_probe;
use flotilla_core::runtime::CreateContainerProbe;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn operation(harness: &Harness) -> CreateContainer {
    CreateContainer::new(harness.client(), Arc::clone(&harness.clock) as _)
}

/// Probe that counts its cleanups.
struct CountingProbe {
    /// Whether `run` succeeds.
    succeed: bool,
    /// Number of cleanup calls.
    cleanups: Arc<AtomicUsize>,
}

#[async_trait]
impl Probe for CountingProbe {
    async fn run(&mut self) -> Result<ProbeOutcome, ProbeError> {
        if self.succeed {
            Ok(ProbeOutcome {
                version: ConfigVersion::new(1),
                elapsed: Duration::ZERO,
            })
        } else {
            Err(ProbeError::Timeout(Duration::from_secs(1)))
        }
    }

    async fn cleanup(&mut self) -> Result<(), ProbeError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// SECTION: Empty Cluster
// ============================================================================

#[tokio::test]
async fn get_probe_fails_on_empty_cluster_without_mutating_configuration() {
    let harness = Harness::new();

    let result = operation(&harness).get_probe().await;

    assert!(matches!(result, Err(ProbeError::EmptyCluster)));
    assert_eq!(harness.version(), ConfigVersion::INITIAL);
    assert_eq!(harness.store.configuration_count().unwrap(), 1);
}

#[tokio::test]
async fn get_probe_succeeds_once_a_node_is_registered() {
    let harness = Harness::with_nodes(&["n1"]);

    let probe = operation(&harness).get_probe().await;

    assert!(probe.is_ok());
    assert_eq!(harness.version(), ConfigVersion::INITIAL);
}

// ============================================================================
// SECTION: Create Container
// ============================================================================

#[tokio::test]
async fn one_node_probe_resolves_only_after_an_agent_pass() {
    let harness = Harness::with_nodes(&["n1"]);
    let (mut agent, runtime) = harness.agent("n1");
    let mut probe = operation(&harness).get_probe().await.unwrap();

    let running = tokio::spawn(async move {
        let outcome = probe.run().await;
        (probe, outcome)
    });
    settle().await;
    assert!(!running.is_finished());
    assert_eq!(harness.version(), ConfigVersion::new(1));

    agent.run_cycle().await.unwrap();
    let (mut probe, outcome) = running.await.unwrap();
    assert_eq!(outcome.unwrap().version, ConfigVersion::new(1));
    assert_eq!(runtime.inventory().containers.len(), 1);

    let cleaning = tokio::spawn(async move { probe.cleanup().await });
    settle().await;
    assert!(!cleaning.is_finished());

    agent.run_cycle().await.unwrap();
    cleaning.await.unwrap().unwrap();
    assert!(harness.service.current_configuration().containers.is_empty());
    assert!(runtime.inventory().containers.is_empty());
}

#[tokio::test]
async fn second_cleanup_is_a_no_op() {
    let harness = Harness::with_nodes(&["n1"]);
    let (mut agent, _runtime) = harness.agent("n1");
    let mut probe = CreateContainerProbe::new(
        harness.client(),
        Arc::clone(&harness.clock) as _,
        ContainerSpec::new(ContainerName::new("probe"), ImageRef::new("busybox"), NodeId::new("n1")),
        Duration::from_secs(30),
    );

    let running = tokio::spawn(async move {
        let outcome = run_probe(&mut probe).await;
        (probe, outcome)
    });
    settle().await;
    agent.run_cycle().await.unwrap();
    settle().await;
    agent.run_cycle().await.unwrap();
    let (mut probe, outcome) = running.await.unwrap();
    outcome.unwrap();
    let version = harness.version();
    assert_eq!(version, ConfigVersion::new(2));

    probe.cleanup().await.unwrap();
    assert_eq!(harness.version(), version);
}

#[tokio::test]
async fn failed_cleanup_can_be_retried() {
    let harness = Harness::with_nodes(&["n1"]);
    let (mut agent, _runtime) = harness.agent("n1");
    let mut probe = CreateContainerProbe::new(
        harness.client(),
        Arc::clone(&harness.clock) as _,
        ContainerSpec::new(ContainerName::new("probe"), ImageRef::new("busybox"), NodeId::new("n1")),
        Duration::from_secs(5),
    );

    let running = tokio::spawn(async move {
        let outcome = probe.run().await;
        (probe, outcome)
    });
    settle().await;
    agent.run_cycle().await.unwrap();
    let (mut probe, outcome) = running.await.unwrap();
    outcome.unwrap();

    let cleaning = tokio::spawn(async move {
        let outcome = probe.cleanup().await;
        (probe, outcome)
    });
    settle().await;
    assert!(harness.service.current_configuration().containers.is_empty());
    harness.clock.advance(Duration::from_secs(5));
    let (mut probe, outcome) = cleaning.await.unwrap();
    assert_eq!(outcome, Err(ProbeError::Timeout(Duration::from_secs(5))));
    let state = harness.service.current_state().unwrap();
    assert!(state.container(&ContainerName::new("probe")).is_some());

    let retrying = tokio::spawn(async move {
        let outcome = probe.cleanup().await;
        (probe, outcome)
    });
    settle().await;
    agent.run_cycle().await.unwrap();
    let (mut probe, outcome) = retrying.await.unwrap();
    outcome.unwrap();
    let state = harness.service.current_state().unwrap();
    assert!(state.container(&ContainerName::new("probe")).is_none());

    let version = harness.version();
    probe.cleanup().await.unwrap();
    assert_eq!(harness.version(), version);
}

#[tokio::test]
async fn timed_out_probe_still_cleans_up() {
    let harness = Harness::with_nodes(&["n1"]);
    let (mut agent, runtime) = harness.agent("n1");
    runtime.fail_image(ImageRef::new("busybox"));
    let mut probe =
        operation(&harness).with_timeout(Duration::from_secs(5)).get_probe().await.unwrap();

    let running = tokio::spawn(async move { run_probe(probe.as_mut()).await });
    settle().await;
    agent.run_cycle().await.unwrap();
    settle().await;
    assert!(!running.is_finished());

    harness.clock.advance(Duration::from_secs(5));
    settle().await;
    assert!(!running.is_finished());
    assert!(harness.service.current_configuration().containers.is_empty());

    agent.run_cycle().await.unwrap();
    let outcome = running.await.unwrap();
    assert_eq!(outcome, Err(ProbeError::Timeout(Duration::from_secs(5))));
    let state = harness.service.current_state().unwrap();
    assert!(state.nodes.values().all(|node| node.containers.is_empty()));
}

#[tokio::test]
async fn image_prefetch_needs_three_passes() {
    let harness = Harness::with_nodes(&["n1"]);
    let (mut agent, _runtime) = harness.agent("n1");
    let prefetching = operation(&harness).with_image_prefetch(true);

    let preparing = tokio::spawn(async move { prefetching.get_probe().await });
    settle().await;
    agent.run_cycle().await.unwrap();
    settle().await;
    assert!(!preparing.is_finished());
    agent.run_cycle().await.unwrap();
    let mut probe = preparing.await.unwrap().unwrap();

    let running = tokio::spawn(async move {
        let outcome = probe.run().await;
        (probe, outcome)
    });
    settle().await;
    assert!(!running.is_finished());
    agent.run_cycle().await.unwrap();
    let (_probe, outcome) = running.await.unwrap();
    assert_eq!(outcome.unwrap().version, ConfigVersion::new(3));
}

// ============================================================================
// SECTION: Probe Harness
// ============================================================================

#[tokio::test]
async fn run_probe_cleans_up_exactly_once_on_success_and_failure() {
    for succeed in [true, false] {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let mut probe = CountingProbe {
            succeed,
            cleanups: Arc::clone(&cleanups),
        };

        let outcome = run_probe(&mut probe).await;

        assert_eq!(outcome.is_ok(), succeed);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }
}
