// crates/flotilla-server/tests/http_api.rs
// ============================================================================
// Module: HTTP API Tests
// Description: Drive the /v1 API over a real socket with raw and typed clients.
// Purpose: Check status codes, error bodies, long-polls, and shutdown.
// Dependencies: flotilla-server, flotilla-core, reqwest, tokio
// ============================================================================

//! HTTP control API tests.

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

use std::time::Duration;

use flotilla_core::ClientError;
use flotilla_core::ConfigVersion;
use flotilla_core::ConfigurationChange;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ContainerName;
use flotilla_core::ContainerSpec;
use flotilla_core::ControlClient;
use flotilla_core::ControlError;
use flotilla_core::ImageRef;
use flotilla_core::NodeId;
use flotilla_core::NodeState;
use flotilla_core::ReportOutcome;
use flotilla_core::Timestamp;
use flotilla_server::ErrorEnvelope;
use serde_json::json;

use common::TestServer;
use common::node;

fn add_container(name: &str, node_id: &str) -> ConfigurationChange {
    ConfigurationChange::AddContainer {
        container: ContainerSpec::new(
            ContainerName::new(name),
            ImageRef::new("busybox"),
            NodeId::new(node_id),
        ),
    }
}

async fn error_of(response: reqwest::Response) -> (u16, ErrorEnvelope) {
    let status = response.status().as_u16();
    let body = response.bytes().await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn nodes_register_list_and_remove() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    client.register_node(node("n1", 1)).await.unwrap();
    client.register_node(node("n2", 2)).await.unwrap();
    client.register_node(node("n1", 1)).await.unwrap();

    let nodes = client.nodes().await.unwrap();
    let ids: Vec<&str> = nodes.iter().map(|node| node.node_id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n2"]);

    client.deregister_node(&NodeId::new("n2")).await.unwrap();
    assert_eq!(client.nodes().await.unwrap().len(), 1);
    server.stop().await;
}

#[tokio::test]
async fn proposal_on_empty_cluster_is_409_empty_cluster() {
    let server = TestServer::start(4_096).await;
    let delta = ConfigurationDelta::new(ConfigVersion::INITIAL).with(add_container("web", "n1"));

    let raw = reqwest::Client::new()
        .post(server.url("/v1/configuration"))
        .json(&delta)
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 409);
    assert_eq!(envelope.error.kind, "empty_cluster");

    let typed = server.client().propose(delta).await;
    assert_eq!(typed, Err(ClientError::Control(ControlError::EmptyCluster)));
    assert_eq!(server.service.current_configuration().version, ConfigVersion::INITIAL);
    server.stop().await;
}

#[tokio::test]
async fn stale_base_version_is_409_conflict_with_versions() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    client.register_node(node("n1", 1)).await.unwrap();
    let first = ConfigurationDelta::new(ConfigVersion::INITIAL).with(add_container("a", "n1"));
    let second = ConfigurationDelta::new(ConfigVersion::INITIAL).with(add_container("b", "n1"));
    assert_eq!(client.propose(first).await.unwrap(), ConfigVersion::new(1));

    let raw = reqwest::Client::new()
        .post(server.url("/v1/configuration"))
        .json(&second)
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 409);
    assert_eq!(envelope.error.kind, "conflict");
    assert_eq!(envelope.error.expected, Some(ConfigVersion::INITIAL));
    assert_eq!(envelope.error.actual, Some(ConfigVersion::new(1)));

    assert_eq!(
        client.propose(second).await,
        Err(ClientError::Control(ControlError::Conflict {
            expected: ConfigVersion::INITIAL,
            actual: ConfigVersion::new(1),
        }))
    );
    server.stop().await;
}

#[tokio::test]
async fn invalid_delta_is_422_validation() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    client.register_node(node("n1", 1)).await.unwrap();
    let delta = ConfigurationDelta::new(ConfigVersion::INITIAL).with(add_container("web", "ghost"));
    let raw = reqwest::Client::new()
        .post(server.url("/v1/configuration"))
        .json(&delta)
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 422);
    assert_eq!(envelope.error.kind, "validation");
    assert!(matches!(
        client.propose(delta).await,
        Err(ClientError::Control(ControlError::Validation(_)))
    ));
    server.stop().await;
}

#[tokio::test]
async fn malformed_json_is_400_invalid_request() {
    let server = TestServer::start(4_096).await;
    let raw = reqwest::Client::new()
        .post(server.url("/v1/nodes"))
        .header("content-type", "application/json")
        .body("{\"node_id\": ")
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 400);
    assert_eq!(envelope.error.kind, "invalid_request");

    let raw = reqwest::Client::new()
        .get(server.url("/v1/state/wait?after=banana"))
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 400);
    assert_eq!(envelope.error.kind, "invalid_request");
    server.stop().await;
}

#[tokio::test]
async fn oversized_body_is_413() {
    let server = TestServer::start(256).await;
    let padding = "x".repeat(1_024);
    let raw = reqwest::Client::new()
        .post(server.url("/v1/nodes"))
        .json(&json!({ "node_id": padding, "address": "10.0.0.1" }))
        .send()
        .await
        .unwrap();
    let (status, envelope) = error_of(raw).await;
    assert_eq!(status, 413);
    assert_eq!(envelope.error.kind, "payload_too_large");
    server.stop().await;
}

#[tokio::test]
async fn configuration_wait_times_out_with_no_content() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    let waited = client
        .wait_for_configuration(ConfigVersion::INITIAL, Duration::from_millis(50))
        .await
        .unwrap();
    assert!(waited.is_none());
    server.stop().await;
}

#[tokio::test]
async fn configuration_wait_returns_newer_version() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    client.register_node(node("n1", 1)).await.unwrap();

    let waiter = {
        let client = server.client();
        tokio::spawn(async move {
            client.wait_for_configuration(ConfigVersion::INITIAL, Duration::from_secs(5)).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .propose(ConfigurationDelta::new(ConfigVersion::INITIAL).with(add_container("web", "n1")))
        .await
        .unwrap();

    let configuration = waiter.await.unwrap().unwrap().expect("configuration published");
    assert_eq!(configuration.version, ConfigVersion::new(1));
    assert!(configuration.containers.contains_key(&ContainerName::new("web")));
    server.stop().await;
}

#[tokio::test]
async fn reports_are_accepted_then_stale() {
    let server = TestServer::start(4_096).await;
    let client = server.client();
    client.register_node(node("n1", 1)).await.unwrap();
    let report = NodeState::new(NodeId::new("n1"), 7, ConfigVersion::INITIAL, Timestamp::from_millis(1));

    assert_eq!(
        client.report_state(report.clone()).await.unwrap(),
        ReportOutcome::Accepted {
            revision: 1,
        }
    );
    assert_eq!(
        client.report_state(report).await.unwrap(),
        ReportOutcome::Stale {
            recorded: 7,
        }
    );
    let state = client.current_state().await.unwrap();
    assert_eq!(state.revision, 1);
    assert!(state.nodes.contains_key(&NodeId::new("n1")));

    let waited = client.wait_for_state(0, Duration::from_millis(10)).await.unwrap();
    assert_eq!(waited.map(|state| state.revision), Some(1));
    server.stop().await;
}

#[tokio::test]
async fn shutdown_releases_parked_long_polls() {
    let server = TestServer::start(4_096).await;
    let waiter = {
        let client = server.client();
        tokio::spawn(async move { client.wait_for_state(0, Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert!(result.is_err(), "parked wait should fail once the service closes: {result:?}");
}
