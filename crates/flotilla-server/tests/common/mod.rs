// crates/flotilla-server/tests/common/mod.rs
// ============================================================================
// Module: Server Test Harness
// Description: Starts a control server on an ephemeral port.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers.")]

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use flotilla_config::ServerConfig;
use flotilla_core::ControlService;
use flotilla_core::InMemoryClusterStore;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::SystemClock;
use flotilla_core::runtime::NoopAuditSink;
use flotilla_server::ControlServer;
use flotilla_server::HttpControlClient;
use flotilla_server::ServerError;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A running control server bound to 127.0.0.1.
pub struct TestServer {
    pub base_url: String,
    pub service: Arc<ControlService>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn start(max_body_bytes: usize) -> Self {
        let service = Arc::new(
            ControlService::open(
                Arc::new(InMemoryClusterStore::new()),
                Arc::new(SystemClock),
                Arc::new(NoopAuditSink),
            )
            .expect("open control service"),
        );
        let settings = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            max_body_bytes,
            max_wait_ms: 30_000,
        };
        let server = ControlServer::new(Arc::clone(&service), settings);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_on(listener, async move {
            let _ = signal.await;
        }));
        Self {
            base_url: format!("http://{addr}"),
            service,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn client(&self) -> Arc<HttpControlClient> {
        Arc::new(HttpControlClient::new(&self.base_url, Duration::from_secs(10)).expect("client"))
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server stops")
            .expect("server task")
            .expect("server result");
    }
}

pub fn node(id: &str, last_octet: u8) -> Node {
    Node::new(NodeId::new(id), IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)))
}
