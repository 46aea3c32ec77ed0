// crates/flotilla-core/tests/common/mod.rs
// ============================================================================
// Module: Flotilla Core Test Harness
// Description: Shared fixtures for control service, agent, and probe tests.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers.")]

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use flotilla_core::AgentSettings;
use flotilla_core::AuditSink;
use flotilla_core::ConfigVersion;
use flotilla_core::ConfigurationChange;
use flotilla_core::ConfigurationDelta;
use flotilla_core::ContainerName;
use flotilla_core::ContainerSpec;
use flotilla_core::ControlClient;
use flotilla_core::ControlService;
use flotilla_core::ImageRef;
use flotilla_core::InMemoryClusterStore;
use flotilla_core::LocalControlClient;
use flotilla_core::ManualClock;
use flotilla_core::Node;
use flotilla_core::NodeId;
use flotilla_core::ReconciliationAgent;
use flotilla_core::SimulatedNodeRuntime;
use flotilla_core::runtime::MemoryAuditSink;

/// Agent tick used by the harness.
pub const TICK: Duration = Duration::from_secs(1);

/// In-process cluster driven by a manual clock.
pub struct Harness {
    pub store: Arc<InMemoryClusterStore>,
    pub clock: Arc<ManualClock>,
    pub audit: Arc<MemoryAuditSink>,
    pub service: Arc<ControlService>,
    pub client: Arc<LocalControlClient>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryClusterStore::new());
        let clock = Arc::new(ManualClock::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let service = Arc::new(
            ControlService::open(
                Arc::clone(&store) as _,
                Arc::clone(&clock) as _,
                Arc::clone(&audit) as Arc<dyn AuditSink>,
            )
            .expect("open control service"),
        );
        let client = Arc::new(LocalControlClient::new(Arc::clone(&service)));
        Self {
            store,
            clock,
            audit,
            service,
            client,
        }
    }

    pub fn with_nodes(ids: &[&str]) -> Self {
        let harness = Self::new();
        for (index, id) in ids.iter().enumerate() {
            let last_octet = u8::try_from(index + 1).expect("small index");
            harness
                .service
                .register_node(Node::new(
                    NodeId::new(*id),
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)),
                ))
                .expect("register node");
        }
        harness
    }

    pub fn client(&self) -> Arc<dyn ControlClient> {
        Arc::clone(&self.client) as Arc<dyn ControlClient>
    }

    pub fn agent(&self, node_id: &str) -> (ReconciliationAgent, Arc<SimulatedNodeRuntime>) {
        let runtime = Arc::new(SimulatedNodeRuntime::new());
        let agent = ReconciliationAgent::new(
            AgentSettings::new(NodeId::new(node_id)).with_tick_interval(TICK),
            self.client(),
            Arc::clone(&runtime) as _,
            Arc::clone(&self.clock) as _,
            Arc::clone(&self.audit) as Arc<dyn AuditSink>,
        );
        (agent, runtime)
    }

    pub fn version(&self) -> ConfigVersion {
        self.service.current_configuration().version
    }

    pub fn propose(&self, change: ConfigurationChange) -> ConfigVersion {
        let delta = ConfigurationDelta::new(self.version()).with(change);
        self.service.propose(&delta).expect("proposal accepted")
    }
}

pub fn add_container(name: &str, image: &str, node_id: &str) -> ConfigurationChange {
    ConfigurationChange::AddContainer {
        container: ContainerSpec::new(
            ContainerName::new(name),
            ImageRef::new(image),
            NodeId::new(node_id),
        ),
    }
}

/// Lets spawned tasks on the current-thread runtime make progress.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
