#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arha_control_plane::{
    agent::RecordingAgentChannel,
    controller::{Collaborators, Controller},
    health::StaticNodeHealth,
    inventory::NodeInventory,
    launcher::MockLauncher,
    scheduler::{PlannerSettings, PortPool, ReadinessPolicy},
    store::{MemoryStore, StateStore},
};
use arha_reconcile::{connections_of, subscribers_of, FrequencyLimit, OptimizerStrategy, ServiceSpec};

pub const GPU_A: &str = "192.168.1.10";
pub const GPU_B: &str = "192.168.1.11";

pub fn spec(service_type: &str, limit: [f64; 2], gpu: u64, ability: &[(&str, f64)]) -> ServiceSpec {
    ServiceSpec {
        service_type: service_type.to_string(),
        frequency_limit: FrequencyLimit::from(limit),
        work_ability: ability.iter().map(|(n, c)| (n.to_string(), *c)).collect(),
        gpu_memory_request: gpu,
    }
}

pub fn specs() -> Vec<ServiceSpec> {
    vec![
        spec("pose", [20.0, 10.0], 2, &[("gpu-a", 70.0), ("gpu-b", 85.0)]),
        spec("object", [30.0, 15.0], 4, &[("gpu-a", 170.0), ("gpu-b", 255.0)]),
    ]
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub store: Arc<MemoryStore>,
    pub launcher: Arc<MockLauncher>,
    pub health: Arc<StaticNodeHealth>,
    pub agents: Arc<RecordingAgentChannel>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_launcher(MockLauncher::new())
    }

    pub fn with_launcher(launcher: MockLauncher) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.save_specs(&specs()).unwrap();
        let launcher = Arc::new(
            launcher
                .with_host_address("gpu-a", GPU_A)
                .with_host_address("gpu-b", GPU_B),
        );
        let health = Arc::new(StaticNodeHealth::healthy());
        let agents = Arc::new(RecordingAgentChannel::new());
        let inventory = NodeInventory::new()
            .with_node("gpu-a", GPU_A, 8)
            .with_node("gpu-b", GPU_B, 8);
        let settings = PlannerSettings {
            strategy: OptimizerStrategy::TwoPhase,
            ports: PortPool::default(),
            readiness: ReadinessPolicy {
                attempts: 2,
                delay: Duration::from_millis(1),
            },
        };

        let controller = Arc::new(Controller::new(
            Collaborators {
                store: store.clone(),
                launcher: launcher.clone(),
                health: health.clone(),
                agents: agents.clone(),
            },
            inventory,
            settings,
        ));

        Self {
            controller,
            store,
            launcher,
            health,
            agents,
        }
    }

    /// Subscribe `count` agents to `service_type`, ports starting at 9000.
    pub async fn subscribe_many(&self, service_type: &str, count: u16) {
        for i in 0..count {
            self.controller
                .subscribe("10.1.0.1", 9000 + i, service_type)
                .await
                .unwrap_or_else(|e| panic!("subscription {i} rejected: {e}"));
        }
    }

    /// Subscriptions per pod IP.
    pub fn subscriptions_by_pod(&self) -> BTreeMap<String, u32> {
        let mut by_pod = BTreeMap::new();
        for sub in self.store.load_subscriptions().unwrap() {
            *by_pod.entry(sub.pod_ip).or_insert(0) += 1;
        }
        by_pod
    }

    /// Per type, subscriptions match connections, and per pod too.
    pub fn assert_consistent(&self) {
        let instances = self.store.load_instances().unwrap();
        let subscriptions = self.store.load_subscriptions().unwrap();

        for spec in specs() {
            assert_eq!(
                subscribers_of(&subscriptions, &spec.service_type),
                connections_of(&instances, &spec.service_type),
                "connection count mismatch for {}",
                spec.service_type
            );
        }

        let by_pod = self.subscriptions_by_pod();
        for instance in &instances {
            assert_eq!(
                by_pod.get(&instance.pod_ip).copied().unwrap_or(0),
                instance.current_connection,
                "subscriptions bound to {} disagree with its connection count",
                instance.pod_ip
            );
        }
        for pod_ip in by_pod.keys() {
            assert!(
                instances.iter().any(|i| &i.pod_ip == pod_ip),
                "subscription bound to unknown pod {pod_ip}"
            );
        }
    }
}
