//! Subscription rebalancing.
//!
//! After an allocation for a service type is committed, the persisted
//! subscriptions of that type are walked against it. Every instance gets a
//! quota equal to its connection count. Subscriptions whose pod still has
//! quota stay put and are told their new rate; the rest are moved to an
//! instance with quota left and told where to go.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::agent::{AgentAddr, AgentChannel, ServiceChange};
use crate::error::Result;
use crate::store::StateStore;

#[derive(Clone)]
pub struct Rebalancer {
    store: Arc<dyn StateStore>,
    agents: Arc<dyn AgentChannel>,
}

impl Rebalancer {
    pub fn new(store: Arc<dyn StateStore>, agents: Arc<dyn AgentChannel>) -> Self {
        Self { store, agents }
    }

    /// Bring the subscriptions of `service_type` in line with the stored instances.
    ///
    /// Returns the index of the first instance of the type with quota left
    /// over, which is where a newly admitted agent belongs.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, service_type: &str) -> Result<Option<usize>> {
        let instances = self.store.load_instances()?;
        let mut subscriptions = self.store.load_subscriptions()?;

        // (instance index, quota left), in instance order
        let mut quota: Vec<(usize, u32)> = instances
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.is_type(service_type))
            .map(|(idx, inst)| (idx, inst.current_connection))
            .collect();
        let slot_of: HashMap<String, usize> = quota
            .iter()
            .enumerate()
            .map(|(slot, (idx, _))| (instances[*idx].pod_ip.clone(), slot))
            .collect();

        let mut notices = Vec::new();
        let mut displaced = Vec::new();
        for (pos, sub) in subscriptions.iter().enumerate() {
            if sub.service_type != service_type {
                continue;
            }
            match slot_of.get(&sub.pod_ip) {
                Some(&slot) if quota[slot].1 > 0 => {
                    quota[slot].1 -= 1;
                    let instance = &instances[quota[slot].0];
                    notices.push((AgentAddr::from(sub), ServiceChange::rate_only(instance)));
                }
                _ => displaced.push(pos),
            }
        }

        for pos in displaced {
            let sub = &mut subscriptions[pos];
            let Some(slot) = quota.iter().position(|(_, left)| *left > 0) else {
                warn!(
                    agent = %AgentAddr::from(&*sub),
                    pod_ip = %sub.pod_ip,
                    "No instance has room for displaced subscription"
                );
                continue;
            };
            quota[slot].1 -= 1;
            let instance = &instances[quota[slot].0];
            info!(
                agent = %AgentAddr::from(&*sub),
                from = %sub.pod_ip,
                to = %instance.pod_ip,
                "Migrating subscription"
            );
            sub.pod_ip = instance.pod_ip.clone();
            sub.node_name = instance.node_name.clone();
            notices.push((AgentAddr::from(&*sub), ServiceChange::relocate(instance)));
        }

        self.store.save_subscriptions(&subscriptions)?;
        self.deliver(notices).await;

        let spare = quota.iter().find(|(_, left)| *left > 0).map(|(idx, _)| *idx);
        debug!(spare = ?spare, "Rebalanced subscriptions");
        Ok(spare)
    }

    async fn deliver(&self, notices: Vec<(AgentAddr, ServiceChange)>) {
        let sends = notices.iter().map(|(agent, change)| async move {
            if let Err(e) = self.agents.notify(agent, change).await {
                warn!(agent = %agent, error = %e, "Failed to notify agent");
            }
        });
        join_all(sends).await;
    }
}

#[cfg(test)]
mod tests {
    use arha_reconcile::{FrequencyLimit, ServiceInstance, Subscription};

    use super::*;
    use crate::agent::RecordingAgentChannel;
    use crate::store::MemoryStore;

    fn instance(pod_ip: &str, service_type: &str, connections: u32, frequency: f64) -> ServiceInstance {
        ServiceInstance {
            pod_ip: pod_ip.to_string(),
            host_ip: format!("host-{pod_ip}"),
            host_port: 30500,
            node_name: format!("node-{pod_ip}"),
            service_type: service_type.to_string(),
            current_connection: connections,
            frequency_limit: FrequencyLimit::new(20.0, 10.0),
            current_frequency: frequency,
            workload_limit: 80.0,
        }
    }

    fn sub(agent: &str, service_type: &str, pod_ip: &str) -> Subscription {
        Subscription {
            agent_ip: agent.to_string(),
            agent_port: 8888,
            service_type: service_type.to_string(),
            pod_ip: pod_ip.to_string(),
            node_name: format!("node-{pod_ip}"),
        }
    }

    fn setup(instances: Vec<ServiceInstance>, subs: Vec<Subscription>) -> (Rebalancer, Arc<MemoryStore>, Arc<RecordingAgentChannel>) {
        let store = Arc::new(MemoryStore::new());
        store.save_instances(&instances).unwrap();
        store.save_subscriptions(&subs).unwrap();
        let agents = Arc::new(RecordingAgentChannel::new());
        (Rebalancer::new(store.clone(), agents.clone()), store, agents)
    }

    #[tokio::test]
    async fn test_returns_instance_with_spare_quota() {
        let (rebalancer, _, agents) = setup(
            vec![instance("p1", "pose", 1, 20.0), instance("p2", "pose", 2, 20.0)],
            vec![sub("a1", "pose", "p1"), sub("a2", "pose", "p2")],
        );

        let spare = rebalancer.reconcile("pose").await.unwrap();

        assert_eq!(spare, Some(1));
        let sent = agents.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, change)| change.ip.is_none()));
    }

    #[tokio::test]
    async fn test_migrates_overflow_and_vanished_pods() {
        let (rebalancer, store, agents) = setup(
            vec![
                instance("other", "object", 0, 30.0),
                instance("p1", "pose", 1, 17.0),
                instance("p2", "pose", 2, 18.0),
            ],
            vec![
                sub("a1", "pose", "p1"),
                sub("a2", "pose", "p1"),
                sub("a3", "pose", "gone"),
            ],
        );

        let spare = rebalancer.reconcile("pose").await.unwrap();

        assert_eq!(spare, None);
        let subs = store.load_subscriptions().unwrap();
        assert_eq!(subs[0].pod_ip, "p1");
        assert_eq!(subs[1].pod_ip, "p2");
        assert_eq!(subs[1].node_name, "node-p2");
        assert_eq!(subs[2].pod_ip, "p2");

        let sent = agents.sent();
        let relocations: Vec<_> = sent.iter().filter(|(_, c)| c.ip.is_some()).collect();
        assert_eq!(relocations.len(), 2);
        assert_eq!(relocations[0].1.ip.as_deref(), Some("host-p2"));
        assert_eq!(relocations[0].1.frequency, 18.0);
    }

    #[tokio::test]
    async fn test_never_exceeds_instance_connections() {
        let (rebalancer, store, _) = setup(
            vec![instance("p1", "pose", 1, 20.0)],
            vec![sub("a1", "pose", "p1"), sub("a2", "pose", "p1")],
        );

        rebalancer.reconcile("pose").await.unwrap();

        // a2 has nowhere to go and stays unresolved
        let subs = store.load_subscriptions().unwrap();
        assert_eq!(subs.len(), 2);
    }

    #[tokio::test]
    async fn test_leaves_other_types_alone() {
        let (rebalancer, store, agents) = setup(
            vec![instance("p1", "pose", 1, 20.0)],
            vec![sub("a1", "object", "elsewhere"), sub("a2", "pose", "p1")],
        );

        rebalancer.reconcile("pose").await.unwrap();

        assert_eq!(store.load_subscriptions().unwrap()[0].pod_ip, "elsewhere");
        assert_eq!(agents.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_roll_back() {
        let (rebalancer, store, agents) = setup(
            vec![instance("p2", "pose", 1, 20.0)],
            vec![sub("a1", "pose", "gone")],
        );
        agents.set_unreachable(AgentAddr::new("a1", 8888));

        rebalancer.reconcile("pose").await.unwrap();

        assert_eq!(store.load_subscriptions().unwrap()[0].pod_ip, "p2");
        assert!(agents.sent().is_empty());
    }
}
