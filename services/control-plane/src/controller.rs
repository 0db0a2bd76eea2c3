//! Subscription controller.
//!
//! Every mutating operation runs under one process-wide lock. The store has no
//! multi-collection transactions, so each operation's read-modify-write cycle
//! over instances and subscriptions must not interleave with another's. The
//! lock is held across pod startup during autoscale.
//!
//! # Invariant
//!
//! Once an operation returns, for every service type the number of
//! subscriptions equals the sum of `current_connection` over its instances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arha_reconcile::{
    candidate_nodes, evict, optimize_until_feasible, spec_map, subscribers_of, NodeStatus, PodName,
    ServiceInstance, ServiceSpec, Subscription,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::agent::AgentChannel;
use crate::error::{ControllerError, Result};
use crate::health::{NodeHealth, NodeStatusCache, NodeStatusSnapshot};
use crate::inventory::NodeInventory;
use crate::launcher::Launcher;
use crate::scheduler::{Planner, PlannerSettings, Rebalancer};
use crate::store::StateStore;

/// External systems the controller drives.
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub launcher: Arc<dyn Launcher>,
    pub health: Arc<dyn NodeHealth>,
    pub agents: Arc<dyn AgentChannel>,
}

/// Where an admitted agent should connect, and at what rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admission {
    pub host_ip: String,
    pub host_port: u16,
    pub frequency: f64,
}

/// Outcome of a failure alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    /// Pods removed from the instance list.
    pub removed: Vec<String>,
    /// Subscriptions dropped for lack of capacity.
    pub evicted: Vec<Subscription>,
}

pub struct Controller {
    lock: Mutex<()>,
    store: Arc<dyn StateStore>,
    launcher: Arc<dyn Launcher>,
    inventory: Arc<NodeInventory>,
    node_status: Arc<NodeStatusCache>,
    planner: Planner,
    rebalancer: Rebalancer,
}

impl Controller {
    pub fn new(collaborators: Collaborators, inventory: NodeInventory, settings: PlannerSettings) -> Self {
        let Collaborators {
            store,
            launcher,
            health,
            agents,
        } = collaborators;
        let inventory = Arc::new(inventory);
        let node_status = Arc::new(NodeStatusCache::new());
        let rebalancer = Rebalancer::new(store.clone(), agents);
        let planner = Planner::new(
            store.clone(),
            launcher.clone(),
            health,
            inventory.clone(),
            node_status.clone(),
            rebalancer.clone(),
            settings,
        );

        Self {
            lock: Mutex::new(()),
            store,
            launcher,
            inventory,
            node_status,
            planner,
            rebalancer,
        }
    }

    fn spec(&self, service_type: &str) -> Result<ServiceSpec> {
        self.store
            .load_specs()?
            .into_iter()
            .find(|spec| spec.service_type == service_type)
            .ok_or_else(|| ControllerError::UnknownServiceType(service_type.to_string()))
    }

    /// Admit an agent to `service_type`.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, agent_ip: &str, agent_port: u16, service_type: &str) -> Result<Admission> {
        if agent_ip.trim().is_empty() {
            return Err(ControllerError::InvalidRequest("agent ip is required".to_string()));
        }
        self.spec(service_type)?;

        let _guard = self.lock.lock().await;

        let existing = subscribers_of(&self.store.load_subscriptions()?, service_type);
        let demand = existing + 1;
        let allocation = self.planner.compute_frequency(service_type, demand).await?;
        let admitted = allocation.admitted(service_type);

        if admitted <= existing {
            info!(demand, admitted, "Rejecting subscription");
            return Err(ControllerError::CapacityExhausted(format!(
                "no additional capacity for {service_type}"
            )));
        }
        if admitted != demand {
            return Err(ControllerError::ConsistencyFault(format!(
                "{service_type} admitted {admitted} agents for a demand of {demand}"
            )));
        }

        self.store.save_instances(&allocation.instances)?;
        let Some(index) = self.rebalancer.reconcile(service_type).await? else {
            return Err(ControllerError::ConsistencyFault(format!(
                "{service_type} allocation has no instance with room for the new agent"
            )));
        };

        let instance = &allocation.instances[index];
        let mut subscriptions = self.store.load_subscriptions()?;
        subscriptions.push(Subscription {
            agent_ip: agent_ip.to_string(),
            agent_port,
            service_type: service_type.to_string(),
            pod_ip: instance.pod_ip.clone(),
            node_name: instance.node_name.clone(),
        });
        self.store.save_subscriptions(&subscriptions)?;

        info!(
            pod_ip = %instance.pod_ip,
            node = %instance.node_name,
            frequency = instance.current_frequency,
            "Agent subscribed"
        );
        Ok(Admission {
            host_ip: instance.host_ip.clone(),
            host_port: instance.host_port,
            frequency: instance.current_frequency,
        })
    }

    /// Drop every subscription held by the agent. Returns how many were removed.
    ///
    /// Freed capacity is not redistributed until the next allocation of the type.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, agent_ip: &str, agent_port: u16) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let (removed, kept): (Vec<_>, Vec<_>) = self
            .store
            .load_subscriptions()?
            .into_iter()
            .partition(|sub| sub.belongs_to(agent_ip, agent_port));
        if removed.is_empty() {
            return Ok(0);
        }

        let mut instances = self.store.load_instances()?;
        for sub in &removed {
            if let Some(instance) = instances.iter_mut().find(|i| i.pod_ip == sub.pod_ip) {
                instance.release_one();
            }
        }

        self.store.save_subscriptions(&kept)?;
        self.store.save_instances(&instances)?;

        info!(removed = removed.len(), "Agent unsubscribed");
        Ok(removed.len())
    }

    /// Remove every instance on a failed node and re-home its agents.
    #[instrument(skip(self))]
    pub async fn node_failure(&self, node_name: &str) -> Result<RecoveryReport> {
        let _guard = self.lock.lock().await;

        let (failed, surviving): (Vec<_>, Vec<_>) = self
            .store
            .load_instances()?
            .into_iter()
            .partition(|inst| inst.node_name == node_name);
        if failed.is_empty() {
            warn!("No instances on failed node");
            return Ok(RecoveryReport::default());
        }

        // Delete before any bookkeeping so replacements on the same node see
        // the old pod names as terminating.
        let mut report = RecoveryReport::default();
        for instance in &failed {
            let pod = instance.pod_name();
            self.launcher
                .delete_pod(&pod)
                .await
                .map_err(ControllerError::collaborator("launcher"))?;
            report.removed.push(pod.to_string());
        }

        self.store.save_instances(&surviving)?;
        let mut scale_out_error = None;
        for instance in &failed {
            let (evicted, error) = self.recover(instance).await?;
            report.evicted.extend(evicted);
            scale_out_error = scale_out_error.or(error);
        }
        if let Some(e) = scale_out_error {
            warn!(evicted = report.evicted.len(), "Node failure handled without scale out");
            return Err(e);
        }

        info!(
            removed = report.removed.len(),
            evicted = report.evicted.len(),
            "Node failure handled"
        );
        Ok(report)
    }

    /// Remove a failed pod's instance and re-home its agents.
    #[instrument(skip(self))]
    pub async fn pod_failure(&self, pod_name: &str) -> Result<RecoveryReport> {
        let pod = pod_name
            .parse::<PodName>()
            .map_err(|e| ControllerError::InvalidRequest(e.to_string()))?;

        let _guard = self.lock.lock().await;

        let mut instances = self.store.load_instances()?;
        let Some(position) = instances.iter().position(|inst| inst.pod_name() == pod) else {
            warn!("Failed pod is not a known instance");
            return Ok(RecoveryReport::default());
        };
        self.launcher
            .delete_pod(&pod)
            .await
            .map_err(ControllerError::collaborator("launcher"))?;

        let failed = instances.remove(position);
        self.store.save_instances(&instances)?;
        let (evicted, scale_out_error) = self.recover(&failed).await?;
        if let Some(e) = scale_out_error {
            warn!(evicted = evicted.len(), "Pod failure handled without scale out");
            return Err(e);
        }

        info!(evicted = evicted.len(), "Pod failure handled");
        Ok(RecoveryReport {
            removed: vec![pod.to_string()],
            evicted,
        })
    }

    /// Reallocate the type of a removed instance and evict what no longer fits.
    ///
    /// A failed scale out falls back to the surviving instances so bindings to
    /// the removed pod never outlive the call; the collaborator error is
    /// handed back alongside the evictions.
    async fn recover(
        &self,
        failed: &ServiceInstance,
    ) -> Result<(Vec<Subscription>, Option<ControllerError>)> {
        if failed.current_connection == 0 {
            return Ok((Vec::new(), None));
        }

        let service_type = failed.service_type.as_str();
        let mut subscriptions = self.store.load_subscriptions()?;
        let demand = subscribers_of(&subscriptions, service_type);
        if demand == 0 {
            return Ok((Vec::new(), None));
        }

        let (allocation, scale_out_error) = match self.planner.compute_frequency(service_type, demand).await {
            Ok(allocation) => (allocation, None),
            Err(e @ ControllerError::Collaborator { .. }) => {
                warn!(error = %e, "Scale out failed, recovering on surviving instances");
                let instances = self.store.load_instances()?;
                let strategy = self.planner.settings().strategy;
                let (_, allocation) = optimize_until_feasible(strategy, service_type, demand, &instances);
                (allocation, Some(e))
            }
            Err(e) => return Err(e),
        };
        let admitted = allocation.admitted(service_type);

        let mut evicted = Vec::new();
        if admitted < demand {
            let surplus = (demand - admitted) as usize;
            evicted = evict(&mut subscriptions, service_type, &failed.pod_ip, surplus);
            if evicted.iter().any(|sub| sub.pod_ip != failed.pod_ip) {
                warn!(
                    pod_ip = %failed.pod_ip,
                    "Evicting subscriptions from surviving instances"
                );
            }
            for sub in &evicted {
                info!(agent_ip = %sub.agent_ip, agent_port = sub.agent_port, service_type, "Evicted subscription");
            }
            self.store.save_subscriptions(&subscriptions)?;
        }

        self.store.save_instances(&allocation.instances)?;
        self.rebalancer.reconcile(service_type).await?;
        Ok((evicted, scale_out_error))
    }

    /// Deploy a new instance of `service_type` on an explicit node.
    #[instrument(skip(self))]
    pub async fn deploy_on(&self, service_type: &str, node_name: &str) -> Result<ServiceInstance> {
        self.spec(service_type)?;
        let _guard = self.lock.lock().await;
        self.planner.deploy_on_node(service_type, node_name).await
    }

    /// Probe every known node and refresh the status cache.
    pub async fn refresh_node_status(&self) -> Result<BTreeMap<String, NodeStatus>> {
        let specs = spec_map(self.store.load_specs()?);
        let mut nodes: BTreeSet<String> = candidate_nodes(specs.values());
        nodes.extend(self.inventory.node_names().map(str::to_string));
        let nodes: Vec<String> = nodes.into_iter().collect();
        self.planner.refresh_health(&nodes).await
    }

    pub async fn node_status(&self) -> NodeStatusSnapshot {
        self.node_status.snapshot().await
    }

    pub fn instances(&self) -> Result<Vec<ServiceInstance>> {
        Ok(self.store.load_instances()?)
    }

    pub fn subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.store.load_subscriptions()?)
    }

    /// Whether the store answers.
    pub fn check_store(&self) -> Result<()> {
        self.store.load_specs()?;
        Ok(())
    }
}
