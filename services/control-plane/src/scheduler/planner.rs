//! Autoscale planner.
//!
//! Finds an allocation for a service type's demand. When the type has no
//! instance yet, or serving the demand would push any bound agent below the
//! nominal rate, a new instance is deployed first:
//!
//! 1. Probe node health and score every candidate node
//! 2. Split the chosen node's capacity with the new instance and re-optimize
//!    every co-resident type at its current demand; abort if any would fail
//! 3. Launch the pod on the first free host port and wait for readiness
//! 4. Commit the reflowed instances plus the new one, then rebalance the
//!    co-resident types whose allocation changed
//!
//! Afterwards the demand is reduced one agent at a time until it can be served.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use arha_reconcile::{
    candidate_nodes, choose_node, connections_of, evaluate_node, optimize_until_feasible,
    reflow_node, spec_map, Allocation, NodeCandidate, NodeStatus, PlacementDecision, PodName,
    ServiceInstance, ServiceSpec,
};
use tracing::{debug, info, instrument, warn};

use super::{PlannerSettings, Rebalancer};
use crate::error::{ControllerError, Result};
use crate::health::{NodeHealth, NodeStatusCache};
use crate::inventory::NodeInventory;
use crate::launcher::{Launcher, PodPlacement};
use crate::store::StateStore;

pub struct Planner {
    store: Arc<dyn StateStore>,
    launcher: Arc<dyn Launcher>,
    health: Arc<dyn NodeHealth>,
    inventory: Arc<NodeInventory>,
    node_status: Arc<NodeStatusCache>,
    rebalancer: Rebalancer,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(
        store: Arc<dyn StateStore>,
        launcher: Arc<dyn Launcher>,
        health: Arc<dyn NodeHealth>,
        inventory: Arc<NodeInventory>,
        node_status: Arc<NodeStatusCache>,
        rebalancer: Rebalancer,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            store,
            launcher,
            health,
            inventory,
            node_status,
            rebalancer,
            settings,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Allocation serving as much of `demand` as possible, scaling out if needed.
    ///
    /// The returned allocation is not persisted.
    #[instrument(skip(self))]
    pub async fn compute_frequency(&self, service_type: &str, demand: u32) -> Result<Allocation> {
        let strategy = self.settings.strategy;
        let mut instances = self.store.load_instances()?;

        if self.needs_scale_out(service_type, demand, &instances) {
            match self.deploy_service(service_type).await {
                Ok(instance) => {
                    info!(pod_ip = %instance.pod_ip, node = %instance.node_name, "Scaled out");
                    instances = self.store.load_instances()?;
                }
                Err(ControllerError::CapacityExhausted(reason)) => {
                    warn!(reason = %reason, "Scale out not possible, serving with existing capacity");
                }
                Err(e) => return Err(e),
            }
        }

        let (served, allocation) = optimize_until_feasible(strategy, service_type, demand, &instances);
        if served < demand {
            info!(demand, served, "Demand only partially servable");
        }
        Ok(allocation)
    }

    fn needs_scale_out(&self, service_type: &str, demand: u32, instances: &[ServiceInstance]) -> bool {
        if !instances.iter().any(|inst| inst.is_type(service_type)) {
            debug!("No instance of type yet");
            return true;
        }

        let trial = self.settings.strategy.optimize(service_type, demand, instances);
        let degraded = trial.instances.iter().any(|inst| {
            inst.is_type(service_type)
                && inst.current_connection > 0
                && inst.current_frequency < inst.frequency_limit.default
        });
        !trial.outcome.is_success() || degraded
    }

    /// Deploy a new instance of `service_type` on the best node.
    #[instrument(skip(self))]
    pub async fn deploy_service(&self, service_type: &str) -> Result<ServiceInstance> {
        let specs = spec_map(self.store.load_specs()?);
        let spec = specs
            .get(service_type)
            .ok_or_else(|| ControllerError::UnknownServiceType(service_type.to_string()))?;

        let nodes: Vec<String> = candidate_nodes(specs.values()).into_iter().collect();
        let health = self.refresh_health(&nodes).await?;
        let instances = self.store.load_instances()?;
        let candidates: Vec<NodeCandidate> = nodes
            .iter()
            .map(|node| self.candidate(node, &health))
            .collect();

        let decision = choose_node(&specs, &instances, service_type, &candidates).map_err(|rejected| {
            for r in &rejected {
                debug!(node = %r.node_name, reason = %r.reason, "Node rejected");
            }
            ControllerError::CapacityExhausted(format!("no node can host another {service_type} instance"))
        })?;

        self.place(&specs, spec, instances, decision).await
    }

    /// Deploy a new instance of `service_type` on `node_name`.
    #[instrument(skip(self))]
    pub async fn deploy_on_node(&self, service_type: &str, node_name: &str) -> Result<ServiceInstance> {
        let specs = spec_map(self.store.load_specs()?);
        let spec = specs
            .get(service_type)
            .ok_or_else(|| ControllerError::UnknownServiceType(service_type.to_string()))?;
        if spec.work_ability_on(node_name).is_none() {
            return Err(ControllerError::InvalidRequest(format!(
                "{service_type} cannot run on node {node_name}"
            )));
        }

        let health = self.refresh_health(&[node_name.to_string()]).await?;
        let instances = self.store.load_instances()?;
        let candidate = self.candidate(node_name, &health);

        let workload_limit = evaluate_node(&specs, &instances, service_type, &candidate).map_err(|reason| {
            ControllerError::CapacityExhausted(format!("node {node_name} cannot host {service_type}: {reason}"))
        })?;
        let decision = PlacementDecision {
            node_name: node_name.to_string(),
            workload_limit,
            co_resident: instances.iter().filter(|i| i.node_name == node_name).count(),
        };

        self.place(&specs, spec, instances, decision).await
    }

    fn candidate(&self, node: &str, health: &BTreeMap<String, NodeStatus>) -> NodeCandidate {
        NodeCandidate {
            node_name: node.to_string(),
            healthy: health.get(node).is_some_and(NodeStatus::is_healthy),
            gpu_budget: self.inventory.gpu_memory(node),
        }
    }

    async fn place(
        &self,
        specs: &BTreeMap<String, ServiceSpec>,
        spec: &ServiceSpec,
        mut instances: Vec<ServiceInstance>,
        decision: PlacementDecision,
    ) -> Result<ServiceInstance> {
        let node = decision.node_name.as_str();
        let touched = reflow_node(specs, &mut instances, node, decision.co_resident + 1);

        let mut changed = Vec::new();
        for service_type in touched {
            let demand = connections_of(&instances, &service_type);
            if demand == 0 {
                continue;
            }
            let allocation = self.settings.strategy.optimize(&service_type, demand, &instances);
            if !allocation.outcome.is_success() {
                return Err(ControllerError::CapacityExhausted(format!(
                    "sharing {node} would leave {service_type} agents below their minimum rate"
                )));
            }
            if allocation.instances != instances {
                changed.push(service_type);
            }
            instances = allocation.instances;
        }

        let (pod, placement) = self.launch(&spec.service_type, node, &instances).await?;
        let instance = ServiceInstance {
            pod_ip: placement.pod_ip,
            host_ip: placement.host_ip,
            host_port: pod.host_port,
            node_name: placement.node_name,
            service_type: spec.service_type.clone(),
            current_connection: 0,
            frequency_limit: spec.frequency_limit,
            current_frequency: spec.frequency_limit.default,
            workload_limit: decision.workload_limit,
        };
        instances.push(instance.clone());
        self.store.save_instances(&instances)?;

        for service_type in &changed {
            self.rebalancer.reconcile(service_type).await?;
        }

        info!(
            pod = %pod,
            pod_ip = %instance.pod_ip,
            workload_limit = instance.workload_limit,
            reflowed = ?changed,
            "Deployed instance"
        );
        Ok(instance)
    }

    /// Create the pod on the first free port whose name is not still terminating.
    async fn launch(
        &self,
        service_type: &str,
        node: &str,
        instances: &[ServiceInstance],
    ) -> Result<(PodName, PodPlacement)> {
        let used: HashSet<u16> = instances.iter().map(|i| i.host_port).collect();

        for port in self.settings.ports.free(&used) {
            let pod = PodName::new(service_type, node, port);
            let terminating = self
                .launcher
                .is_terminating(&pod)
                .await
                .map_err(ControllerError::collaborator("launcher"))?;
            if terminating {
                debug!(pod = %pod, "Pod name still terminating, trying next port");
                continue;
            }

            let placement = self
                .launcher
                .create_pod(&pod)
                .await
                .map_err(ControllerError::collaborator("launcher"))?;
            self.wait_until_ready(&pod).await?;
            return Ok((pod, placement));
        }

        Err(ControllerError::CapacityExhausted(format!(
            "no free host port in {}",
            self.settings.ports
        )))
    }

    /// Poll readiness within the configured budget.
    ///
    /// Running out of attempts is not an error; the instance is committed and
    /// agents bound to it start working once the pod comes up.
    async fn wait_until_ready(&self, pod: &PodName) -> Result<bool> {
        let policy = self.settings.readiness;
        for attempt in 1..=policy.attempts {
            let ready = self
                .launcher
                .is_ready(pod)
                .await
                .map_err(ControllerError::collaborator("launcher"))?;
            if ready {
                debug!(pod = %pod, attempt, "Pod ready");
                return Ok(true);
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        warn!(pod = %pod, attempts = policy.attempts, "Pod not ready within budget");
        Ok(false)
    }

    /// Probe `nodes` and update the status cache.
    pub async fn refresh_health(&self, nodes: &[String]) -> Result<BTreeMap<String, NodeStatus>> {
        let statuses = self
            .health
            .health_of(nodes)
            .await
            .map_err(ControllerError::collaborator("node health"))?;
        self.node_status.update(statuses.clone()).await;
        Ok(statuses)
    }
}
