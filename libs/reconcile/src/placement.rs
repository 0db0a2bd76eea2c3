//! Placement scoring for new instances.
//!
//! A node can take a new instance of a type when it is healthy, does not run
//! that type yet, has GPU memory for every co-resident type plus the new one,
//! and splitting its capacity one way further still leaves every type on it at
//! or above its nominal rate. Among qualifying nodes the one giving the new
//! instance the largest workload wins.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Ineligibility;
use crate::model::{ServiceInstance, ServiceSpec};

/// What the planner knows about a node when scoring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCandidate {
    pub node_name: String,
    pub healthy: bool,
    /// GPU memory available on the node; `None` when the inventory lacks it.
    pub gpu_budget: Option<u64>,
}

/// A node chosen for a new instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementDecision {
    pub node_name: String,
    /// Workload the new instance gets after the split.
    pub workload_limit: f64,
    /// Instances already running on the node.
    pub co_resident: usize,
}

/// A node that was considered and turned down.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub node_name: String,
    pub reason: Ineligibility,
}

/// Every node any spec can run on.
pub fn candidate_nodes<'a>(specs: impl IntoIterator<Item = &'a ServiceSpec>) -> BTreeSet<String> {
    specs
        .into_iter()
        .flat_map(|spec| spec.work_ability.keys().cloned())
        .collect()
}

fn share(
    specs: &BTreeMap<String, ServiceSpec>,
    service_type: &str,
    node_name: &str,
    ways: usize,
) -> Result<f64, Ineligibility> {
    let spec = specs
        .get(service_type)
        .ok_or_else(|| Ineligibility::NoWorkAbility(service_type.to_string()))?;
    let capacity = spec
        .work_ability_on(node_name)
        .ok_or_else(|| Ineligibility::NoWorkAbility(service_type.to_string()))?;
    let workload_limit = capacity / ways as f64;
    if workload_limit < spec.frequency_limit.default {
        return Err(Ineligibility::WorkloadBelowDefault {
            service_type: service_type.to_string(),
            workload_limit,
            default: spec.frequency_limit.default,
        });
    }
    Ok(workload_limit)
}

/// Score `candidate` for a new instance of `service_type`.
///
/// Returns the workload the new instance would get.
pub fn evaluate_node(
    specs: &BTreeMap<String, ServiceSpec>,
    instances: &[ServiceInstance],
    service_type: &str,
    candidate: &NodeCandidate,
) -> Result<f64, Ineligibility> {
    if !candidate.healthy {
        return Err(Ineligibility::Unhealthy);
    }

    let co_resident: Vec<&ServiceInstance> = instances
        .iter()
        .filter(|inst| inst.node_name == candidate.node_name)
        .collect();
    if co_resident.iter().any(|inst| inst.is_type(service_type)) {
        return Err(Ineligibility::AlreadyHosts(service_type.to_string()));
    }

    let budget = candidate.gpu_budget.ok_or(Ineligibility::UnknownGpuBudget)?;
    let requested: u64 = co_resident
        .iter()
        .map(|inst| inst.service_type.as_str())
        .chain(std::iter::once(service_type))
        .filter_map(|ty| specs.get(ty))
        .map(|spec| spec.gpu_memory_request)
        .sum();
    if requested > budget {
        return Err(Ineligibility::GpuBudgetExceeded { requested, budget });
    }

    let ways = co_resident.len() + 1;
    let workload_limit = share(specs, service_type, &candidate.node_name, ways)?;
    for inst in &co_resident {
        share(specs, &inst.service_type, &candidate.node_name, ways)?;
    }

    Ok(workload_limit)
}

/// Pick the best node for a new instance of `service_type`.
///
/// The first candidate wins ties. When nothing qualifies, every candidate is
/// returned with the reason it was turned down.
pub fn choose_node(
    specs: &BTreeMap<String, ServiceSpec>,
    instances: &[ServiceInstance],
    service_type: &str,
    candidates: &[NodeCandidate],
) -> Result<PlacementDecision, Vec<Rejection>> {
    let mut best: Option<PlacementDecision> = None;
    let mut rejected = Vec::new();

    for candidate in candidates {
        match evaluate_node(specs, instances, service_type, candidate) {
            Ok(workload_limit) => {
                if best.as_ref().is_some_and(|b| workload_limit <= b.workload_limit) {
                    continue;
                }
                best = Some(PlacementDecision {
                    node_name: candidate.node_name.clone(),
                    workload_limit,
                    co_resident: instances
                        .iter()
                        .filter(|inst| inst.node_name == candidate.node_name)
                        .count(),
                });
            }
            Err(reason) => rejected.push(Rejection {
                node_name: candidate.node_name.clone(),
                reason,
            }),
        }
    }

    best.ok_or(rejected)
}

/// Split `node_name`'s capacity `ways` ways across the instances already on it.
///
/// Returns the service types whose instances were touched, in list order.
pub fn reflow_node(
    specs: &BTreeMap<String, ServiceSpec>,
    instances: &mut [ServiceInstance],
    node_name: &str,
    ways: usize,
) -> Vec<String> {
    let mut touched = Vec::new();
    for inst in instances.iter_mut().filter(|inst| inst.node_name == node_name) {
        let Some(capacity) = specs
            .get(&inst.service_type)
            .and_then(|spec| spec.work_ability_on(node_name))
        else {
            continue;
        };
        inst.workload_limit = capacity / ways as f64;
        if !touched.contains(&inst.service_type) {
            touched.push(inst.service_type.clone());
        }
    }
    touched
}
