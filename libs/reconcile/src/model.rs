//! Allocation data model.
//!
//! These are the records held by the state store. Field names serialize in
//! camelCase so the persisted collections stay readable by the agents and
//! tooling that already consume them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PodNameError;

/// Per-agent rate bounds of a service type.
///
/// Serialized as the two-element array `[default, minimum]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct FrequencyLimit {
    /// Nominal rate granted to every agent while capacity allows it.
    pub default: f64,
    /// Quality floor; admissions below it are reported as a soft failure.
    pub minimum: f64,
}

impl FrequencyLimit {
    pub const fn new(default: f64, minimum: f64) -> Self {
        Self { default, minimum }
    }
}

impl From<[f64; 2]> for FrequencyLimit {
    fn from([default, minimum]: [f64; 2]) -> Self {
        Self { default, minimum }
    }
}

impl From<FrequencyLimit> for [f64; 2] {
    fn from(limit: FrequencyLimit) -> Self {
        [limit.default, limit.minimum]
    }
}

/// Static configuration of one service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub service_type: String,
    pub frequency_limit: FrequencyLimit,
    /// Total throughput a lone instance of this type provides on each node.
    #[serde(default)]
    pub work_ability: BTreeMap<String, f64>,
    #[serde(default)]
    pub gpu_memory_request: u64,
}

impl ServiceSpec {
    /// Throughput of a lone instance on `node`, if the type can run there.
    pub fn work_ability_on(&self, node: &str) -> Option<f64> {
        self.work_ability.get(node).copied()
    }
}

/// Index specs by service type.
pub fn spec_map(specs: impl IntoIterator<Item = ServiceSpec>) -> BTreeMap<String, ServiceSpec> {
    specs
        .into_iter()
        .map(|spec| (spec.service_type.clone(), spec))
        .collect()
}

/// A deployed instance of a service type on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    pub host_port: u16,
    pub node_name: String,
    pub service_type: String,
    /// Number of agents currently bound.
    pub current_connection: u32,
    pub frequency_limit: FrequencyLimit,
    /// Rate granted to each bound agent; uniform across the instance.
    pub current_frequency: f64,
    /// This instance's share of the node's capacity for its type.
    pub workload_limit: f64,
}

impl ServiceInstance {
    /// Capacity left after serving every bound agent at the nominal rate.
    pub fn remaining(&self) -> f64 {
        self.workload_limit - f64::from(self.current_connection) * self.frequency_limit.default
    }

    /// Per-agent rate if one more agent were bound.
    pub fn predicted_frequency(&self) -> f64 {
        self.workload_limit / f64::from(self.current_connection + 1)
    }

    /// Drop every binding and return to the nominal rate.
    pub fn reset(&mut self) {
        self.current_connection = 0;
        self.current_frequency = self.frequency_limit.default;
    }

    /// Remove one bound agent, resetting the rate once the instance is idle.
    pub fn release_one(&mut self) {
        self.current_connection = self.current_connection.saturating_sub(1);
        if self.current_connection == 0 {
            self.current_frequency = self.frequency_limit.default;
        }
    }

    pub fn pod_name(&self) -> PodName {
        PodName::new(&self.service_type, &self.node_name, self.host_port)
    }

    pub fn is_type(&self, service_type: &str) -> bool {
        self.service_type == service_type
    }
}

/// Sum of bound agents across the instances of `service_type`.
pub fn connections_of(instances: &[ServiceInstance], service_type: &str) -> u32 {
    instances
        .iter()
        .filter(|i| i.is_type(service_type))
        .map(|i| i.current_connection)
        .sum()
}

/// A binding of one agent to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "agentIP")]
    pub agent_ip: String,
    pub agent_port: u16,
    pub service_type: String,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    pub node_name: String,
}

impl Subscription {
    pub fn belongs_to(&self, agent_ip: &str, agent_port: u16) -> bool {
        self.agent_ip == agent_ip && self.agent_port == agent_port
    }
}

/// Number of subscriptions held for `service_type`.
pub fn subscribers_of(subscriptions: &[Subscription], service_type: &str) -> u32 {
    let count = subscriptions
        .iter()
        .filter(|s| s.service_type == service_type)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Node health as reported by the health oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Healthy,
    Unhealthy,
}

impl NodeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Pod identity: `<serviceType>-<nodeName>-<hostPort>`.
///
/// Node names may contain dashes, so parsing takes the service type up to the
/// first dash and the port after the last one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodName {
    pub service_type: String,
    pub node_name: String,
    pub host_port: u16,
}

impl PodName {
    pub fn new(service_type: impl Into<String>, node_name: impl Into<String>, host_port: u16) -> Self {
        Self {
            service_type: service_type.into(),
            node_name: node_name.into(),
            host_port,
        }
    }
}

impl fmt::Display for PodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.service_type, self.node_name, self.host_port)
    }
}

impl FromStr for PodName {
    type Err = PodNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service_type, rest) = s
            .split_once('-')
            .ok_or_else(|| PodNameError::Malformed(s.to_string()))?;
        let (node_name, port) = rest
            .rsplit_once('-')
            .ok_or_else(|| PodNameError::Malformed(s.to_string()))?;

        if service_type.is_empty() || node_name.is_empty() {
            return Err(PodNameError::Malformed(s.to_string()));
        }

        let host_port = port
            .parse()
            .map_err(|_| PodNameError::InvalidPort(port.to_string()))?;

        Ok(Self::new(service_type, node_name, host_port))
    }
}
