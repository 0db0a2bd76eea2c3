//! Workload launcher interface and mock implementation.
//!
//! The launcher abstracts pod lifecycle on the worker nodes:
//! - Creating a pod for a service type on a node and host port
//! - Readiness and termination checks
//! - Deletion
//!
//! A mock implementation is provided for testing and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use arha_reconcile::PodName;
use async_trait::async_trait;
use tracing::{debug, info};

/// Addresses assigned to a created pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPlacement {
    pub pod_ip: String,
    pub host_ip: String,
    pub node_name: String,
}

/// Pod lifecycle interface.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Create the pod and return the addresses it was given.
    async fn create_pod(&self, pod: &PodName) -> Result<PodPlacement>;

    /// Whether the pod passes its readiness check.
    async fn is_ready(&self, pod: &PodName) -> Result<bool>;

    /// Delete the pod.
    async fn delete_pod(&self, pod: &PodName) -> Result<()>;

    /// Whether a pod with this name is still shutting down.
    async fn is_terminating(&self, pod: &PodName) -> Result<bool>;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock launcher for testing and development.
///
/// Pod IPs are handed out sequentially from `10.244.0.0/16`; the host IP is
/// the node's configured address, or the node name when none was given.
#[derive(Default)]
pub struct MockLauncher {
    pod_counter: AtomicU32,
    fail_creates: bool,
    ready_after: u32,
    host_addresses: HashMap<String, String>,
    polls: Mutex<HashMap<String, u32>>,
    terminating: Mutex<HashSet<String>>,
    created: Mutex<Vec<PodName>>,
    deleted: Mutex<Vec<PodName>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock launcher that fails all creates.
    pub fn failing() -> Self {
        Self {
            fail_creates: true,
            ..Self::default()
        }
    }

    /// Pods only report ready on the `polls`-th readiness check.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    pub fn with_host_address(mut self, node_name: &str, address: &str) -> Self {
        self.host_addresses
            .insert(node_name.to_string(), address.to_string());
        self
    }

    /// Report `pod` as terminating until it is created again.
    ///
    /// Deleted pods are marked automatically.
    pub fn mark_terminating(&self, pod: &PodName) {
        lock(&self.terminating).insert(pod.to_string());
    }

    /// Pods created so far, in order.
    pub fn created(&self) -> Vec<PodName> {
        lock(&self.created).clone()
    }

    /// Pods deleted so far, in order.
    pub fn deleted(&self) -> Vec<PodName> {
        lock(&self.deleted).clone()
    }

    fn next_pod_ip(&self) -> String {
        let n = self.pod_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("10.244.{}.{}", n / 256, n % 256)
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn create_pod(&self, pod: &PodName) -> Result<PodPlacement> {
        if self.fail_creates {
            anyhow::bail!("Mock launcher configured to fail");
        }

        let placement = PodPlacement {
            pod_ip: self.next_pod_ip(),
            host_ip: self
                .host_addresses
                .get(&pod.node_name)
                .cloned()
                .unwrap_or_else(|| pod.node_name.clone()),
            node_name: pod.node_name.clone(),
        };
        info!(pod = %pod, pod_ip = %placement.pod_ip, "[MOCK] Creating pod");

        lock(&self.terminating).remove(&pod.to_string());
        lock(&self.created).push(pod.clone());
        Ok(placement)
    }

    async fn is_ready(&self, pod: &PodName) -> Result<bool> {
        let mut polls = lock(&self.polls);
        let seen = polls.entry(pod.to_string()).or_insert(0);
        *seen += 1;
        debug!(pod = %pod, poll = *seen, "[MOCK] Checking pod readiness");
        Ok(*seen >= self.ready_after)
    }

    async fn delete_pod(&self, pod: &PodName) -> Result<()> {
        info!(pod = %pod, "[MOCK] Deleting pod");
        lock(&self.terminating).insert(pod.to_string());
        lock(&self.deleted).push(pod.clone());
        Ok(())
    }

    async fn is_terminating(&self, pod: &PodName) -> Result<bool> {
        Ok(lock(&self.terminating).contains(&pod.to_string()))
    }
}
