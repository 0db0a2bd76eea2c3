//! Node health oracle.
//!
//! Health is probed over HTTP against each node's `/healthz` endpoint. The
//! latest snapshot is kept in a [`NodeStatusCache`] so read-only views do not
//! have to probe.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use arha_reconcile::NodeStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::inventory::NodeInventory;

/// Per-node health lookup.
#[async_trait]
pub trait NodeHealth: Send + Sync {
    /// Status of every node in `nodes`.
    async fn health_of(&self, nodes: &[String]) -> Result<BTreeMap<String, NodeStatus>>;
}

/// Probes `http://<address>:<port>/healthz` on every node.
///
/// A node is healthy when the probe answers with the body `ok`. Errors,
/// timeouts and nodes without a known address count as unhealthy.
pub struct HttpNodeHealth {
    client: reqwest::Client,
    addresses: HashMap<String, String>,
    port: u16,
}

impl HttpNodeHealth {
    pub fn new(addresses: HashMap<String, String>, port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build node health HTTP client")?;
        Ok(Self {
            client,
            addresses,
            port,
        })
    }

    pub fn from_inventory(inventory: &NodeInventory, port: u16, timeout: Duration) -> Result<Self> {
        let addresses = inventory
            .node_names()
            .filter_map(|name| {
                inventory
                    .address(name)
                    .map(|addr| (name.to_string(), addr.to_string()))
            })
            .collect();
        Self::new(addresses, port, timeout)
    }

    async fn probe(&self, node: &str) -> NodeStatus {
        let Some(address) = self.addresses.get(node) else {
            debug!(node = %node, "No address for node, reporting unhealthy");
            return NodeStatus::Unhealthy;
        };

        let url = format!("http://{}:{}/healthz", address, self.port);
        let body = match self.client.get(&url).send().await {
            Ok(response) => response.text().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) if body.trim() == "ok" => NodeStatus::Healthy,
            Ok(body) => {
                debug!(node = %node, body = %body, "Node health probe not ok");
                NodeStatus::Unhealthy
            }
            Err(e) => {
                debug!(node = %node, error = %e, "Node health probe failed");
                NodeStatus::Unhealthy
            }
        }
    }
}

#[async_trait]
impl NodeHealth for HttpNodeHealth {
    async fn health_of(&self, nodes: &[String]) -> Result<BTreeMap<String, NodeStatus>> {
        let statuses = join_all(nodes.iter().map(|node| self.probe(node))).await;
        Ok(nodes.iter().cloned().zip(statuses).collect())
    }
}

/// Fixed health answers for tests and development.
///
/// Unknown nodes report the configured fallback.
pub struct StaticNodeHealth {
    statuses: Mutex<HashMap<String, NodeStatus>>,
    fallback: NodeStatus,
}

impl StaticNodeHealth {
    /// Every node healthy unless marked otherwise.
    pub fn healthy() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            fallback: NodeStatus::Healthy,
        }
    }

    pub fn set(&self, node: &str, status: NodeStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.to_string(), status);
    }
}

#[async_trait]
impl NodeHealth for StaticNodeHealth {
    async fn health_of(&self, nodes: &[String]) -> Result<BTreeMap<String, NodeStatus>> {
        let statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(nodes
            .iter()
            .map(|node| {
                let status = statuses.get(node).copied().unwrap_or(self.fallback);
                (node.clone(), status)
            })
            .collect())
    }
}

/// Last known node health.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusSnapshot {
    pub nodes: BTreeMap<String, NodeStatus>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct NodeStatusCache {
    inner: RwLock<Option<(BTreeMap<String, NodeStatus>, DateTime<Utc>)>>,
}

impl NodeStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, nodes: BTreeMap<String, NodeStatus>) {
        *self.inner.write().await = Some((nodes, Utc::now()));
    }

    pub async fn snapshot(&self) -> NodeStatusSnapshot {
        match &*self.inner.read().await {
            Some((nodes, at)) => NodeStatusSnapshot {
                nodes: nodes.clone(),
                refreshed_at: Some(*at),
            },
            None => NodeStatusSnapshot {
                nodes: BTreeMap::new(),
                refreshed_at: None,
            },
        }
    }
}
