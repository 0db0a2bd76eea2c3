//! Static node inventory.
//!
//! Maps each worker node to the address its health endpoint listens on and
//! the GPU memory available for instances. Nodes missing from the inventory
//! are never picked for placement.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What is known about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Host or IP the node's health endpoint is reachable on.
    #[serde(default)]
    pub address: Option<String>,

    /// GPU memory budget for instances on this node.
    #[serde(default)]
    pub gpu_memory: Option<u64>,
}

/// Node inventory keyed by node name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeInventory {
    nodes: BTreeMap<String, NodeInfo>,
}

impl NodeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the inventory from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read node inventory: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse node inventory: {}", path.display()))
    }

    pub fn insert(&mut self, node_name: impl Into<String>, info: NodeInfo) {
        self.nodes.insert(node_name.into(), info);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_node(mut self, node_name: impl Into<String>, address: &str, gpu_memory: u64) -> Self {
        self.insert(
            node_name,
            NodeInfo {
                address: Some(address.to_string()),
                gpu_memory: Some(gpu_memory),
            },
        );
        self
    }

    pub fn get(&self, node_name: &str) -> Option<&NodeInfo> {
        self.nodes.get(node_name)
    }

    pub fn gpu_memory(&self, node_name: &str) -> Option<u64> {
        self.get(node_name).and_then(|n| n.gpu_memory)
    }

    pub fn address(&self, node_name: &str) -> Option<&str> {
        self.get(node_name).and_then(|n| n.address.as_deref())
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
