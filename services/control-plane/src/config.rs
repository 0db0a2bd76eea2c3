use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use arha_reconcile::OptimizerStrategy;

use crate::scheduler::{PlannerSettings, PortPool, ReadinessPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub state_dir: PathBuf,
    pub node_inventory: Option<PathBuf>,
    pub planner: PlannerSettings,
    pub health_port: u16,
    pub health_timeout: Duration,
    pub health_interval: Duration,
    pub agent_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let listen_addr = var("ARHA_LISTEN_ADDR", "127.0.0.1:8080")
            .parse()
            .context("ARHA_LISTEN_ADDR must be a socket address")?;

        let log_level = var("ARHA_LOG_LEVEL", "info");

        let state_dir = PathBuf::from(var("ARHA_STATE_DIR", "./state"));

        let node_inventory = lookup("ARHA_NODE_INVENTORY")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let strategy: OptimizerStrategy = var("ARHA_OPTIMIZER", "two_phase")
            .parse()
            .context("ARHA_OPTIMIZER")?;

        let ports: PortPool = var("ARHA_PORT_RANGE", "30500-30999")
            .parse()
            .context("ARHA_PORT_RANGE")?;

        let attempts: u32 = var("ARHA_READINESS_ATTEMPTS", "12")
            .parse()
            .context("ARHA_READINESS_ATTEMPTS must be a non-negative integer")?;
        let readiness_delay_ms: u64 = var("ARHA_READINESS_DELAY_MS", "5000")
            .parse()
            .context("ARHA_READINESS_DELAY_MS must be a non-negative integer")?;

        let health_port = var("ARHA_HEALTH_PORT", "10248")
            .parse()
            .context("ARHA_HEALTH_PORT must be a port number")?;
        let health_timeout_ms: u64 = var("ARHA_HEALTH_TIMEOUT_MS", "1000")
            .parse()
            .context("ARHA_HEALTH_TIMEOUT_MS must be a non-negative integer")?;
        let health_interval_secs: u64 = var("ARHA_HEALTH_INTERVAL_SECS", "30")
            .parse()
            .context("ARHA_HEALTH_INTERVAL_SECS must be a non-negative integer")?;
        if health_interval_secs == 0 {
            anyhow::bail!("ARHA_HEALTH_INTERVAL_SECS must be greater than zero");
        }

        let agent_timeout_ms: u64 = var("ARHA_AGENT_TIMEOUT_MS", "2000")
            .parse()
            .context("ARHA_AGENT_TIMEOUT_MS must be a non-negative integer")?;

        Ok(Self {
            listen_addr,
            log_level,
            state_dir,
            node_inventory,
            planner: PlannerSettings {
                strategy,
                ports,
                readiness: ReadinessPolicy {
                    attempts,
                    delay: Duration::from_millis(readiness_delay_ms),
                },
            },
            health_port,
            health_timeout: Duration::from_millis(health_timeout_ms),
            health_interval: Duration::from_secs(health_interval_secs),
            agent_timeout: Duration::from_millis(agent_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.state_dir, PathBuf::from("./state"));
        assert!(config.node_inventory.is_none());
        assert_eq!(config.planner, PlannerSettings::default());
        assert_eq!(config.health_port, 10248);
        assert_eq!(config.health_timeout, Duration::from_secs(1));
        assert_eq!(config.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ARHA_OPTIMIZER", "uniform"),
            ("ARHA_PORT_RANGE", "31000-31010"),
            ("ARHA_READINESS_ATTEMPTS", "3"),
            ("ARHA_NODE_INVENTORY", "/etc/arha/nodes.json"),
        ])
        .unwrap();

        assert_eq!(config.planner.strategy, OptimizerStrategy::Uniform);
        assert_eq!(config.planner.ports, PortPool::new(31000, 31010));
        assert_eq!(config.planner.readiness.attempts, 3);
        assert_eq!(config.node_inventory, Some(PathBuf::from("/etc/arha/nodes.json")));
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config(&[("ARHA_OPTIMIZER", "random")]).unwrap_err();
        assert!(format!("{err:#}").contains("ARHA_OPTIMIZER"));

        let err = config(&[("ARHA_HEALTH_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("ARHA_HEALTH_INTERVAL_SECS"));
    }
}
