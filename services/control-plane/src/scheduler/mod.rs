//! Scheduler module for admission, autoscaling and rebalancing.
//!
//! The scheduler is responsible for:
//! - Finding an allocation for a service type's demand, deploying a new
//!   instance when existing capacity would degrade agents
//! - Placing new instances and splitting node capacity among co-resident types
//! - Migrating subscriptions to match a freshly computed allocation
//! - Keeping the node health cache warm in the background

mod planner;
mod rebalancer;
mod worker;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use arha_reconcile::OptimizerStrategy;
use thiserror::Error;

pub use planner::Planner;
pub use rebalancer::Rebalancer;
pub use worker::NodeHealthWorker;

/// Inclusive range of host ports handed out to new instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPool {
    pub first: u16,
    pub last: u16,
}

impl PortPool {
    pub fn new(first: u16, last: u16) -> Self {
        Self { first, last }
    }

    /// Ports not in `used`, ascending.
    pub fn free<'a>(&self, used: &'a HashSet<u16>) -> impl Iterator<Item = u16> + 'a {
        (self.first..=self.last).filter(move |port| !used.contains(port))
    }
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new(30500, 30999)
    }
}

impl fmt::Display for PortPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid port range {0:?}: expected <first>-<last> with first <= last")]
pub struct InvalidPortRange(String);

impl FromStr for PortPool {
    type Err = InvalidPortRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPortRange(s.to_string());
        let (first, last) = s.trim().split_once('-').ok_or_else(invalid)?;
        let first: u16 = first.trim().parse().map_err(|_| invalid())?;
        let last: u16 = last.trim().parse().map_err(|_| invalid())?;
        if first > last {
            return Err(invalid());
        }
        Ok(Self::new(first, last))
    }
}

/// How long to wait for a new pod to report ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            attempts: 12,
            delay: Duration::from_secs(5),
        }
    }
}

/// Planner tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlannerSettings {
    pub strategy: OptimizerStrategy,
    pub ports: PortPool,
    pub readiness: ReadinessPolicy,
}
