//! Agent allocation across the instances of one service type.
//!
//! The optimizer always recomputes an allocation from scratch: every instance
//! of the target type starts at zero connections. Instances of other types
//! pass through untouched, and the output keeps the input order.
//!
//! # Two-phase allocation
//!
//! 1. Nominal packing: bind agents one at a time to the instance with the most
//!    capacity left after serving its agents at the default rate, as long as
//!    that capacity still covers the default rate. If nothing can be bound
//!    here the outcome is `Fail`.
//! 2. Rate degradation: bind remaining agents to the instance that would give
//!    the highest post-admission rate, and let every agent on it share the
//!    workload evenly. Dropping below the minimum rate marks the outcome
//!    `Fail` but the assignment is still committed.
//!
//! Ties are always broken by list position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownStrategy;
use crate::model::{connections_of, ServiceInstance};

/// Result status of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// An allocation computed for one service type.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub outcome: Outcome,
    pub instances: Vec<ServiceInstance>,
}

impl Allocation {
    /// Agents bound to instances of `service_type`.
    pub fn admitted(&self, service_type: &str) -> u32 {
        connections_of(&self.instances, service_type)
    }
}

/// Allocation strategy, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStrategy {
    /// Nominal packing followed by rate degradation.
    #[default]
    TwoPhase,
    /// Round-robin across instances at the nominal rate.
    Uniform,
    /// Nominal rate on the instance with the most remaining capacity.
    MostRemaining,
}

impl OptimizerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoPhase => "two_phase",
            Self::Uniform => "uniform",
            Self::MostRemaining => "most_remaining",
        }
    }

    /// Allocate `demand` agents of `service_type` over `instances`.
    pub fn optimize(&self, service_type: &str, demand: u32, instances: &[ServiceInstance]) -> Allocation {
        match self {
            Self::TwoPhase => optimize(service_type, demand, instances),
            Self::Uniform => uniform(service_type, demand, instances),
            Self::MostRemaining => most_remaining(service_type, demand, instances),
        }
    }
}

impl fmt::Display for OptimizerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two_phase" | "optimize" => Ok(Self::TwoPhase),
            "uniform" => Ok(Self::Uniform),
            "most_remaining" => Ok(Self::MostRemaining),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Copy `instances`, resetting the target type, and return the target indices.
fn reset_target(service_type: &str, instances: &[ServiceInstance]) -> (Vec<ServiceInstance>, Vec<usize>) {
    let mut updated = instances.to_vec();
    let mut targets = Vec::new();
    for (idx, inst) in updated.iter_mut().enumerate() {
        if inst.is_type(service_type) {
            inst.reset();
            targets.push(idx);
        }
    }
    (updated, targets)
}

/// Index of the eligible target with the highest score; first position wins ties.
fn pick_max<S, E>(instances: &[ServiceInstance], targets: &[usize], score: S, eligible: E) -> Option<usize>
where
    S: Fn(&ServiceInstance) -> f64,
    E: Fn(&ServiceInstance) -> bool,
{
    let mut best: Option<(usize, f64)> = None;
    for &idx in targets {
        let inst = &instances[idx];
        if !eligible(inst) {
            continue;
        }
        let value = score(inst);
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Two-phase allocation.
pub fn optimize(service_type: &str, demand: u32, instances: &[ServiceInstance]) -> Allocation {
    let (mut updated, targets) = reset_target(service_type, instances);
    let mut allocated = 0;

    while allocated < demand {
        let Some(idx) = pick_max(&updated, &targets, ServiceInstance::remaining, |inst| {
            inst.remaining() >= inst.frequency_limit.default
        }) else {
            break;
        };
        let inst = &mut updated[idx];
        inst.current_connection += 1;
        inst.current_frequency = inst.frequency_limit.default;
        allocated += 1;
    }

    if allocated == 0 {
        return Allocation {
            outcome: Outcome::Fail,
            instances: updated,
        };
    }

    let mut outcome = Outcome::Success;
    while allocated < demand {
        let Some(idx) = pick_max(&updated, &targets, ServiceInstance::predicted_frequency, |_| true)
        else {
            break;
        };
        let inst = &mut updated[idx];
        inst.current_connection += 1;
        inst.current_frequency = inst.workload_limit / f64::from(inst.current_connection);
        if inst.current_frequency < inst.frequency_limit.minimum {
            outcome = Outcome::Fail;
        }
        allocated += 1;
    }

    Allocation {
        outcome,
        instances: updated,
    }
}

/// Deal agents round-robin in list order at the nominal rate.
pub fn uniform(service_type: &str, demand: u32, instances: &[ServiceInstance]) -> Allocation {
    let (mut updated, targets) = reset_target(service_type, instances);
    if targets.is_empty() {
        return Allocation {
            outcome: Outcome::Fail,
            instances: updated,
        };
    }

    for slot in 0..demand as usize {
        let idx = targets[slot % targets.len()];
        updated[idx].current_connection += 1;
    }

    Allocation {
        outcome: Outcome::Success,
        instances: updated,
    }
}

/// Bind each agent at the nominal rate to the instance with the most remaining capacity.
pub fn most_remaining(service_type: &str, demand: u32, instances: &[ServiceInstance]) -> Allocation {
    let (mut updated, targets) = reset_target(service_type, instances);
    if targets.is_empty() {
        return Allocation {
            outcome: Outcome::Fail,
            instances: updated,
        };
    }

    for _ in 0..demand {
        let Some(idx) = pick_max(&updated, &targets, ServiceInstance::remaining, |_| true) else {
            break;
        };
        updated[idx].current_connection += 1;
        updated[idx].current_frequency = updated[idx].frequency_limit.default;
    }

    Allocation {
        outcome: Outcome::Success,
        instances: updated,
    }
}

/// Largest demand up to `demand` the strategy can serve successfully.
///
/// Retries with one agent fewer until the allocation succeeds. Returns the
/// demand that was finally attempted together with its allocation; when even
/// a single agent cannot be served the result is the zero-demand allocation.
pub fn optimize_until_feasible(
    strategy: OptimizerStrategy,
    service_type: &str,
    demand: u32,
    instances: &[ServiceInstance],
) -> (u32, Allocation) {
    let mut attempt = demand;
    loop {
        let allocation = strategy.optimize(service_type, attempt, instances);
        if allocation.outcome.is_success() || attempt == 0 {
            return (attempt, allocation);
        }
        attempt -= 1;
    }
}
