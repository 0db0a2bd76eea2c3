//! Allocation primitives for the service controller.
//!
//! This library holds the I/O-free part of admission and rebalancing:
//!
//! - **Model**: service specs, instances, subscriptions and pod identities.
//! - **Optimizer**: decides how many agents each instance serves and at what rate.
//! - **Placement**: scores nodes for a new instance and splits node capacity.
//! - **Eviction**: picks which subscriptions go when capacity shrinks.
//!
//! # Invariants
//!
//! - Every function is deterministic given the same inputs
//! - Instance lists keep their order; ties are broken by position
//! - Nothing here touches the network or the state store

mod error;
mod eviction;
mod model;
mod optimizer;
mod placement;

pub use error::{Ineligibility, PodNameError, UnknownStrategy};
pub use eviction::evict;
pub use model::{
    connections_of, spec_map, subscribers_of, FrequencyLimit, NodeStatus, PodName, ServiceInstance,
    ServiceSpec, Subscription,
};
pub use optimizer::{
    most_remaining, optimize, optimize_until_feasible, uniform, Allocation, OptimizerStrategy,
    Outcome,
};
pub use placement::{
    candidate_nodes, choose_node, evaluate_node, reflow_node, NodeCandidate, PlacementDecision,
    Rejection,
};
