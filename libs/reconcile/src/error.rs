//! Error types for allocation primitives.

use thiserror::Error;

/// Errors from parsing a pod identity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PodNameError {
    /// The name is not of the form `<serviceType>-<nodeName>-<hostPort>`.
    #[error("malformed pod name: {0}")]
    Malformed(String),

    /// The trailing host port is not a valid port number.
    #[error("invalid host port in pod name: {0}")]
    InvalidPort(String),
}

/// An optimizer strategy name that is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown optimizer strategy: {0} (expected two_phase, uniform or most_remaining)")]
pub struct UnknownStrategy(pub String);

/// Why a node cannot host a new instance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Ineligibility {
    #[error("node is unhealthy")]
    Unhealthy,

    #[error("node already hosts an instance of {0}")]
    AlreadyHosts(String),

    #[error("node has no known GPU memory budget")]
    UnknownGpuBudget,

    #[error("GPU memory request {requested} exceeds node budget {budget}")]
    GpuBudgetExceeded { requested: u64, budget: u64 },

    #[error("{0} has no work ability on this node")]
    NoWorkAbility(String),

    #[error("{service_type} would drop to workload {workload_limit} below its default frequency {default}")]
    WorkloadBelowDefault {
        service_type: String,
        workload_limit: f64,
        default: f64,
    },
}
