//! Controller error types.

use thiserror::Error;

use crate::store::StoreError;

/// Error classes callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; nothing was changed.
    Validation,
    /// No capacity could be found for the request.
    CapacityExhausted,
    /// Allocation bookkeeping disagreed with itself.
    ConsistencyFault,
    /// A launcher or health oracle call failed.
    CollaboratorFailure,
    /// The state store could not be read or written.
    Store,
}

/// Subscription controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The service type has no spec.
    #[error("unknown service type: {0}")]
    UnknownServiceType(String),

    /// Malformed request input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No instance or node can take more agents.
    #[error("insufficient resources: {0}")]
    CapacityExhausted(String),

    /// Admitted counts did not match what the allocation promised.
    #[error("consistency fault: {0}")]
    ConsistencyFault(String),

    /// An external collaborator failed.
    #[error("{collaborator} failed: {source:#}")]
    Collaborator {
        collaborator: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// State store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownServiceType(_) | Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::CapacityExhausted(_) => ErrorKind::CapacityExhausted,
            Self::ConsistencyFault(_) => ErrorKind::ConsistencyFault,
            Self::Collaborator { .. } => ErrorKind::CollaboratorFailure,
            Self::Store(_) => ErrorKind::Store,
        }
    }

    /// Wrap a collaborator failure.
    pub fn collaborator(collaborator: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Collaborator {
            collaborator,
            source,
        }
    }
}

pub type Result<T, E = ControllerError> = std::result::Result<T, E>;
