//! State store.
//!
//! Three collections are kept: service instances, subscriptions and service
//! specs. Reads return a whole collection in stored order and writes replace a
//! whole collection; there are no partial updates. Callers that read and then
//! write more than one collection must hold the controller lock.

mod file;
mod memory;

use std::path::PathBuf;

use arha_reconcile::{ServiceInstance, ServiceSpec, Subscription};
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a collection file failed.
    #[error("state store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A collection could not be encoded or decoded.
    #[error("state store collection {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Full-replace access to the persisted collections.
pub trait StateStore: Send + Sync {
    fn load_instances(&self) -> Result<Vec<ServiceInstance>, StoreError>;

    fn save_instances(&self, instances: &[ServiceInstance]) -> Result<(), StoreError>;

    fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<(), StoreError>;

    fn load_specs(&self) -> Result<Vec<ServiceSpec>, StoreError>;

    fn save_specs(&self, specs: &[ServiceSpec]) -> Result<(), StoreError>;
}
