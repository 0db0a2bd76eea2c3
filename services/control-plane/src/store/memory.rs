//! In-process store.

use std::sync::{Mutex, PoisonError};

use arha_reconcile::{ServiceInstance, ServiceSpec, Subscription};

use super::{StateStore, StoreError};

#[derive(Debug, Default)]
struct Collections {
    instances: Vec<ServiceInstance>,
    subscriptions: Vec<Subscription>,
    specs: Vec<ServiceSpec>,
}

/// Store holding the collections in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with service specs.
    pub fn with_specs(specs: Vec<ServiceSpec>) -> Self {
        Self {
            inner: Mutex::new(Collections {
                specs,
                ..Collections::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl StateStore for MemoryStore {
    fn load_instances(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        Ok(self.with(|c| c.instances.clone()))
    }

    fn save_instances(&self, instances: &[ServiceInstance]) -> Result<(), StoreError> {
        self.with(|c| c.instances = instances.to_vec());
        Ok(())
    }

    fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.with(|c| c.subscriptions.clone()))
    }

    fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<(), StoreError> {
        self.with(|c| c.subscriptions = subscriptions.to_vec());
        Ok(())
    }

    fn load_specs(&self) -> Result<Vec<ServiceSpec>, StoreError> {
        Ok(self.with(|c| c.specs.clone()))
    }

    fn save_specs(&self, specs: &[ServiceSpec]) -> Result<(), StoreError> {
        self.with(|c| c.specs = specs.to_vec());
        Ok(())
    }
}
