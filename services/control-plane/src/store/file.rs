//! JSON file backed store.
//!
//! One pretty-printed JSON array per collection under the state directory.
//! Writes go through a temp file and a rename so readers never see a torn
//! collection.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use arha_reconcile::{ServiceInstance, ServiceSpec, Subscription};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{StateStore, StoreError};

const INSTANCES_FILE: &str = "service.json";
const SUBSCRIPTIONS_FILE: &str = "subscription.json";
const SPECS_FILE: &str = "serviceSpec.json";

/// Store keeping each collection in its own file.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Collection file missing, treating as empty");
                return Ok(Vec::new());
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Json { path, source })
    }

    fn write<T: Serialize>(&self, name: &str, items: &[T]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(name);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(items).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        fs::write(&tmp_path, content).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), count = items.len(), "Saved collection");
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load_instances(&self) -> Result<Vec<ServiceInstance>, StoreError> {
        self.read(INSTANCES_FILE)
    }

    fn save_instances(&self, instances: &[ServiceInstance]) -> Result<(), StoreError> {
        self.write(INSTANCES_FILE, instances)
    }

    fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        self.read(SUBSCRIPTIONS_FILE)
    }

    fn save_subscriptions(&self, subscriptions: &[Subscription]) -> Result<(), StoreError> {
        self.write(SUBSCRIPTIONS_FILE, subscriptions)
    }

    fn load_specs(&self) -> Result<Vec<ServiceSpec>, StoreError> {
        self.read(SPECS_FILE)
    }

    fn save_specs(&self, specs: &[ServiceSpec]) -> Result<(), StoreError> {
        self.write(SPECS_FILE, specs)
    }
}

#[cfg(test)]
mod tests {
    use arha_reconcile::FrequencyLimit;
    use tempfile::TempDir;

    use super::*;

    fn subscription(agent: &str) -> Subscription {
        Subscription {
            agent_ip: agent.to_string(),
            agent_port: 8888,
            service_type: "pose".to_string(),
            pod_ip: "10.0.0.1".to_string(),
            node_name: "worker-1".to_string(),
        }
    }

    #[test]
    fn test_missing_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("not-yet-created"));

        assert!(store.load_instances().unwrap().is_empty());
        assert!(store.load_subscriptions().unwrap().is_empty());
        assert!(store.load_specs().unwrap().is_empty());
    }

    #[test]
    fn test_empty_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SUBSCRIPTIONS_FILE), "\n").unwrap();

        let store = FileStore::new(dir.path());
        assert!(store.load_subscriptions().unwrap().is_empty());
    }

    #[test]
    fn test_save_replaces_whole_collection() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store
            .save_subscriptions(&[subscription("a1"), subscription("a2")])
            .unwrap();
        store.save_subscriptions(&[subscription("a3")]).unwrap();

        let loaded = store.load_subscriptions().unwrap();
        assert_eq!(loaded, vec![subscription("a3")]);
        assert!(!dir.path().join("subscription.json.tmp").exists());
    }

    #[test]
    fn test_reads_hand_written_spec_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SPECS_FILE),
            r#"[{"serviceType": "pose", "frequencyLimit": [20, 10],
                 "workAbility": {"workergpu": 85}, "gpuMemoryRequest": 2}]"#,
        )
        .unwrap();

        let specs = FileStore::new(dir.path()).load_specs().unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].frequency_limit, FrequencyLimit::new(20.0, 10.0));
    }

    #[test]
    fn test_saved_specs_keep_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let spec = ServiceSpec {
            service_type: "pose".to_string(),
            frequency_limit: FrequencyLimit::new(20.0, 10.0),
            work_ability: [("workergpu".to_string(), 85.0)].into(),
            gpu_memory_request: 2,
        };

        store.save_specs(std::slice::from_ref(&spec)).unwrap();

        let raw = fs::read_to_string(dir.path().join(SPECS_FILE)).unwrap();
        assert!(raw.contains("\"frequencyLimit\""));
        assert!(raw.contains("\"gpuMemoryRequest\""));
        assert_eq!(store.load_specs().unwrap(), vec![spec]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INSTANCES_FILE), "{not json").unwrap();

        let err = FileStore::new(dir.path()).load_instances().unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
