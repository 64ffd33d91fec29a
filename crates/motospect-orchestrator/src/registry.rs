//! Durable service registry
//!
//! Holds every known service's config and last observed runtime state and
//! persists the whole table as one JSON document keyed by service name.
//! Saves go through a temporary file that is renamed over the target, so a
//! reader never sees a partially written snapshot.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{ServiceRecord, ServiceRuntimeInfo};

/// File-backed table of service records
pub struct ServiceRegistry {
    path: PathBuf,
    services: RwLock<BTreeMap<String, ServiceRecord>>,
    /// Held from snapshot to rename so the file always ends at the newest state
    save_lock: Mutex<()>,
}

impl ServiceRegistry {
    /// Create an empty registry backed by `path` (nothing is read yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            services: RwLock::new(BTreeMap::new()),
            save_lock: Mutex::new(()),
        }
    }

    /// Create a registry and load the snapshot at `path`
    pub fn open(path: impl Into<PathBuf>) -> OrchestratorResult<Self> {
        let registry = Self::new(path);
        registry.load()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory table with the snapshot on disk
    ///
    /// A missing file yields an empty registry. Recorded pids are not
    /// checked for liveness.
    pub fn load(&self) -> OrchestratorResult<()> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No registry snapshot, starting empty");
            self.services.write().clear();
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            OrchestratorError::Registry(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let loaded: BTreeMap<String, ServiceRecord> =
            serde_json::from_str(&content).map_err(|e| {
                OrchestratorError::Registry(format!(
                    "Failed to parse {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        info!(path = %self.path.display(), count = loaded.len(), "Loaded service registry");
        *self.services.write() = loaded;
        Ok(())
    }

    /// Write the whole table to disk atomically
    pub fn save(&self) -> OrchestratorResult<()> {
        let _guard = self.save_lock.lock();
        let content = {
            let services = self.services.read();
            serde_json::to_string_pretty(&*services)?
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| OrchestratorError::Registry(e.error.to_string()))?;

        debug!(path = %self.path.display(), "Saved service registry");
        Ok(())
    }

    /// Insert or replace a record (in memory only)
    pub fn put(&self, record: ServiceRecord) {
        self.services
            .write()
            .insert(record.config.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<ServiceRecord> {
        self.services.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    /// All records, sorted by name
    pub fn list_all(&self) -> Vec<ServiceRecord> {
        self.services.read().values().cloned().collect()
    }

    /// Mutate the runtime info of `name` and return the updated record
    pub fn update<F>(&self, name: &str, f: F) -> OrchestratorResult<ServiceRecord>
    where
        F: FnOnce(&mut ServiceRuntimeInfo),
    {
        let mut services = self.services.write();
        let record = services
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        f(&mut record.runtime);
        Ok(record.clone())
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ServiceConfig, ServiceStatus};
    use pretty_assertions::assert_eq;

    fn sample_records() -> Vec<ServiceRecord> {
        let mut vin = ServiceRecord::new(
            ServiceConfig::new("vin-decoder-service", "python3")
                .with_args(["main.py"])
                .with_working_dir("services/vin-decoder-service")
                .with_port(8001)
                .with_env("PYTHONPATH", "../../backend"),
        );
        vin.runtime.status = ServiceStatus::Running;
        vin.runtime.pid = Some(4242);
        vin.runtime.port = Some(8001);
        vin.runtime.health_url = Some("http://127.0.0.1:8001/health".to_string());
        vin.runtime.started_at = Some(chrono::Utc::now());

        let diag = ServiceRecord::new(
            ServiceConfig::new("diagnostic-service", "python3")
                .with_args(["main.py"])
                .with_dependency("vin-decoder-service")
                .with_dependency("fault-detector-service"),
        );

        vec![vin, diag]
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service_registry.json");

        let registry = ServiceRegistry::new(&path);
        for record in sample_records() {
            registry.put(record);
        }
        registry.save().unwrap();

        let reloaded = ServiceRegistry::open(&path).unwrap();
        assert_eq!(reloaded.list_all(), registry.list_all());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServiceRegistry::open(dir.path().join("absent.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service_registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ServiceRegistry::open(&path).err().unwrap();
        assert!(matches!(err, OrchestratorError::Registry(_)));
    }

    #[test]
    fn snapshot_is_keyed_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.json");

        let registry = ServiceRegistry::new(&path);
        for record in sample_records() {
            registry.put(record);
        }
        registry.save().unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["vin-decoder-service"]["status"], "running");
        assert_eq!(doc["vin-decoder-service"]["pid"], 4242);
        assert_eq!(
            doc["diagnostic-service"]["config"]["dependencies"][0],
            "vin-decoder-service"
        );
    }

    #[test]
    fn concurrent_saves_keep_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service_registry.json");
        let registry = std::sync::Arc::new(ServiceRegistry::new(&path));
        for n in 0..8 {
            registry.put(ServiceRecord::new(ServiceConfig::new(format!("svc-{n}"), "true")));
        }

        for round in 0..50u32 {
            let handles: Vec<_> = (0..8)
                .map(|n| {
                    let registry = registry.clone();
                    std::thread::spawn(move || {
                        registry
                            .update(&format!("svc-{n}"), |rt| {
                                rt.status = ServiceStatus::Running;
                                rt.pid = Some(round * 10 + n);
                            })
                            .unwrap();
                        registry.save().unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let reloaded = ServiceRegistry::open(&path).unwrap();
            assert_eq!(reloaded.list_all(), registry.list_all(), "round {round}");
        }
    }

    #[test]
    fn update_unknown_service_fails() {
        let registry = ServiceRegistry::new("unused.json");
        let err = registry
            .update("ghost", |rt| rt.status = ServiceStatus::Running)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
