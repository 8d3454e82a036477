// ── State store ──
//
// Owns the state file for one run. Every commit bumps the serial, rebuilds
// the shared snapshot handed to apply tasks, and persists atomically
// (temp file + rename) when backed by a path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{ResourceState, STATE_VERSION, StateFile, StoredOutput};
use crate::error::CoreError;
use crate::model::Address;

pub struct StateStore {
    path: Option<PathBuf>,
    file: StateFile,
    snapshot: Arc<BTreeMap<Address, ResourceState>>,
}

impl StateStore {
    /// Open the state file at `path`, or start empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>, stack: &str) -> Result<Self, CoreError> {
        let path = path.into();
        let file = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| state_err(&path, &e))?;
            let file: StateFile = serde_json::from_str(&raw).map_err(|e| state_err(&path, &e))?;
            if file.version != STATE_VERSION {
                return Err(state_err(
                    &path,
                    &format!("unsupported state version {}", file.version),
                ));
            }
            if file.stack != stack {
                return Err(state_err(
                    &path,
                    &format!("belongs to stack '{}', not '{stack}'", file.stack),
                ));
            }
            debug!(path = %path.display(), serial = file.serial, resources = file.resources.len(), "loaded state");
            file
        } else {
            debug!(path = %path.display(), "no state file, starting empty");
            StateFile::new(stack)
        };
        Ok(Self::from_file(Some(path), file))
    }

    /// A store that never touches disk.
    pub fn in_memory(stack: &str) -> Self {
        Self::from_file(None, StateFile::new(stack))
    }

    fn from_file(path: Option<PathBuf>, file: StateFile) -> Self {
        let snapshot = Arc::new(file.resources.clone());
        Self {
            path,
            file,
            snapshot,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn file(&self) -> &StateFile {
        &self.file
    }

    pub fn serial(&self) -> u64 {
        self.file.serial
    }

    pub fn get(&self, address: &Address) -> Option<&ResourceState> {
        self.file.resources.get(address)
    }

    pub fn resources(&self) -> &BTreeMap<Address, ResourceState> {
        &self.file.resources
    }

    pub fn outputs(&self) -> &BTreeMap<String, StoredOutput> {
        &self.file.outputs
    }

    pub fn is_empty(&self) -> bool {
        self.file.resources.is_empty()
    }

    /// Cheap shared view of the resource map as of the last commit.
    pub fn snapshot(&self) -> Arc<BTreeMap<Address, ResourceState>> {
        Arc::clone(&self.snapshot)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Record (`Some`) or forget (`None`) one resource and persist.
    pub fn commit(
        &mut self,
        address: &Address,
        state: Option<ResourceState>,
    ) -> Result<(), CoreError> {
        match state {
            Some(s) => {
                self.file.resources.insert(address.clone(), s);
            }
            None => {
                self.file.resources.remove(address);
            }
        }
        self.snapshot = Arc::new(self.file.resources.clone());
        self.persist()
    }

    pub fn set_outputs(&mut self, outputs: BTreeMap<String, StoredOutput>) -> Result<(), CoreError> {
        self.file.outputs = outputs;
        self.persist()
    }

    /// Write the state file atomically. No-op for in-memory stores.
    pub fn persist(&mut self) -> Result<(), CoreError> {
        self.file.serial += 1;
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = serde_json::to_string_pretty(&self.file).map_err(|e| state_err(path, &e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| state_err(path, &e))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| state_err(&tmp, &e))?;
        std::fs::rename(&tmp, path).map_err(|e| state_err(path, &e))?;
        debug!(path = %path.display(), serial = self.file.serial, "state persisted");
        Ok(())
    }
}

fn state_err(path: &Path, e: &dyn std::fmt::Display) -> CoreError {
    CoreError::State {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ResourceKind, Value};
    use chrono::Utc;

    fn cluster_state() -> ResourceState {
        ResourceState {
            kind: ResourceKind::AwsEcsCluster,
            id: "cluster-1".into(),
            inputs: BTreeMap::from([("name".to_owned(), Value::from("llm-cluster"))]),
            attributes: BTreeMap::from([("name".to_owned(), Value::from("llm-cluster"))]),
            dependencies: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn commit_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let addr = Address::resource(ResourceKind::AwsEcsCluster, "llm");

        let mut store = StateStore::open(&path, "llm-serving").unwrap();
        let lineage = store.file().lineage;
        store.commit(&addr, Some(cluster_state())).unwrap();
        assert_eq!(store.serial(), 1);
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = StateStore::open(&path, "llm-serving").unwrap();
        assert_eq!(reloaded.file().lineage, lineage);
        assert_eq!(reloaded.get(&addr).unwrap().id, "cluster-1");
        assert_eq!(reloaded.snapshot().len(), 1);
    }

    #[test]
    fn rejects_state_of_another_stack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path, "one").unwrap();
        store.persist().unwrap();

        assert!(matches!(
            StateStore::open(&path, "two"),
            Err(CoreError::State { .. })
        ));
    }

    #[test]
    fn removing_updates_snapshot() {
        let addr = Address::resource(ResourceKind::AwsEcsCluster, "llm");
        let mut store = StateStore::in_memory("s");
        store.commit(&addr, Some(cluster_state())).unwrap();
        let before = store.snapshot();
        store.commit(&addr, None).unwrap();
        assert_eq!(before.len(), 1);
        assert!(store.snapshot().is_empty());
    }
}
