//! Durable state store: one JSON record per container under the runtime's root directory.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATE_DIR_MODE: u32 = 0o755;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to create state directory {path:?}: {source}")]
    InitDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("container {0} not found")]
    NotFound(String),
    #[error("failed to read state for {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("state file for {id} is corrupt: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write state for {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to delete state for {id}: {source}")]
    Delete {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// The runtime status of a container, as reported by the `state` command.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    Created,
    Running,
    Stopped,
}

impl ContainerStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, ContainerStatus::Created)
    }

    pub fn can_kill(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// One state record per container, mirroring the OCI runtime-state schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub oci_version: String,
    pub id: String,
    pub status: ContainerStatus,
    /// 0 until the child has been spawned.
    pub pid: i32,
    pub bundle: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl ContainerState {
    pub fn new(id: &str, bundle: &Path) -> Self {
        Self {
            oci_version: "1.0.2".to_string(),
            id: id.to_string(),
            status: ContainerStatus::Creating,
            pid: 0,
            bundle: bundle.to_string_lossy().into_owned(),
            annotations: HashMap::new(),
        }
    }
}

/// Persists `ContainerState` records under `<root>/<id>.json`.
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensures the state directory exists with mode 0755. Idempotent.
    pub fn init_dir(&self) -> Result<(), StateError> {
        if !self.root.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(STATE_DIR_MODE)
                .create(&self.root)
                .map_err(|source| StateError::InitDir {
                    path: self.root.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Writes to `<id>.json.tmp` then renames over `<id>.json`. The temporary
    /// file is unlinked if the rename fails, so a previous state file (if any)
    /// is never left half-written.
    pub fn save(&self, state: &ContainerState) -> Result<(), StateError> {
        log::debug!("saving state for container {}", state.id);
        let final_path = self.path_for(&state.id);
        let tmp_path = self.root.join(format!("{}.json.tmp", state.id));

        let write_result = (|| -> Result<(), std::io::Error> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o644)
                .open(&tmp_path)?;
            serde_json::to_writer_pretty(&file, state)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        })();

        if let Err(source) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(StateError::Write {
                id: state.id.clone(),
                source,
            });
        }

        if let Err(source) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StateError::Write {
                id: state.id.clone(),
                source,
            });
        }

        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<ContainerState, StateError> {
        let path = self.path_for(id);
        let file = File::open(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(id.to_string())
            } else {
                StateError::Read {
                    id: id.to_string(),
                    source,
                }
            }
        })?;
        serde_json::from_reader(file).map_err(|source| StateError::Corrupt {
            id: id.to_string(),
            source,
        })
    }

    pub fn delete(&self, id: &str) -> Result<(), StateError> {
        let path = self.path_for(id);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(id.to_string())
            } else {
                StateError::Delete {
                    id: id.to_string(),
                    source,
                }
            }
        })
    }

    /// Enumerates all known containers. A file that fails to decode is
    /// skipped with a logged warning rather than aborting the whole listing.
    pub fn list(&self) -> Result<Vec<ContainerState>, StateError> {
        let entries = fs::read_dir(&self.root).map_err(|source| StateError::InitDir {
            path: self.root.clone(),
            source,
        })?;

        let mut states = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(id) => id.to_string(),
                None => continue,
            };
            match self.load(&id) {
                Ok(state) => states.push(state),
                Err(e) => log::warn!("skipping corrupt state file {:?}: {}", path, e),
            }
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state(id: &str) -> ContainerState {
        let mut state = ContainerState::new(id, Path::new("/bundles/foo"));
        state.status = ContainerStatus::Created;
        state.pid = 4242;
        state
            .annotations
            .insert("containeruntime/pty-master-fd".to_string(), "4".to_string());
        state
    }

    #[test]
    fn round_trip_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.init_dir().unwrap();

        let state = sample_state("c1");
        store.save(&state).unwrap();
        let loaded = store.load("c1").unwrap();
        assert_eq!(state, loaded);

        let raw = fs::read_to_string(dir.path().join("c1.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in ["ociVersion", "id", "status", "pid", "bundle", "annotations"] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
    }

    #[test]
    fn save_failure_leaves_previous_state_intact() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.init_dir().unwrap();

        let original = sample_state("c1");
        store.save(&original).unwrap();

        // Simulate an interruption after the tmp file is written but before
        // the rename: the tmp file exists, final file is untouched.
        let tmp_path = dir.path().join("c1.json.tmp");
        fs::write(&tmp_path, b"not json").unwrap();

        let reloaded = store.load("c1").unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn init_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested/state");
        let store = StateStore::new(root.clone());
        store.init_dir().unwrap();
        store.init_dir().unwrap();

        let mode = fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, STATE_DIR_MODE);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.init_dir().unwrap();
        match store.load("nonexistent") {
            Err(StateError::NotFound(id)) => assert_eq!(id, "nonexistent"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn delete_missing_is_an_error() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.init_dir().unwrap();
        assert!(store.delete("nonexistent").is_err());
    }

    #[test]
    fn list_skips_corrupt_entries() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.init_dir().unwrap();

        store.save(&sample_state("good")).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();

        let states = store.list().unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].id, "good");
    }
}
