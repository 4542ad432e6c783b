use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::snapshot::{SessionSnapshot, SnapshotEntry};
use crate::error::StorageError;

const SNAPSHOT_FILE: &str = "session.json";
const PENDING_FILE: &str = "pending_load.json";

/// Durable evidence of a plugin load that had not settled yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLoad {
    pub path: String,
    pub started_at: DateTime<Utc>,
}

/// The two durable slots owned by the controller: the current chain snapshot
/// and the pending-load marker.
pub struct SessionStore {
    snapshot_path: PathBuf,
    pending_path: PathBuf,
    // Loads in flight; the marker file names the newest one.
    in_flight: Mutex<Vec<PendingLoad>>,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            snapshot_path: data_dir.join(SNAPSHOT_FILE),
            pending_path: data_dir.join(PENDING_FILE),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Read the persisted chain. A missing file is an empty chain.
    pub fn load_snapshot(&self) -> Result<SessionSnapshot, StorageError> {
        Ok(read_json::<SessionSnapshot>(&self.snapshot_path)?.unwrap_or_default())
    }

    /// Overwrite the persisted chain.
    pub fn save_snapshot(&self, entries: &[SnapshotEntry]) -> Result<(), StorageError> {
        write_json_atomic(&self.snapshot_path, &entries)
    }

    /// Record that a load of `path` is about to be issued.
    pub fn mark_pending(&self, path: &str) -> Result<(), StorageError> {
        let pending = PendingLoad {
            path: path.to_string(),
            started_at: Utc::now(),
        };
        let mut in_flight = self.in_flight.lock();
        write_json_atomic(&self.pending_path, &pending)?;
        in_flight.push(pending);
        Ok(())
    }

    /// The load of `path` settled. The marker is removed once no other load
    /// is in flight; otherwise it is rewritten to name one still pending,
    /// keeping that load's own start time.
    pub fn clear_pending(&self, path: &str) -> Result<(), StorageError> {
        let mut in_flight = self.in_flight.lock();
        if let Some(pos) = in_flight.iter().rposition(|p| p.path == path) {
            in_flight.remove(pos);
        }
        match in_flight.last() {
            Some(remaining) => write_json_atomic(&self.pending_path, remaining),
            None => remove_if_exists(&self.pending_path),
        }
    }

    pub fn pending(&self) -> Result<Option<PendingLoad>, StorageError> {
        read_json(&self.pending_path)
    }

    /// Read and delete the marker left by a previous run.
    pub fn take_pending(&self) -> Result<Option<PendingLoad>, StorageError> {
        let _guard = self.in_flight.lock();
        let pending = read_json(&self.pending_path)?;
        if pending.is_some() {
            remove_if_exists(&self.pending_path)?;
        }
        Ok(pending)
    }
}

/// Read a JSON file; `Ok(None)` when it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| StorageError::read_file(path, e))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::parse(path, e))
}

/// Pretty-print `value` into a sibling temp file, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::create_dir(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StorageError::write_file(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::write_file(path, e))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::write_file(path, e)),
    }
}
