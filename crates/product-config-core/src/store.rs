//! Snapshot persistence for configuration tiers and fetch settings.
//!
//! Every persisted artefact is a whole JSON object written under a
//! namespace derived from the account identifier and the device identity,
//! so configuration belonging to different identities never collides.
//! Writes always replace the full snapshot; there are no partial or
//! append-style updates.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// File name holding the activated configuration tier.
pub const FILE_ACTIVATED: &str = "activated.json";
/// File name holding the pending fetched configuration tier.
pub const FILE_FETCHED: &str = "fetched.json";

/// Errors emitted by [`SnapshotStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Whole-snapshot persistence used by the configuration controller.
///
/// Implementations must treat a delete of a missing snapshot as success, and
/// callers must treat malformed stored JSON as an empty map rather than a
/// fatal error.
pub trait SnapshotStore: Send + Sync {
    /// Replaces the snapshot stored under `namespace`/`name` with `snapshot`.
    fn write(&self, namespace: &str, name: &str, snapshot: &Map<String, Value>)
        -> Result<(), StoreError>;

    /// Returns the raw snapshot contents, or `None` when nothing is stored.
    fn read(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError>;

    /// Removes a single snapshot. Missing snapshots are not an error.
    fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Removes every snapshot stored under `namespace`.
    fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError>;
}

/// Builds the persistence namespace for one account/identity pair.
pub fn namespace_for(account_id: &str, identity: &str) -> String {
    format!("product_config_{account_id}_{identity}")
}

/// Decodes a stored snapshot into a string/string map.
///
/// Read failures and malformed JSON both degrade to an empty map so a
/// damaged cache never prevents the controller from starting. Entries with
/// empty keys or empty values are skipped, matching the write-side filters.
pub(crate) fn read_snapshot_map(
    store: &dyn SnapshotStore,
    namespace: &str,
    name: &str,
) -> HashMap<String, String> {
    let raw = match store.read(namespace, name) {
        Ok(Some(raw)) => raw,
        Ok(None) => return HashMap::new(),
        Err(err) => {
            debug!("failed to read snapshot {namespace}/{name}: {err}");
            return HashMap::new();
        }
    };
    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            debug!("malformed snapshot {namespace}/{name}: {err}");
            return HashMap::new();
        }
    };
    let Value::Object(object) = parsed else {
        debug!("snapshot {namespace}/{name} is not a JSON object; ignoring");
        return HashMap::new();
    };
    let mut map = HashMap::with_capacity(object.len());
    for (key, value) in object {
        if key.is_empty() {
            continue;
        }
        let value = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        if !value.is_empty() {
            map.insert(key, value);
        }
    }
    map
}

/// Encodes a string/string map as the JSON object persisted on disk.
pub(crate) fn snapshot_from_map(map: &HashMap<String, String>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect()
}

/// Filesystem-backed store writing one JSON file per snapshot.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. Directories are created lazily on
    /// the first write into each namespace.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the directory backing a namespace.
    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }
}

impl SnapshotStore for FileStore {
    /// Writes the serialized snapshot, creating the namespace directory on demand.
    fn write(
        &self,
        namespace: &str,
        name: &str,
        snapshot: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec(snapshot)?;
        fs::write(dir.join(name), bytes)?;
        Ok(())
    }

    fn read(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.namespace_dir(namespace).join(name)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.namespace_dir(namespace).join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.namespace_dir(namespace)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

/// In-memory store for tests and embedders that do not want disk persistence.
///
/// Data does not survive process restarts; the layout otherwise matches
/// [`FileStore`] so the two are interchangeable behind [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn write(
        &self,
        namespace: &str,
        name: &str,
        snapshot: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(snapshot)?;
        let mut guard = self.entries.lock().expect("memory store poisoned");
        guard.insert((namespace.to_owned(), name.to_owned()), encoded);
        Ok(())
    }

    fn read(&self, namespace: &str, name: &str) -> Result<Option<String>, StoreError> {
        let guard = self.entries.lock().expect("memory store poisoned");
        Ok(guard
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().expect("memory store poisoned");
        guard.remove(&(namespace.to_owned(), name.to_owned()));
        Ok(())
    }

    fn delete_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().expect("memory store poisoned");
        guard.retain(|(stored_namespace, _), _| stored_namespace != namespace);
        Ok(())
    }
}
