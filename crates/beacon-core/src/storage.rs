//! Durable key/value storage for JSON documents.
//!
//! Each key maps to one JSON file inside the data directory. Writes go through
//! a temporary file followed by a rename so readers never see a half-written
//! document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{BeaconError, Result};

/// Fallible key/value storage for JSON values.
pub trait Storage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Load the value stored under `key`, or `None` if nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value exists but cannot be read or parsed.
    fn get(&self, key: &str) -> Result<Option<Value>>;
}

/// JSON file storage rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// Create a new storage instance.
    ///
    /// # Arguments
    ///
    /// * `data_dir` - Directory to store data files
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Directory holding the data files.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn put(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(value)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BeaconError::Io(e)),
        }
    }
}

/// In-memory storage, used for ephemeral runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| poisoned(key))?
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| poisoned(key))?
            .get(key)
            .cloned())
    }
}

fn poisoned(key: &str) -> BeaconError {
    BeaconError::PersistenceFailure {
        key: key.to_string(),
        attempts: 1,
        message: "memory store lock poisoned".to_string(),
    }
}

/// Get the default data directory.
///
/// On Linux: `/var/lib/beacon-tracker/`
/// Elsewhere: the platform data directory (e.g. `~/Library/Application Support/beacon-tracker`)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/beacon-tracker")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-tracker").map_or_else(
            || PathBuf::from("./data"),
            |dirs| dirs.data_dir().to_path_buf(),
        )
    }
}
