//! Client-side key/value storage
//!
//! Two scopes exist: a session scope (identity cache) and a local scope
//! (preferences). Both are string-keyed JSON values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;

use crate::error::ClientError;

/// Session key holding the serialized current user
pub const CACHED_USER_KEY: &str = "cachedUser";
/// Session key holding the RFC 3339 time the user was cached
pub const CACHED_USER_TIMESTAMP_KEY: &str = "cachedUserTimestamp";
/// Session key holding the bearer token
pub const SESSION_TOKEN_KEY: &str = "sessionToken";
/// Local key holding the light/dark preference
pub const THEME_KEY: &str = "pixora-theme";

/// String-keyed JSON storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), ClientError>;
    fn remove(&self, key: &str) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
    fn keys(&self) -> Vec<String>;
}

/// Volatile store, gone when the process exits
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ClientError {
    ClientError::Storage("storage lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.entries.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        self.entries.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// JSON-document store persisted to a single file
///
/// The whole document is rewritten on every mutation.
pub struct FileStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Value>>,
}

impl FileStore {
    /// Open (or create) the store at `path`
    ///
    /// A missing file starts empty; an unreadable one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ClientError::Storage(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                ClientError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
            })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), ClientError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.clear();
        self.persist(&entries)
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set(THEME_KEY, Value::String("dark".into())).unwrap();
        assert_eq!(store.get(THEME_KEY), Some(Value::String("dark".into())));

        store.clear().unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn file_store_persists_across_opens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("local.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set(THEME_KEY, Value::String("dark".into())).unwrap();
            store.set("other", serde_json::json!({"a": 1})).unwrap();
            store.remove("other").unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(THEME_KEY), Some(Value::String("dark".into())));
        assert_eq!(reopened.keys(), vec![THEME_KEY.to_string()]);
    }

    #[test]
    fn file_store_rejects_corrupt_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(FileStore::open(&path).is_err());
    }
}
