//! Key/blob persistence collaborator.
//!
//! The core never touches storage directly: it encodes each entity through
//! [`schema`] and hands the bytes to a [`PersistenceProvider`]. Providers are
//! assumed atomic per key.

pub mod error;
pub mod schema;

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

pub use error::PersistenceError;

/// Storage backend for encoded entities.
pub trait PersistenceProvider: Send + Sync {
    /// Stores `blob` under `key`, replacing any previous value.
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError>;

    /// Returns the blob stored under `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// In-memory provider, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has been saved.
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Deletes `key`, returning its blob.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.write().remove(key)
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns `true` if nothing has been saved.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl PersistenceProvider for MemoryStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        self.blobs.write().insert(key.to_owned(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blobs.read().get(key).cloned())
    }
}

/// Directory-backed provider storing each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// reader never observes a half-written blob.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the storage directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| PersistenceError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl PersistenceProvider for FileStore {
    fn save(&self, key: &str, blob: &[u8]) -> Result<(), PersistenceError> {
        let target = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        let io = |source: std::io::Error| PersistenceError::Io {
            key: key.to_owned(),
            source,
        };
        fs::write(&tmp, blob).map_err(io)?;
        fs::rename(&tmp, &target).map_err(io)?;
        debug!(key, bytes = blob.len(), path = %target.display(), "Blob saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("adaptloop-store-{}", crate::generate_id()))
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k").unwrap(), None);
        store.save("k", b"one").unwrap();
        store.save("k", b"two").unwrap();
        assert_eq!(store.load("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.keys(), vec!["k".to_string()]);
        assert_eq!(store.remove("k"), Some(b"two".to_vec()));
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = scratch_dir();
        let store = FileStore::new(&dir).unwrap();
        assert_eq!(store.load("policy_store").unwrap(), None);
        store.save("policy_store", br#"{"a":1}"#).unwrap();
        assert_eq!(
            store.load("policy_store").unwrap(),
            Some(br#"{"a":1}"#.to_vec())
        );
        assert!(dir.join("policy_store.json").exists());
        assert!(!dir.join(".policy_store.json.tmp").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = scratch_dir();
        let store = FileStore::new(&dir).unwrap();
        for key in ["", "../escape", "a/b", "x.json"] {
            assert!(matches!(
                store.save(key, b"x"),
                Err(PersistenceError::InvalidKey(_))
            ));
        }
        fs::remove_dir_all(&dir).unwrap();
    }
}
