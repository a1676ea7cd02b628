//! Durable key-value store
//!
//! Each key is one JSON file in the data directory. Writes are atomic
//! (write to temp file, then rename) so a crash never leaves a key
//! half-written.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::{StorageError, StorageResult};

/// Keys persisted in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Notices,
    Forms,
    LastUpdate,
    RetryQueue,
    FailedSyncLog,
    SubmissionAnalytics,
}

impl StorageKey {
    pub const ALL: [StorageKey; 6] = [
        StorageKey::Notices,
        StorageKey::Forms,
        StorageKey::LastUpdate,
        StorageKey::RetryQueue,
        StorageKey::FailedSyncLog,
        StorageKey::SubmissionAnalytics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::Notices => "notices-collection",
            StorageKey::Forms => "forms-collection",
            StorageKey::LastUpdate => "last-update-timestamp",
            StorageKey::RetryQueue => "retry-queue",
            StorageKey::FailedSyncLog => "failed-sync-log",
            StorageKey::SubmissionAnalytics => "form-submission-analytics",
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-backed key-value store rooted at a data directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open the store, creating the directory if needed
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: StorageKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    pub fn exists(&self, key: StorageKey) -> bool {
        self.path(key).exists()
    }

    /// Read the raw JSON stored under `key`
    pub fn get_value(&self, key: StorageKey) -> StorageResult<Option<Value>> {
        let path = self.path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::ReadError { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::InvalidFormat {
                path,
                details: e.to_string(),
            })
    }

    /// Read and decode the value stored under `key`
    pub fn get<T: DeserializeOwned>(&self, key: StorageKey) -> StorageResult<Option<T>> {
        let Some(value) = self.get_value(key)? else {
            return Ok(None);
        };

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::InvalidFormat {
                path: self.path(key),
                details: e.to_string(),
            })
    }

    /// Store a value under `key`, replacing what was there
    pub fn set<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serialize {
            key: key.to_string(),
            source,
        })?;
        atomic_write(&self.path(key), &bytes)
    }

    pub fn remove(&self, key: StorageKey) -> StorageResult<()> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(e, path)),
        }
    }

    /// Total bytes used by all keys
    pub fn size_on_disk(&self) -> u64 {
        StorageKey::ALL
            .iter()
            .filter_map(|k| fs::metadata(self.path(*k)).ok())
            .map(|m| m.len())
            .sum()
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        assert!(!store.exists(StorageKey::Notices));
        assert!(store.get::<Vec<String>>(StorageKey::Notices).unwrap().is_none());

        store
            .set(StorageKey::Notices, &vec!["a".to_string(), "b".to_string()])
            .unwrap();
        assert!(store.exists(StorageKey::Notices));

        let loaded: Vec<String> = store.get(StorageKey::Notices).unwrap().unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[test]
    fn test_file_names_match_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        assert!(store
            .path(StorageKey::SubmissionAnalytics)
            .ends_with("form-submission-analytics.json"));
        assert!(store
            .path(StorageKey::LastUpdate)
            .ends_with("last-update-timestamp.json"));
    }

    #[test]
    fn test_corrupt_value_is_invalid_format() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        fs::write(store.path(StorageKey::Forms), b"{ nope").unwrap();
        assert!(matches!(
            store.get_value(StorageKey::Forms),
            Err(StorageError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        store.remove(StorageKey::RetryQueue).unwrap();
        store.set(StorageKey::RetryQueue, &Vec::<u8>::new()).unwrap();
        store.remove(StorageKey::RetryQueue).unwrap();
        assert!(!store.exists(StorageKey::RetryQueue));
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("a").join("b").join("file.json");

        atomic_write(&nested_path, b"{}").unwrap();

        assert!(nested_path.exists());
        assert!(!nested_path.with_extension("tmp").exists());
    }

    #[test]
    fn test_size_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.size_on_disk(), 0);

        store.set(StorageKey::LastUpdate, "2024-01-01T00:00:00Z").unwrap();
        assert!(store.size_on_disk() > 0);
    }
}
