//! Capability-checked durable key/value storage
//!
//! Backends report raw [`StorageError`]s. [`Storage`] wraps a backend once so no
//! caller handles them: it checks availability at construction, keeps an
//! in-memory fallback for every write, and degrades to memory-only mode with a
//! single warning when the backend fails.

use crate::error::StorageError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const CHECK_KEY: &str = "glyph.check";
const FLAG_PREFIX: &str = "glyph.flag.";

/// Message shown once when persistence is lost
pub const DEGRADED_WARNING: &str =
    "Local storage is unavailable; saved versions will only last for this session.";

/// Raw string key/value backend
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value (missing keys are not an error)
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.lock().remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create store rooted at `dir` (created lazily on first write)
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid || key.starts_with('.') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(key, e))?;

        // Write-then-rename so readers never observe a torn value
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| StorageError::io(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::io(key, e))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(key, e)),
        }
    }
}

/// Guarded, typed storage used by the rest of the engine
#[derive(Debug)]
pub struct Storage {
    backend: Arc<dyn KeyValueStore>,
    fallback: MemoryStore,
    available: AtomicBool,
    warned: AtomicBool,
    warning_pending: AtomicBool,
}

impl Storage {
    /// Wrap `backend`, probing it once for availability
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        let storage = Self {
            backend,
            fallback: MemoryStore::new(),
            available: AtomicBool::new(true),
            warned: AtomicBool::new(false),
            warning_pending: AtomicBool::new(false),
        };

        let check = storage
            .backend
            .set(CHECK_KEY, "1")
            .and_then(|()| storage.backend.remove(CHECK_KEY));
        if let Err(e) = check {
            storage.degrade(&e);
        }

        storage
    }

    /// Memory-only storage
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Whether writes still reach the durable backend
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Read and decode a value; any failure reads as absent
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = if self.is_available() {
            match self.backend.get(key) {
                Ok(Some(raw)) => {
                    // Mirrored so the value survives a later switch to memory-only
                    let _ = self.fallback.set(key, &raw);
                    Some(raw)
                }
                Ok(None) => self.fallback.get(key).ok().flatten(),
                Err(e) => {
                    self.degrade(&e);
                    self.fallback.get(key).ok().flatten()
                }
            }
        } else {
            self.fallback.get(key).ok().flatten()
        }?;

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable value for '{}': {}", key, e);
                None
            }
        }
    }

    /// Encode and write a value
    ///
    /// The value is always kept in memory. Returns whether it also reached the
    /// durable backend.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(source) => {
                let err = StorageError::Serde {
                    key: key.to_string(),
                    source,
                };
                tracing::warn!("Not storing value: {}", err);
                return false;
            }
        };

        // MemoryStore never fails
        let _ = self.fallback.set(key, &raw);

        if !self.is_available() {
            return false;
        }
        match self.backend.set(key, &raw) {
            Ok(()) => true,
            Err(e) => {
                self.degrade(&e);
                false
            }
        }
    }

    /// Delete a value
    pub fn remove(&self, key: &str) {
        let _ = self.fallback.remove(key);
        if self.is_available() {
            if let Err(e) = self.backend.remove(key) {
                self.degrade(&e);
            }
        }
    }

    /// One-shot flag: true the first time `name` is taken, false afterwards
    pub fn take_flag(&self, name: &str) -> bool {
        let key = format!("{FLAG_PREFIX}{name}");
        if self.get::<bool>(&key).unwrap_or(false) {
            return false;
        }
        self.set(&key, &true);
        true
    }

    /// The single user-facing degradation warning, if not yet taken
    #[must_use]
    pub fn take_warning(&self) -> Option<&'static str> {
        self.warning_pending
            .swap(false, Ordering::AcqRel)
            .then_some(DEGRADED_WARNING)
    }

    fn degrade(&self, error: &StorageError) {
        self.available.store(false, Ordering::Release);
        if !self.warned.swap(true, Ordering::AcqRel) {
            tracing::warn!("Storage degraded to memory-only: {}", error);
            self.warning_pending.store(true, Ordering::Release);
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::in_memory()
    }
}
