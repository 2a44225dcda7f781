//! User-named saved versions
//!
//! Saved versions are independent of the undo/redo timeline: they survive
//! eviction and are persisted through [`Storage`].

use crate::error::VersionError;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Storage key for the saved version list
pub const VERSIONS_KEY: &str = "glyph.saved_versions";

/// Maximum number of saved versions kept by default
pub const DEFAULT_VERSION_LIMIT: usize = 10;

/// A named copy of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedVersion {
    /// Version ID
    pub id: Uuid,
    /// User-chosen name
    pub name: String,
    /// Document content at save time
    pub content: String,
    /// When the version was saved
    pub timestamp: DateTime<Utc>,
}

/// Bounded, persisted list of saved versions (newest first)
#[derive(Debug)]
pub struct SavedVersions {
    storage: Arc<Storage>,
    versions: Vec<SavedVersion>,
    limit: usize,
}

impl SavedVersions {
    /// Load saved versions from storage
    #[must_use]
    pub fn load(storage: Arc<Storage>) -> Self {
        Self::load_with_limit(storage, DEFAULT_VERSION_LIMIT)
    }

    /// Load with an explicit bound
    #[must_use]
    pub fn load_with_limit(storage: Arc<Storage>, limit: usize) -> Self {
        let mut versions: Vec<SavedVersion> = storage.get(VERSIONS_KEY).unwrap_or_default();
        let limit = limit.max(1);
        versions.truncate(limit);
        Self {
            storage,
            versions,
            limit,
        }
    }

    /// Save `content` under `name`, evicting the oldest version past the bound
    ///
    /// # Errors
    /// - `VersionError::EmptyName` if `name` is blank
    pub fn save(&mut self, name: &str, content: &str) -> Result<SavedVersion, VersionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VersionError::EmptyName);
        }

        let version = SavedVersion {
            id: Uuid::new_v4(),
            name: name.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.versions.insert(0, version.clone());
        if self.versions.len() > self.limit {
            let evicted = self.versions.split_off(self.limit);
            tracing::debug!("Evicted {} saved version(s)", evicted.len());
        }
        self.persist();

        tracing::info!("Saved version '{}'", version.name);
        Ok(version)
    }

    /// Delete a version
    ///
    /// # Errors
    /// - `VersionError::NotFound` if no version has this ID
    pub fn delete(&mut self, id: Uuid) -> Result<SavedVersion, VersionError> {
        let idx = self
            .versions
            .iter()
            .position(|v| v.id == id)
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        let removed = self.versions.remove(idx);
        self.persist();
        Ok(removed)
    }

    /// Look up by ID
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&SavedVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Most recent version with this name
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&SavedVersion> {
        let name = name.trim();
        self.versions.iter().find(|v| v.name == name)
    }

    /// All versions, newest first
    #[inline]
    #[must_use]
    pub fn list(&self) -> &[SavedVersion] {
        &self.versions
    }

    fn persist(&self) {
        if !self.storage.set(VERSIONS_KEY, &self.versions) {
            tracing::debug!("Saved versions kept in memory only");
        }
    }
}
