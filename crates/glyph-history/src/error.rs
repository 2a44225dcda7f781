//! Error types for history persistence
//!
//! The timeline itself never fails. Errors here come from the durable
//! key/value store and from saved-version bookkeeping.

/// Errors from a [`KeyValueStore`](crate::storage::KeyValueStore) backend
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error reading or writing a key
    #[error("io error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be (de)serialized
    #[error("serialization failed for key '{key}': {source}")]
    Serde {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Key contains characters the backend cannot store
    #[error("invalid storage key: '{0}'")]
    InvalidKey(String),

    /// Backend refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Create IO error for key
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// Saved version errors
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// Version names must contain non-whitespace text
    #[error("version name cannot be empty")]
    EmptyName,

    /// No version with this ID
    #[error("saved version not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_display_names_key() {
        let err = StorageError::io(
            "glyph.saved_versions",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("glyph.saved_versions"));
    }

    #[test]
    fn version_error_display() {
        assert_eq!(VersionError::EmptyName.to_string(), "version name cannot be empty");
    }
}
