//! Session configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default service endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.glyph.you";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Service base URL
    pub base_url: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Use the streaming endpoint
    pub streaming: bool,
    /// Request lifecycle limits
    pub request: RequestConfig,
    /// Post-edit validation polling
    pub validation: ValidationConfig,
    /// History and saved-version bounds
    pub history: HistoryConfig,
    /// Directory for persisted versions and preferences, memory-only when unset
    pub storage_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError`] on parse failure or inconsistent values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With base URL
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// With API key
    #[inline]
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// With streaming on or off
    #[inline]
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// With request limits
    #[inline]
    #[must_use]
    pub fn with_request(mut self, request: RequestConfig) -> Self {
        self.request = request;
        self
    }

    /// With validation polling settings
    #[inline]
    #[must_use]
    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// With storage directory
    #[inline]
    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Check values for consistency
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.request.ceiling_secs == 0 || self.request.activity_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeouts must be positive".into()));
        }
        if self.request.cancel_margin() >= self.request.ceiling() {
            return Err(ConfigError::Invalid(
                "cancel_margin_ms must be below the request ceiling".into(),
            ));
        }
        if self.validation.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.history.undo_limit == 0 {
            return Err(ConfigError::Invalid("undo_limit must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            streaming: true,
            request: RequestConfig::default(),
            validation: ValidationConfig::default(),
            history: HistoryConfig::default(),
            storage_dir: None,
        }
    }
}

/// Request lifecycle limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Absolute per-attempt ceiling
    pub ceiling_secs: u64,
    /// Maximum silence between stream chunks
    pub activity_timeout_secs: u64,
    /// Elapsed time after which a slow-response notice is sent
    pub warning_after_secs: u64,
    /// Aborts earlier than `ceiling - margin` count as user cancels
    pub cancel_margin_ms: u64,
    /// Automatic retries per submission
    pub max_auto_retries: u32,
    /// First backoff delay, doubled for each further retry
    pub backoff_base_ms: u64,
}

impl RequestConfig {
    /// Absolute per-attempt ceiling
    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    /// Maximum silence between stream chunks
    #[inline]
    #[must_use]
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    /// Slow-response notice threshold
    #[inline]
    #[must_use]
    pub fn warning_after(&self) -> Duration {
        Duration::from_secs(self.warning_after_secs)
    }

    /// User-cancel margin below the ceiling
    #[inline]
    #[must_use]
    pub fn cancel_margin(&self) -> Duration {
        Duration::from_millis(self.cancel_margin_ms)
    }

    /// Delay before automatic retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1 << exp))
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            ceiling_secs: 90,
            activity_timeout_secs: 15,
            warning_after_secs: 45,
            cancel_margin_ms: 2_000,
            max_auto_retries: 2,
            backoff_base_ms: 1_000,
        }
    }
}

/// Post-edit validation polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Poll after successful remote edits
    pub enabled: bool,
    /// Delay between polls
    pub poll_interval_ms: u64,
    /// Polls before giving up
    pub max_attempts: u32,
}

impl ValidationConfig {
    /// Delay between polls
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1_000,
            max_attempts: 60,
        }
    }
}

/// History and saved-version bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Undo depth
    pub undo_limit: usize,
    /// Redo depth
    pub redo_limit: usize,
    /// Saved versions kept
    pub version_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            undo_limit: glyph_history::DEFAULT_UNDO_LIMIT,
            redo_limit: glyph_history::DEFAULT_REDO_LIMIT,
            version_limit: glyph_history::DEFAULT_VERSION_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_request_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.request.ceiling(), Duration::from_secs(90));
        assert_eq!(config.request.activity_timeout(), Duration::from_secs(15));
        assert_eq!(config.request.warning_after(), Duration::from_secs(45));
        assert_eq!(config.validation.max_attempts, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_doubles() {
        let request = RequestConfig::default();
        assert_eq!(request.backoff(1), Duration::from_secs(1));
        assert_eq!(request.backoff(2), Duration::from_secs(2));
        assert_eq!(request.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            base_url = "http://localhost:3000"
            streaming = false

            [request]
            max_auto_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "http://localhost:3000");
        assert!(!config.streaming);
        assert_eq!(config.request.max_auto_retries, 0);
        assert_eq!(config.request.ceiling_secs, 90);
        assert_eq!(config.history, HistoryConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SessionConfig::from_toml_str("[request]\ncancel_margin_ms = 90000").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        assert!(matches!(
            SessionConfig::from_toml_str("streaming = \"yes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glyph.toml");
        std::fs::write(&path, "api_key = \"sk-test\"\n").unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert!(matches!(
            SessionConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
