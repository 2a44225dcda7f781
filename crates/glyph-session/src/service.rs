//! Remote modification service boundary

use crate::error::ServiceError;
use crate::stream::{StreamError, StreamEvent};
use async_trait::async_trait;
use futures::stream::BoxStream;
use glyph_history::SessionId;
use serde::{Deserialize, Serialize};

/// Stream of decoded events for one modification request
pub type EventStream = BoxStream<'static, Result<StreamEvent, StreamError>>;

/// Body of a modification request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyRequest {
    /// Server-side session
    pub session_id: SessionId,
    /// User instruction
    pub prompt: String,
    /// Document the instruction applies to
    pub current_content: String,
}

impl ModifyRequest {
    /// Create request
    pub fn new(
        session_id: SessionId,
        prompt: impl Into<String>,
        current_content: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            prompt: prompt.into(),
            current_content: current_content.into(),
        }
    }
}

/// Non-streaming modification result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyResponse {
    /// New document content
    pub content: String,
    /// Regions the service reports as touched
    #[serde(default)]
    pub changed_regions: Vec<String>,
}

/// Validation issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Blocks sending the document
    Critical,
    /// Worth a look
    Warning,
    /// Informational
    Info,
}

/// One finding of the post-edit validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity
    pub severity: IssueSeverity,
    /// Description
    pub message: String,
    /// Region the issue points at
    #[serde(default)]
    pub region: Option<String>,
}

/// Completed validation result
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Number of critical issues
    #[serde(default)]
    pub critical_count: u32,
    /// Number of warnings
    #[serde(default)]
    pub warning_count: u32,
    /// Individual findings
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    /// Whether the service can fix the issues itself
    #[serde(default)]
    pub has_auto_fix: bool,
}

/// Remote modification and validation service
#[async_trait]
pub trait ModificationService: Send + Sync {
    /// Start a streaming modification
    async fn modify_stream(&self, request: &ModifyRequest) -> Result<EventStream, ServiceError>;

    /// Run a modification and wait for the full result
    async fn modify(&self, request: &ModifyRequest) -> Result<ModifyResponse, ServiceError>;

    /// Latest validation result, `None` while validation is still running
    async fn validation_status(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ValidationReport>, ServiceError>;

    /// Ask the service to fix its validation findings, returning the new content
    async fn auto_fix(&self, session_id: &SessionId) -> Result<String, ServiceError>;

    /// Renew an expired session, returning the id to use from now on
    async fn refresh_session(&self, session_id: &SessionId) -> Result<SessionId, ServiceError>;
}
