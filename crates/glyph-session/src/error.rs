//! Error types and failure classification

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport code for requests that never reached the service
pub const CONNECTION_ERROR: &str = "CONNECTION_ERROR";

/// Code used when the service did not provide one
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Failure taxonomy driving retry and messaging decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Connection could not be established or dropped
    Network,
    /// Activity timeout or absolute ceiling exceeded
    Timeout,
    /// Server-side session expired or unknown
    Session,
    /// Too many requests
    RateLimit,
    /// 5xx-style service failure
    Server,
    /// Instruction would destroy most of the document
    GuardrailDestructive,
    /// Instruction targets a protected region
    GuardrailProtected,
    /// Instruction violates content policy
    Guardrail,
    /// Instruction cannot be satisfied for this document
    Impossible,
    /// Model answered with prose instead of a document
    AiRefusal,
    /// Anything else
    Unknown,
}

impl ErrorClass {
    /// Whether the coordinator may retry automatically
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Server | Self::Session | Self::Unknown
        )
    }

    /// Whether the user should be offered instant actions instead
    #[must_use]
    pub const fn suggests_alternatives(self) -> bool {
        matches!(
            self,
            Self::GuardrailDestructive
                | Self::GuardrailProtected
                | Self::Guardrail
                | Self::Impossible
                | Self::AiRefusal
        )
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Session => "session",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::GuardrailDestructive => "guardrail_destructive",
            Self::GuardrailProtected => "guardrail_protected",
            Self::Guardrail => "guardrail",
            Self::Impossible => "impossible",
            Self::AiRefusal => "ai_refusal",
            Self::Unknown => "unknown",
        }
    }

    /// Actionable message for the user
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Network => "Connection problem. Check your network and try again.",
            Self::Timeout => "The edit took too long. Try a shorter or more specific instruction.",
            Self::Session => "Your editing session expired. Reload the document to continue.",
            Self::RateLimit => "Too many requests. Wait a moment and try again.",
            Self::Server => "The editing service had a problem. Please try again shortly.",
            Self::GuardrailDestructive => {
                "That change would remove most of the document. Try a more targeted edit."
            }
            Self::GuardrailProtected => "That part of the document is protected and can't be changed.",
            Self::Guardrail => "That request isn't allowed. Try rephrasing it.",
            Self::Impossible => "That change can't be made to this document. Try a quick action instead.",
            Self::AiRefusal => "The assistant declined that change. Try rephrasing it.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ClassRule {
    class: ErrorClass,
    statuses: &'static [u16],
    keywords: &'static [&'static str],
}

/// Ordered classification table, first match wins
///
/// Keywords are matched against the lower-cased error code and message.
static CLASS_RULES: &[ClassRule] = &[
    ClassRule {
        class: ErrorClass::GuardrailDestructive,
        statuses: &[],
        keywords: &["guardrail_destructive", "destructive", "remove all content", "delete everything"],
    },
    ClassRule {
        class: ErrorClass::GuardrailProtected,
        statuses: &[],
        keywords: &["guardrail_protected", "protected region", "protected content", "protected"],
    },
    ClassRule {
        class: ErrorClass::Guardrail,
        statuses: &[],
        keywords: &["guardrail", "content policy", "policy violation", "not allowed"],
    },
    ClassRule {
        class: ErrorClass::Impossible,
        statuses: &[422],
        keywords: &["impossible", "not possible", "cannot be done", "unsupported instruction"],
    },
    ClassRule {
        class: ErrorClass::AiRefusal,
        statuses: &[],
        keywords: &["ai_refusal", "ai refusal", "model refused"],
    },
    ClassRule {
        class: ErrorClass::RateLimit,
        statuses: &[429],
        keywords: &["rate_limit", "rate limit", "too many requests"],
    },
    ClassRule {
        class: ErrorClass::Session,
        statuses: &[],
        keywords: &[
            "session_expired",
            "session_not_found",
            "session expired",
            "session not found",
            "invalid session",
        ],
    },
    ClassRule {
        class: ErrorClass::Timeout,
        statuses: &[408, 504],
        keywords: &["timeout", "timed out"],
    },
    ClassRule {
        class: ErrorClass::Network,
        statuses: &[0],
        keywords: &["connection_error", "network", "connection", "failed to fetch", "dns"],
    },
    ClassRule {
        class: ErrorClass::Server,
        statuses: &[500, 502, 503],
        keywords: &["internal server error", "server error", "bad gateway", "service unavailable"],
    },
];

/// Derive the failure class from an HTTP status and error text
#[must_use]
pub fn classify(status: u16, text: &str) -> ErrorClass {
    let text = text.to_lowercase();
    CLASS_RULES
        .iter()
        .find(|rule| {
            rule.statuses.contains(&status) || rule.keywords.iter().any(|k| text.contains(k))
        })
        .map_or_else(
            || {
                if status >= 500 {
                    ErrorClass::Server
                } else {
                    ErrorClass::Unknown
                }
            },
            |rule| rule.class,
        )
}

/// Error reported by the remote service or the transport in front of it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {status}, code {code})")]
pub struct ServiceError {
    /// Human-readable message
    pub message: String,
    /// HTTP status, 0 when no response was received
    pub status: u16,
    /// Machine-readable code
    pub code: String,
}

impl ServiceError {
    /// Create error
    pub fn new(message: impl Into<String>, status: u16, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            code: code.into(),
        }
    }

    /// Request never produced a response
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(message, 0, CONNECTION_ERROR)
    }

    /// Error from a non-success response, filling service defaults
    #[must_use]
    pub fn from_response(status: u16, message: Option<String>, code: Option<String>) -> Self {
        Self {
            message: message.unwrap_or_else(|| format!("Request failed with status {status}")),
            status,
            code: code.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        }
    }

    /// Failure class of this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        classify(self.status, &format!("{} {}", self.code, self.message))
    }
}

/// A modification attempt that failed for good
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} error after {attempts} attempt(s): {message}")]
pub struct ModifyError {
    /// Failure class
    pub class: ErrorClass,
    /// Underlying message
    pub message: String,
    /// Network attempts made, 0 when rejected before any
    pub attempts: u32,
    /// Instant actions offered as alternatives
    pub suggestions: Vec<String>,
}

impl ModifyError {
    /// Create error without suggestions
    pub fn new(class: ErrorClass, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            class,
            message: message.into(),
            attempts,
            suggestions: Vec::new(),
        }
    }

    /// Attach alternative instant actions
    #[must_use]
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Message to show the user
    ///
    /// Refusals carry the model's own explanation; other classes use the
    /// tailored class message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.class {
            ErrorClass::AiRefusal if !self.message.is_empty() => {
                format!("{} ({})", ErrorClass::AiRefusal.user_message(), self.message)
            }
            class => class.user_message().to_string(),
        }
    }
}

/// Controller-level misuse
#[derive(Debug, Error)]
pub enum SessionError {
    /// Timeline is at its oldest entry
    #[error("nothing to undo")]
    NothingToUndo,

    /// Timeline is at its newest entry
    #[error("nothing to redo")]
    NothingToRedo,

    /// A modification is in flight
    #[error("a modification is already in progress")]
    Busy,

    /// No failed instruction is remembered
    #[error("no failed instruction to retry")]
    NothingToRetry,

    /// Saved version failure
    #[error(transparent)]
    Version(#[from] glyph_history::VersionError),

    /// Remote modification failure
    #[error(transparent)]
    Modify(#[from] ModifyError),
}

/// Configuration loading or validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config '{path}': {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}
