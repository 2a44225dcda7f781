//! Document snapshots and history entries
//!
//! A snapshot is the opaque serialized document plus the identifiers that tie it
//! to a server-side session and the template it was generated from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side session handle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create session ID from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Template the document was generated from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    /// Create template ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique history entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Generate new entry ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authoritative document content at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// Serialized document (opaque to the engine)
    pub content: String,
    /// Session this content belongs to
    pub session_id: SessionId,
    /// Template the document was generated from
    pub template_id: Option<TemplateId>,
}

impl DocumentSnapshot {
    /// Create snapshot for a session
    #[inline]
    #[must_use]
    pub fn new(content: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            content: content.into(),
            session_id,
            template_id: None,
        }
    }

    /// With template ID
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// Same session and template, different content
    #[inline]
    #[must_use]
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            session_id: self.session_id.clone(),
            template_id: self.template_id.clone(),
        }
    }
}

/// One committed change on the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Entry ID
    pub id: EntryId,
    /// When the change was committed
    pub timestamp: DateTime<Utc>,
    /// Instruction that produced the change
    pub prompt: String,
    /// Document after the change
    pub snapshot: DocumentSnapshot,
}

impl HistoryEntry {
    /// Create entry stamped with the current time
    #[must_use]
    pub fn new(prompt: impl Into<String>, snapshot: DocumentSnapshot) -> Self {
        Self {
            id: EntryId::new(),
            timestamp: Utc::now(),
            prompt: prompt.into(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_content_keeps_identifiers() {
        let snap = DocumentSnapshot::new("<p>a</p>", SessionId::new("s1"))
            .with_template(TemplateId::new("invoice-basic"));
        let next = snap.with_content("<p>b</p>");

        assert_eq!(next.content, "<p>b</p>");
        assert_eq!(next.session_id, snap.session_id);
        assert_eq!(next.template_id, snap.template_id);
    }

    #[test]
    fn session_id_serializes_transparently() {
        let json = serde_json::to_string(&SessionId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
