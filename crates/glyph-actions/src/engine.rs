//! Instant action engine
//!
//! The fast path for common, low-risk edits: synchronous, total, and free of
//! network access. A `None` result tells the caller to fall through to the
//! remote modification service.

use crate::rules::{InstantRule, BUILTIN_RULES};

/// Result of a matched instant action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantEdit {
    /// Name of the rule that fired
    pub rule: &'static str,
    /// New document content
    pub content: String,
}

/// Ordered rule table, first match wins
#[derive(Debug, Clone)]
pub struct InstantActionEngine {
    rules: Vec<InstantRule>,
}

impl InstantActionEngine {
    /// Create engine with the built-in rules
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: BUILTIN_RULES.to_vec(),
        }
    }

    /// Create engine with no rules (everything falls through)
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule, evaluated after the existing ones
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, rule: InstantRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Try to satisfy `prompt` locally
    ///
    /// # Returns
    /// The rewritten document, or `None` when no rule matches.
    #[must_use]
    pub fn try_apply(&self, prompt: &str, content: &str) -> Option<InstantEdit> {
        let normalized = prompt.trim().to_lowercase();
        let rule = self.rules.iter().find(|rule| (rule.matches)(&normalized))?;

        tracing::debug!("Instant action '{}' matched prompt", rule.name);
        Some(InstantEdit {
            rule: rule.name,
            content: (rule.apply)(prompt.trim(), content),
        })
    }

    /// Whether some rule would handle `prompt`
    #[must_use]
    pub fn matches(&self, prompt: &str) -> bool {
        let normalized = prompt.trim().to_lowercase();
        self.rules.iter().any(|rule| (rule.matches)(&normalized))
    }

    /// Example prompts, one per rule, in table order
    #[must_use]
    pub fn catalog(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.example).collect()
    }

    /// Rules in evaluation order
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[InstantRule] {
        &self.rules
    }
}

impl Default for InstantActionEngine {
    fn default() -> Self {
        Self::new()
    }
}
