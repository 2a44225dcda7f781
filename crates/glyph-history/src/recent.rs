//! Recent-action memory for suggestion ranking

use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage key for recent actions
pub const RECENT_KEY: &str = "glyph.recent_actions";

/// Maximum number of remembered actions
pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// One remembered instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentAction {
    /// Instruction as typed
    pub prompt: String,
    /// Instant action rule that handled it, if any
    #[serde(default)]
    pub rule: Option<String>,
}

/// Bounded most-recent-first list of submitted instructions
#[derive(Debug)]
pub struct RecentActions {
    storage: Arc<Storage>,
    entries: Vec<RecentAction>,
    limit: usize,
}

impl RecentActions {
    /// Load remembered actions from storage
    #[must_use]
    pub fn load(storage: Arc<Storage>) -> Self {
        let mut entries: Vec<RecentAction> = storage.get(RECENT_KEY).unwrap_or_default();
        entries.truncate(DEFAULT_RECENT_LIMIT);
        Self {
            storage,
            entries,
            limit: DEFAULT_RECENT_LIMIT,
        }
    }

    /// Remember an instruction and the rule that handled it
    pub fn record(&mut self, prompt: &str, rule: Option<&str>) {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return;
        }
        self.entries.insert(
            0,
            RecentAction {
                prompt: prompt.to_string(),
                rule: rule.map(str::to_string),
            },
        );
        self.entries.truncate(self.limit);
        self.storage.set(RECENT_KEY, &self.entries);
    }

    /// Remembered instructions, newest first
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[RecentAction] {
        &self.entries
    }

    /// Order `(rule, label)` candidates by how often, then how recently, they
    /// were used, returning labels
    ///
    /// A use counts when it was handled by the candidate's rule or when its
    /// prompt equals the label. Unused candidates keep their given order after
    /// the used ones.
    #[must_use]
    pub fn ranked(&self, candidates: &[(&str, &str)], limit: usize) -> Vec<String> {
        let mut scored: Vec<(usize, usize, usize, &str)> = candidates
            .iter()
            .enumerate()
            .map(|(order, &(rule, label))| {
                let hits = self.entries.iter().enumerate().filter(|(_, e)| {
                    e.rule.as_deref() == Some(rule) || e.prompt.eq_ignore_ascii_case(label)
                });
                let count = hits.clone().count();
                let recency = hits.map(|(i, _)| i).min().unwrap_or(usize::MAX);
                (count, recency, order, label)
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, _, _, label)| label.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &[(&str, &str)] = &[
        ("watermark", "Add a DRAFT watermark"),
        ("signature-line", "Add signature line"),
        ("qr-code", "Add QR code"),
        ("paid-stamp", "Mark as paid"),
    ];

    #[test]
    fn record_is_bounded_and_newest_first() {
        let mut recent = RecentActions::load(Arc::new(Storage::in_memory()));
        for i in 0..25 {
            recent.record(&format!("action {i}"), None);
        }
        assert_eq!(recent.entries().len(), DEFAULT_RECENT_LIMIT);
        assert_eq!(recent.entries()[0].prompt, "action 24");
    }

    #[test]
    fn ranking_prefers_frequency_then_recency() {
        let mut recent = RecentActions::load(Arc::new(Storage::in_memory()));
        recent.record("Add QR code", Some("qr-code"));
        recent.record("Add watermark", Some("watermark"));
        recent.record("Add QR code", Some("qr-code"));
        recent.record("Add signature line", Some("signature-line"));

        let ranked = recent.ranked(CATALOG, 3);
        assert_eq!(ranked, vec!["Add QR code", "Add signature line", "Add a DRAFT watermark"]);
    }

    #[test]
    fn rephrased_prompts_count_for_their_rule() {
        let mut recent = RecentActions::load(Arc::new(Storage::in_memory()));
        recent.record("put a qr code for https://pay.example.com", Some("qr-code"));
        recent.record("Add a CONFIDENTIAL watermark", Some("watermark"));
        recent.record("watermark: copy", Some("watermark"));

        assert_eq!(
            recent.ranked(CATALOG, 2),
            vec!["Add a DRAFT watermark", "Add QR code"]
        );
    }

    #[test]
    fn remote_prompts_match_by_text() {
        let mut recent = RecentActions::load(Arc::new(Storage::in_memory()));
        recent.record("mark as paid", None);
        recent.record("Make the header navy", None);

        assert_eq!(recent.ranked(CATALOG, 1), vec!["Mark as paid"]);
    }

    #[test]
    fn entries_survive_reload() {
        let storage = Arc::new(Storage::in_memory());
        RecentActions::load(Arc::clone(&storage)).record("Add QR code", Some("qr-code"));

        let reloaded = RecentActions::load(storage);
        assert_eq!(reloaded.entries()[0].rule.as_deref(), Some("qr-code"));
    }

    #[test]
    fn blank_prompts_are_not_recorded() {
        let mut recent = RecentActions::load(Arc::new(Storage::in_memory()));
        recent.record("   ", None);
        assert!(recent.entries().is_empty());
    }
}
