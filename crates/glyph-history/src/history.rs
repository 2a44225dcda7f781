//! Undo/redo timeline
//!
//! The timeline is a bounded sequence of [`HistoryEntry`] values plus a position.
//! Entries before the position form the undo stack, entries after it the redo
//! stack. `timeline[position]` is always the visible document.

use crate::snapshot::{DocumentSnapshot, EntryId, HistoryEntry};

/// Maximum number of undo steps kept by default
pub const DEFAULT_UNDO_LIMIT: usize = 10;

/// Maximum number of redo steps kept by default
pub const DEFAULT_REDO_LIMIT: usize = 20;

/// Reservation for an optimistic commit
///
/// Returned by [`HistoryManager::begin_pending`]. Exactly one of
/// [`HistoryManager::commit_pending`] or [`HistoryManager::rollback_pending`]
/// resolves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a pending edit must be committed or rolled back"]
pub struct PendingToken(EntryId);

#[derive(Debug, Clone)]
struct PendingEdit {
    id: EntryId,
    prompt: String,
    base_position: usize,
}

/// Authoritative edit timeline
#[derive(Debug, Clone)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    position: usize,
    undo_limit: usize,
    redo_limit: usize,
    pending: Option<PendingEdit>,
}

impl HistoryManager {
    /// Create timeline whose only entry is the initial document
    #[must_use]
    pub fn new(initial: DocumentSnapshot) -> Self {
        Self::with_limits(initial, DEFAULT_UNDO_LIMIT, DEFAULT_REDO_LIMIT)
    }

    /// Create timeline with explicit undo/redo bounds
    #[must_use]
    pub fn with_limits(initial: DocumentSnapshot, undo_limit: usize, redo_limit: usize) -> Self {
        Self {
            entries: vec![HistoryEntry::new("Initial document", initial)],
            position: 0,
            undo_limit: undo_limit.max(1),
            redo_limit: redo_limit.max(1),
            pending: None,
        }
    }

    /// Record a committed change
    ///
    /// Any redo branch is discarded first. The oldest entry is evicted when the
    /// undo bound is exceeded.
    pub fn commit(&mut self, prompt: impl Into<String>, snapshot: DocumentSnapshot) -> &HistoryEntry {
        if let Some(pending) = self.pending.take() {
            tracing::warn!(
                "Direct commit while edit {} was pending; dropping reservation",
                pending.id
            );
        }

        self.entries.truncate(self.position + 1);
        self.entries.push(HistoryEntry::new(prompt, snapshot));
        self.position = self.entries.len() - 1;

        while self.position > self.undo_limit {
            self.entries.remove(0);
            self.position -= 1;
        }

        &self.entries[self.position]
    }

    /// Step back one entry
    ///
    /// Returns `None` at the start of the timeline or while an edit is pending.
    pub fn undo(&mut self) -> Option<DocumentSnapshot> {
        if !self.can_undo() {
            return None;
        }

        self.position -= 1;
        let max_len = self.position + 1 + self.redo_limit;
        self.entries.truncate(max_len);

        Some(self.entries[self.position].snapshot.clone())
    }

    /// Step forward one entry
    ///
    /// Returns `None` at the tail of the timeline or while an edit is pending.
    pub fn redo(&mut self) -> Option<DocumentSnapshot> {
        if !self.can_redo() {
            return None;
        }

        self.position += 1;
        Some(self.entries[self.position].snapshot.clone())
    }

    /// Record a restored saved version as a new commit
    pub fn restore(&mut self, label: &str, snapshot: DocumentSnapshot) -> &HistoryEntry {
        self.commit(format!("Restored: {label}"), snapshot)
    }

    /// Reserve the optimistic undo entry for a risky edit
    ///
    /// While the reservation is held undo and redo are unavailable so the visible
    /// document cannot move underneath the in-flight request.
    pub fn begin_pending(&mut self, prompt: impl Into<String>) -> PendingToken {
        let edit = PendingEdit {
            id: EntryId::new(),
            prompt: prompt.into(),
            base_position: self.position,
        };
        let token = PendingToken(edit.id);
        if let Some(previous) = self.pending.replace(edit) {
            tracing::warn!("Replacing unresolved pending edit {}", previous.id);
        }
        token
    }

    /// Turn the reservation into a real commit
    ///
    /// Returns `None` if the token no longer matches the reservation.
    pub fn commit_pending(
        &mut self,
        token: PendingToken,
        snapshot: DocumentSnapshot,
    ) -> Option<&HistoryEntry> {
        let pending = self.take_pending(token)?;
        debug_assert_eq!(pending.base_position, self.position);
        Some(self.commit(pending.prompt, snapshot))
    }

    /// Pop the reservation, leaving the timeline exactly as it was
    ///
    /// Returns whether a matching reservation existed.
    pub fn rollback_pending(&mut self, token: PendingToken) -> bool {
        match self.take_pending(token) {
            Some(pending) => {
                tracing::debug!("Rolled back pending edit '{}'", pending.prompt);
                true
            }
            None => false,
        }
    }

    fn take_pending(&mut self, token: PendingToken) -> Option<PendingEdit> {
        match &self.pending {
            Some(pending) if pending.id == token.0 => self.pending.take(),
            _ => {
                tracing::warn!("Ignoring stale pending token {}", token.0);
                None
            }
        }
    }

    /// Visible entry
    #[inline]
    #[must_use]
    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.position]
    }

    /// Visible snapshot
    #[inline]
    #[must_use]
    pub fn current_snapshot(&self) -> &DocumentSnapshot {
        &self.current().snapshot
    }

    /// Index of the visible entry
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// All retained entries, oldest first
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Number of available undo steps
    #[inline]
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.position
    }

    /// Number of available redo steps
    #[inline]
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.entries.len() - 1 - self.position
    }

    /// Whether undo would succeed
    #[inline]
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.pending.is_none() && self.position > 0
    }

    /// Whether redo would succeed
    #[inline]
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.pending.is_none() && self.position + 1 < self.entries.len()
    }

    /// Whether an optimistic edit is outstanding
    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SessionId;
    use proptest::prelude::*;

    fn snap(content: &str) -> DocumentSnapshot {
        DocumentSnapshot::new(content, SessionId::new("s"))
    }

    #[test]
    fn undo_redo_walks_timeline() {
        let mut history = HistoryManager::new(snap("v0"));
        history.commit("a", snap("v1"));
        history.commit("b", snap("v2"));

        assert_eq!(history.undo().unwrap().content, "v1");
        assert_eq!(history.undo().unwrap().content, "v0");
        assert!(history.undo().is_none());
        assert_eq!(history.redo().unwrap().content, "v1");
        assert_eq!(history.current_snapshot().content, "v1");
    }

    #[test]
    fn commit_after_undo_truncates_redo_branch() {
        let mut history = HistoryManager::new(snap("v0"));
        history.commit("A", snap("a"));
        history.undo();
        history.commit("B", snap("b"));

        assert!(history.redo().is_none());
        assert_eq!(history.redo_depth(), 0);
        assert!(history.entries().iter().all(|e| e.snapshot.content != "a"));
    }

    #[test]
    fn eleventh_commit_evicts_oldest() {
        let mut history = HistoryManager::new(snap("v0"));
        for i in 1..=11 {
            history.commit(format!("edit {i}"), snap(&format!("v{i}")));
        }

        assert_eq!(history.undo_depth(), DEFAULT_UNDO_LIMIT);
        let mut reached = Vec::new();
        while let Some(s) = history.undo() {
            reached.push(s.content);
        }
        assert_eq!(reached.last().map(String::as_str), Some("v1"));
        assert!(!reached.iter().any(|c| c == "v0"));
    }

    #[test]
    fn rollback_pending_restores_exact_state() {
        let mut history = HistoryManager::new(snap("v0"));
        history.commit("a", snap("v1"));
        let before = history.entries().to_vec();

        let token = history.begin_pending("remote edit");
        assert!(!history.can_undo());
        assert!(history.undo().is_none());
        assert!(history.rollback_pending(token));

        assert_eq!(history.entries(), before.as_slice());
        assert_eq!(history.position(), 1);
        assert!(history.can_undo());
    }

    #[test]
    fn commit_pending_uses_reserved_prompt() {
        let mut history = HistoryManager::new(snap("v0"));
        let token = history.begin_pending("make it blue");
        let entry = history.commit_pending(token, snap("blue")).unwrap();

        assert_eq!(entry.prompt, "make it blue");
        assert_eq!(history.current_snapshot().content, "blue");
        assert!(!history.has_pending());
    }

    #[test]
    fn stale_token_is_ignored() {
        let mut history = HistoryManager::new(snap("v0"));
        let first = history.begin_pending("one");
        let _second = history.begin_pending("two");

        assert!(!history.rollback_pending(first));
        assert!(history.commit_pending(first, snap("x")).is_none());
        assert!(history.has_pending());
    }

    #[test]
    fn restore_is_labelled_commit() {
        let mut history = HistoryManager::new(snap("v0"));
        history.restore("Final draft", snap("saved"));
        assert_eq!(history.current().prompt, "Restored: Final draft");
        assert_eq!(history.undo().unwrap().content, "v0");
    }

    #[test]
    fn redo_depth_respects_redo_limit() {
        let mut history = HistoryManager::with_limits(snap("v0"), 10, 3);
        for i in 1..=6 {
            history.commit("e", snap(&format!("v{i}")));
        }
        for _ in 0..6 {
            history.undo();
        }
        assert_eq!(history.redo_depth(), 3);
        assert_eq!(history.current_snapshot().content, "v0");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Commit(u8),
        Undo,
        Redo,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<u8>().prop_map(Op::Commit),
            Just(Op::Undo),
            Just(Op::Redo),
        ]
    }

    proptest! {
        #[test]
        fn prop_visible_snapshot_matches_position(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut history = HistoryManager::new(snap("initial"));
            let mut visible = "initial".to_string();

            for op in ops {
                match op {
                    Op::Commit(n) => {
                        visible = format!("doc-{n}");
                        history.commit("edit", snap(&visible));
                    }
                    Op::Undo => {
                        if let Some(s) = history.undo() {
                            visible = s.content;
                        }
                    }
                    Op::Redo => {
                        if let Some(s) = history.redo() {
                            visible = s.content;
                        }
                    }
                }

                prop_assert_eq!(&history.entries()[history.position()].snapshot.content, &visible);
                prop_assert!(history.undo_depth() <= DEFAULT_UNDO_LIMIT);
                prop_assert!(history.redo_depth() <= DEFAULT_REDO_LIMIT);
            }
        }
    }
}
