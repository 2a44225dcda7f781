//! Before/after region capture for visual diffing
//!
//! Regions are named sub-sections of rendered content. Naming belongs to the
//! renderer, reached through the [`RegionSource`] capability; the tracker only
//! compares what it is given.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Region name → region content
pub type RegionMap = BTreeMap<String, String>;

/// Renderer capability that splits content into named regions
pub trait RegionSource: Send + Sync + std::fmt::Debug {
    /// Extract all named regions from `content`
    fn regions(&self, content: &str) -> RegionMap;
}

static REGION_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<[A-Za-z][^>]*?\bdata-region\s*=\s*"([^"]+)"[^>]*>"#)
        .expect("region marker pattern is valid")
});

/// Default region source keyed on `data-region="<name>"` attributes
///
/// A region runs from its marked element to the start of the next marked
/// element, or to the end of the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerRegions;

impl RegionSource for MarkerRegions {
    fn regions(&self, content: &str) -> RegionMap {
        let starts: Vec<(usize, String)> = REGION_START
            .captures_iter(content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?;
                Some((whole.start(), name.as_str().to_string()))
            })
            .collect();

        let mut regions = RegionMap::new();
        for (idx, (start, name)) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).map_or(content.len(), |(next, _)| *next);
            regions
                .entry(name.clone())
                .or_default()
                .push_str(&content[*start..end]);
        }
        regions
    }
}

/// Identifies one modification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(u64);

/// Region content captured around one attempt
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSnapshot {
    /// Attempt both halves belong to
    pub attempt: Option<AttemptId>,
    /// Regions before the change
    pub before: RegionMap,
    /// Regions after the change, `None` while the change is pending
    pub after: Option<RegionMap>,
}

/// Captures regions before and after a change
#[derive(Debug)]
pub struct DiffTracker {
    source: Box<dyn RegionSource>,
    next_attempt: u64,
    snapshot: DiffSnapshot,
    hinted: Vec<String>,
}

impl DiffTracker {
    /// Create tracker using the given region source
    #[must_use]
    pub fn new(source: Box<dyn RegionSource>) -> Self {
        Self {
            source,
            next_attempt: 0,
            snapshot: DiffSnapshot::default(),
            hinted: Vec::new(),
        }
    }

    /// Start a new attempt and capture its "before" half
    pub fn capture_before(&mut self, content: &str) -> AttemptId {
        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        self.snapshot = DiffSnapshot {
            attempt: Some(attempt),
            before: self.source.regions(content),
            after: None,
        };
        self.hinted.clear();
        attempt
    }

    /// Capture the "after" half of `attempt`
    ///
    /// Returns false and leaves an empty diff when `attempt` is not the attempt
    /// captured by the last [`capture_before`](Self::capture_before).
    pub fn capture_after(&mut self, attempt: AttemptId, content: &str) -> bool {
        if self.snapshot.attempt != Some(attempt) {
            tracing::debug!("Discarding unmatched diff capture for {:?}", attempt);
            self.clear();
            return false;
        }
        self.snapshot.after = Some(self.source.regions(content));
        true
    }

    /// Record the service's own list of touched regions
    pub fn hint(&mut self, regions: impl IntoIterator<Item = String>) {
        self.hinted = regions.into_iter().collect();
    }

    /// Regions hinted by the service for the current attempt
    #[inline]
    #[must_use]
    pub fn hinted(&self) -> &[String] {
        &self.hinted
    }

    /// Regions whose content differs, regions that disappeared, and regions
    /// the service hinted for this attempt
    #[must_use]
    pub fn changed_regions(&self) -> BTreeSet<String> {
        let Some(after) = &self.snapshot.after else {
            return BTreeSet::new();
        };

        self.snapshot
            .before
            .iter()
            .filter(|(name, before)| after.get(*name).map_or(true, |now| now != *before))
            .map(|(name, _)| name.clone())
            .chain(self.hinted.iter().cloned())
            .collect()
    }

    /// Drop any captured state
    pub fn clear(&mut self) {
        self.snapshot = DiffSnapshot::default();
        self.hinted.clear();
    }

    /// Current capture
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> &DiffSnapshot {
        &self.snapshot
    }
}

impl Default for DiffTracker {
    fn default() -> Self {
        Self::new(Box::new(MarkerRegions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BEFORE: &str = r#"<body><header data-region="header">Acme</header><table data-region="items"><tr><td>1</td></tr></table><footer data-region="footer">Thanks</footer></body>"#;

    #[test]
    fn marker_regions_split_on_attribute() {
        let regions = MarkerRegions.regions(BEFORE);
        assert_eq!(
            regions.keys().cloned().collect::<Vec<_>>(),
            vec!["footer", "header", "items"]
        );
        assert!(regions["header"].contains("Acme"));
        assert!(regions["footer"].ends_with("</body>"));
    }

    #[test]
    fn changed_regions_include_modified_and_removed() {
        let mut tracker = DiffTracker::default();
        let attempt = tracker.capture_before(BEFORE);

        let after = r#"<body><table data-region="items"><tr><td>1</td></tr></table><footer data-region="footer">Thanks again</footer></body>"#;
        assert!(tracker.capture_after(attempt, after));

        let changed = tracker.changed_regions();
        assert!(changed.contains("header"), "removed region counts as changed");
        assert!(changed.contains("footer"));
        assert!(!changed.contains("items"));
    }

    #[test]
    fn hinted_regions_join_the_computed_changes() {
        let mut tracker = DiffTracker::default();
        let attempt = tracker.capture_before(BEFORE);
        tracker.hint(vec!["items".to_string()]);

        let after = BEFORE.replace("Acme", "Acme Ltd");
        assert!(tracker.capture_after(attempt, &after));

        assert_eq!(
            tracker.changed_regions().into_iter().collect::<Vec<_>>(),
            vec!["header", "items"]
        );
        tracker.clear();
        assert!(tracker.hinted().is_empty());
    }

    #[test]
    fn pending_capture_has_no_changes() {
        let mut tracker = DiffTracker::default();
        tracker.capture_before(BEFORE);
        assert!(tracker.snapshot().after.is_none());
        assert!(tracker.changed_regions().is_empty());
    }

    #[test]
    fn unmatched_capture_after_yields_empty_diff() {
        let mut tracker = DiffTracker::default();
        let stale = tracker.capture_before(BEFORE);
        let _fresh = tracker.capture_before(BEFORE);

        assert!(!tracker.capture_after(stale, "<body></body>"));
        assert!(tracker.changed_regions().is_empty());
        assert_eq!(tracker.snapshot(), &DiffSnapshot::default());
    }

    #[test]
    fn hints_reset_per_attempt() {
        let mut tracker = DiffTracker::default();
        tracker.capture_before(BEFORE);
        tracker.hint(vec!["header".to_string()]);
        assert_eq!(tracker.hinted(), ["header".to_string()]);

        tracker.capture_before(BEFORE);
        assert!(tracker.hinted().is_empty());
    }
}
