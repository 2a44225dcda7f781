//! Glyph History - document state and its timeline
//!
//! Owns everything about "what the document is and was":
//! - `DocumentSnapshot` and `HistoryEntry` values
//! - `HistoryManager`: bounded undo/redo timeline with optimistic commits
//! - `DiffTracker`: before/after region capture for visual diffs
//! - `SavedVersions`: user-named versions independent of the timeline
//! - `Storage`: capability-checked durable key/value store
//!
//! # Example
//!
//! ```rust
//! use glyph_history::{DocumentSnapshot, HistoryManager, SessionId};
//!
//! let initial = DocumentSnapshot::new("<p>draft</p>", SessionId::new("s1"));
//! let mut history = HistoryManager::new(initial.clone());
//!
//! history.commit("Make it final", initial.with_content("<p>final</p>"));
//! assert_eq!(history.undo().unwrap().content, "<p>draft</p>");
//! assert_eq!(history.redo().unwrap().content, "<p>final</p>");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod diff;
pub mod error;
pub mod history;
pub mod recent;
pub mod snapshot;
pub mod storage;
pub mod versions;

// Re-exports for convenience
pub use diff::{AttemptId, DiffSnapshot, DiffTracker, MarkerRegions, RegionMap, RegionSource};
pub use error::{StorageError, VersionError};
pub use history::{HistoryManager, PendingToken, DEFAULT_REDO_LIMIT, DEFAULT_UNDO_LIMIT};
pub use recent::{RecentAction, RecentActions};
pub use snapshot::{DocumentSnapshot, EntryId, HistoryEntry, SessionId, TemplateId};
pub use storage::{FileStore, KeyValueStore, MemoryStore, Storage};
pub use versions::{SavedVersion, SavedVersions, DEFAULT_VERSION_LIMIT};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
