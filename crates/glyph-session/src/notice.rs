//! Advisory notices for the UI layer
//!
//! Notices are fire-and-forget: a session with no subscribers behaves the same
//! as one with many.

use crate::error::ErrorClass;
use crate::service::ValidationReport;
use glyph_history::SessionId;
use std::time::Duration;
use tokio::sync::broadcast;

/// Buffered notices per subscriber before the oldest are dropped
pub const NOTICE_CAPACITY: usize = 64;

/// Something the user may want to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Remote generation began
    Started {
        /// Model serving the request
        model: Option<String>,
    },
    /// Output is arriving
    Progress {
        /// Characters received so far
        chars: usize,
    },
    /// The request is taking unusually long
    SlowResponse {
        /// Time since the attempt started
        elapsed: Duration,
    },
    /// An automatic retry is scheduled
    RetryScheduled {
        /// Retry number, starting at 1
        attempt: u32,
        /// Backoff before the retry
        delay: Duration,
        /// Class of the failure being retried
        class: ErrorClass,
    },
    /// The server-side session was renewed
    SessionRefreshed {
        /// New session
        session_id: SessionId,
    },
    /// The user cancelled the request
    Cancelled,
    /// Non-fatal problem, e.g. a refused edit
    Warning {
        /// Text to show
        message: String,
    },
    /// The instruction failed for good
    Failed {
        /// Failure class
        class: ErrorClass,
        /// Text to show
        message: String,
        /// Instant actions to offer instead
        suggestions: Vec<String>,
    },
    /// Validation outcome
    Validation(ValidationNotice),
    /// First successful edit in this installation
    FirstSuccess,
    /// Persistence was lost
    StorageDegraded {
        /// Text to show
        message: String,
    },
}

/// Validation poller outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationNotice {
    /// Critical issues were found
    IssuesFound(ValidationReport),
    /// No critical issues
    Passed {
        /// Warnings still present
        warnings: u32,
    },
    /// Validation did not finish in time
    StillVerifying,
}

/// Sending half shared by the session's components
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionNotice>,
}

impl Notifier {
    /// Create notifier
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    /// Publish a notice
    pub fn send(&self, notice: SessionNotice) {
        // No subscribers is fine
        let _ = self.tx.send(notice);
    }

    /// New receiver seeing notices sent from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
