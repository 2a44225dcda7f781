//! Glyph Session - the modification session engine
//!
//! Turns natural-language instructions into document edits:
//! - Decides between local instant actions and the remote service
//! - Runs remote requests with streaming, timeouts, retries and cancellation
//! - Commits results optimistically and rolls back every failure
//! - Polls post-edit validation in the background
//!
//! # Example
//!
//! ```rust,ignore
//! use glyph_session::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::new().with_api_key("sk-...");
//! let service = Arc::new(HttpModificationService::from_config(&config));
//! let initial = DocumentSnapshot::new("<html><body>...</body></html>", SessionId::new("s1"));
//!
//! let session = ModificationSession::builder(initial, service).config(config).build();
//! session.submit("Add QR code").await?;
//! session.submit("Make the header navy blue").await?;
//! session.undo()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod notice;
pub mod poller;
pub mod service;
pub mod session;
pub mod stream;
pub mod telemetry;

// Re-exports for convenience
pub use config::{HistoryConfig, RequestConfig, SessionConfig, ValidationConfig, DEFAULT_BASE_URL};
pub use coordinator::{Flight, RequestCoordinator, RequestState, RunOutcome};
pub use error::{classify, ConfigError, ErrorClass, ModifyError, ServiceError, SessionError};
pub use http::{CreateRequest, CreateResponse, HttpModificationService, TemplateSummary};
pub use notice::{Notifier, SessionNotice, ValidationNotice};
pub use poller::ValidationPoller;
pub use service::{
    EventStream, IssueSeverity, ModificationService, ModifyRequest, ModifyResponse,
    ValidationIssue, ValidationReport,
};
pub use session::{ModificationSession, SessionBuilder, SubmitOutcome};
pub use stream::{
    detect_refusal, DecodedModification, Progress, SseDecoder, StreamDecoder, StreamError,
    StreamEvent,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a session
    pub use crate::{
        ErrorClass, HttpModificationService, ModificationService, ModificationSession,
        ModifyError, SessionConfig, SessionError, SessionNotice, SubmitOutcome,
    };
    pub use glyph_history::{DocumentSnapshot, SessionId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
