//! Glyph Actions - deterministic instant actions
//!
//! Common edits ("add a watermark", "add payment terms: Net 30") are satisfied
//! locally by an ordered table of idempotent transforms instead of a round trip
//! to the modification service.
//!
//! # Example
//!
//! ```rust
//! use glyph_actions::InstantActionEngine;
//!
//! let engine = InstantActionEngine::new();
//! let doc = "<html><body><p>Invoice</p></body></html>";
//!
//! let edit = engine.try_apply("Add payment terms: Net 30", doc).unwrap();
//! assert_eq!(edit.rule, "payment-terms");
//! assert!(engine.try_apply("Rewrite the intro in French", doc).is_none());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod engine;
pub mod markup;
pub mod rules;

// Re-exports for convenience
pub use engine::{InstantActionEngine, InstantEdit};
pub use rules::{InstantRule, BUILTIN_RULES};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
