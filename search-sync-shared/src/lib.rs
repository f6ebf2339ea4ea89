//! # Search Sync Shared
//!
//! This crate defines the data structures shared across the search
//! synchronization crates: the wire-format document written to the search
//! engine, the `(timestamp, id)` cursor used by the activity stream, and the
//! activity page envelope returned to polling consumers.

pub mod types;

pub use types::activity::{ActivityPage, ActivityRecord};
pub use types::cursor::{Cursor, CursorParseError};
pub use types::search_document::SearchDocument;
