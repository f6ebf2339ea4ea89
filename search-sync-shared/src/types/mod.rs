//! This module defines the core data structures used across the search sync crates.
//! It re-exports specific types like `SearchDocument` and `Cursor`.

pub mod activity;
pub mod cursor;
pub mod search_document;

pub use activity::{ActivityPage, ActivityRecord};
pub use cursor::{Cursor, CursorParseError};
pub use search_document::SearchDocument;
