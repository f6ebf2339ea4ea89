//! Search document types.
//!
//! This module defines the wire-format representation of one primary-store
//! row as it is written to (or deleted from) the search engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Document representation for the search index.
///
/// A document is derived deterministically from a primary-store row. It is
/// never persisted outside the search engine.
///
/// # Fields
///
/// - `id`: Explicit document id (the row's primary key)
/// - `index`: Index or alias the document is targeted at
/// - `doc_type`: Type tag of the search app the document belongs to
/// - `source`: Field name to value mapping; empty for deletion stubs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchDocument {
    pub id: String,
    pub index: String,
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub source: Map<String, Value>,
}

impl SearchDocument {
    /// Create a document carrying a full body.
    ///
    /// # Example
    ///
    /// ```
    /// use search_sync_shared::SearchDocument;
    /// use serde_json::{json, Map};
    ///
    /// let mut source = Map::new();
    /// source.insert("name".to_string(), json!("Acme"));
    /// let doc = SearchDocument::new("1", "search-company-write", "company", source);
    /// assert!(!doc.is_stub());
    /// ```
    pub fn new(
        id: impl Into<String>,
        index: impl Into<String>,
        doc_type: impl Into<String>,
        source: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            index: index.into(),
            doc_type: doc_type.into(),
            source,
        }
    }

    /// Create an id-only stub, used for deletions.
    pub fn stub(
        id: impl Into<String>,
        index: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        Self::new(id, index, doc_type, Map::new())
    }

    /// Whether this document carries no body.
    pub fn is_stub(&self) -> bool {
        self.source.is_empty()
    }

    /// Copy of this document targeted at another index.
    pub fn retarget(&self, index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..self.clone()
        }
    }
}
