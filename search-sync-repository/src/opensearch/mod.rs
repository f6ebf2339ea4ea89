//! OpenSearch implementation of the search engine.
//!
//! This module provides a concrete implementation of `SearchEngine`
//! using OpenSearch as the backend.

mod provider;

pub use provider::{OpenSearchProvider, DOCUMENT_TYPE_FIELD};
