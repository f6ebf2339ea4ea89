//! Search engine trait definition.
//!
//! This module defines the abstract interface for search engine operations,
//! allowing for different backend implementations (OpenSearch, in-memory, etc.).

use std::collections::BTreeSet;

use async_trait::async_trait;
use search_sync_shared::SearchDocument;
use serde_json::Value;

use crate::errors::SearchIndexError;
use crate::types::{AliasAction, BulkSummary, SortedRangeQuery};

/// Abstracts the underlying search engine (OpenSearch, Elasticsearch, in-memory).
///
/// Implementations are injected into `SearchIndexService` to enable dependency
/// injection and testing with in-memory implementations.
///
/// # Note on Document Creation
///
/// There is no separate create operation. `bulk_upsert` creates a document
/// if it doesn't exist and replaces it if it does, so callers never need to
/// know whether a document is already indexed.
///
/// # Aliases
///
/// `index` arguments of document operations may name either a concrete index
/// or an alias resolving to exactly one index.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Check whether a concrete index exists.
    async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError>;

    /// Create an index with the given settings and mappings body.
    async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchIndexError>;

    /// Delete an index. Deleting a missing index returns `IndexNotFound`.
    async fn delete_index(&self, index: &str) -> Result<(), SearchIndexError>;

    /// Indices an alias currently points at (empty if the alias does not exist).
    async fn get_indices_for_alias(&self, alias: &str)
        -> Result<BTreeSet<String>, SearchIndexError>;

    /// Aliases currently pointing at an index (empty if there are none).
    async fn get_aliases_for_index(&self, index: &str)
        -> Result<BTreeSet<String>, SearchIndexError>;

    /// Apply all alias actions atomically.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), SearchIndexError>;

    /// Create-or-replace documents by id in a single bulk request.
    ///
    /// Each document is written to its own `index`. Per-item failures are
    /// reported in the summary; a request-level failure is returned as an error.
    async fn bulk_upsert(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError>;

    /// Delete documents by id in a single bulk request.
    ///
    /// Missing documents are reported as 404 items, not as an error.
    async fn bulk_delete(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError>;

    /// Run a range-filtered query sorted by `(timestamp, id)` ascending.
    async fn search_sorted_range(
        &self,
        index: &str,
        query: &SortedRangeQuery,
    ) -> Result<Vec<SearchDocument>, SearchIndexError>;
}
