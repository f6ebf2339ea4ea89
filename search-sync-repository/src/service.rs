//! Search index service implementation.
//!
//! This module provides the main service for interacting with the search engine.
//! Application code uses this to upsert and delete documents and to manage the
//! aliases that route reads and writes to concrete indices.
//!
//! # Note on Document Creation
//!
//! There is no separate `create` function. `bulk_upsert` creates a document if
//! it doesn't exist and replaces it if it does, so callers never need to know
//! whether a document is already indexed.

use std::collections::BTreeSet;
use std::sync::Arc;

use search_sync_shared::SearchDocument;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SearchIndexServiceConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::SearchEngine;
use crate::types::{AliasAction, BulkOperation, BulkSummary, SortedRangeQuery};

/// The main service for interacting with the search engine.
///
/// This is the high-level API that application code should use. It splits
/// large collections into bulk chunks, turns non-404 delete failures into an
/// explicit error and resolves read/write aliases. All operations return
/// `SearchIndexError` for consistent error handling.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use search_sync_repository::{OpenSearchProvider, SearchIndexService};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = OpenSearchProvider::new("http://localhost:9200").await?;
/// let service = SearchIndexService::new(Arc::new(provider));
///
/// let (read_indices, write_index) = service
///     .get_read_and_write_indices("search-company-read", "search-company-write")
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SearchIndexService {
    engine: Arc<dyn SearchEngine>,
    config: SearchIndexServiceConfig,
}

impl SearchIndexService {
    /// Create a new SearchIndexService with default configuration.
    ///
    /// # Arguments
    ///
    /// * `engine` - An implementation of `SearchEngine` (e.g., `OpenSearchProvider`)
    pub fn new(engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            engine,
            config: SearchIndexServiceConfig::default(),
        }
    }

    /// Create a new SearchIndexService with custom configuration.
    ///
    /// # Arguments
    ///
    /// * `engine` - An implementation of `SearchEngine`
    /// * `config` - Custom configuration for the service
    pub fn with_config(engine: Arc<dyn SearchEngine>, config: SearchIndexServiceConfig) -> Self {
        Self { engine, config }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    fn validate_name(field_name: &str, value: &str) -> Result<(), SearchIndexError> {
        if value.trim().is_empty() {
            return Err(SearchIndexError::validation(format!(
                "{} is required",
                field_name
            )));
        }
        Ok(())
    }

    /// Upsert documents, split into chunks of `bulk_chunk_size`.
    ///
    /// Per-item failures are reported in the returned summary and do not
    /// abort the remaining chunks. A transport failure of any chunk aborts
    /// and propagates.
    ///
    /// # Returns
    ///
    /// * `Ok(BulkSummary)` - Merged per-item results of every chunk
    /// * `Err(SearchIndexError)` - If a chunk could not be sent
    pub async fn bulk_upsert(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        let mut summary = BulkSummary::default();
        for chunk in documents.chunks(self.config.bulk_chunk_size) {
            summary.merge(self.engine.bulk_upsert(chunk).await?);
        }

        if summary.failed > 0 {
            warn!(
                total = summary.total,
                failed = summary.failed,
                "Bulk upsert completed with item failures"
            );
        } else {
            debug!(total = summary.total, "Bulk upsert completed");
        }
        Ok(summary)
    }

    /// Delete documents, treating documents that are already absent as deleted.
    ///
    /// Every chunk is attempted before failures are evaluated, so one bad item
    /// never prevents the rest of the batch from being deleted.
    ///
    /// # Returns
    ///
    /// * `Ok(BulkSummary)` - If every item was deleted or was already absent
    /// * `Err(SearchIndexError::BulkFailure)` - Naming every item that failed with a non-404 status
    /// * `Err(SearchIndexError)` - If a chunk could not be sent
    pub async fn bulk_delete_ignoring_not_found(
        &self,
        documents: &[SearchDocument],
    ) -> Result<BulkSummary, SearchIndexError> {
        let mut summary = BulkSummary::default();
        for chunk in documents.chunks(self.config.bulk_chunk_size) {
            summary.merge(self.engine.bulk_delete(chunk).await?);
        }

        let failures = summary.non_404_failures();
        if !failures.is_empty() {
            return Err(SearchIndexError::bulk_failure(
                BulkOperation::Delete,
                failures,
            ));
        }

        debug!(total = summary.total, "Bulk delete completed");
        Ok(summary)
    }

    /// Create an index with the given creation body.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<(), SearchIndexError> {
        Self::validate_name("index", index)?;
        self.engine.create_index(index, body).await
    }

    /// Delete an index.
    pub async fn delete_index(&self, index: &str) -> Result<(), SearchIndexError> {
        Self::validate_name("index", index)?;
        self.engine.delete_index(index).await
    }

    /// Check whether an index exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool, SearchIndexError> {
        self.engine.index_exists(index).await
    }

    /// Indices an alias currently points at.
    pub async fn get_indices_for_alias(
        &self,
        alias: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        Self::validate_name("alias", alias)?;
        self.engine.get_indices_for_alias(alias).await
    }

    /// Aliases currently pointing at an index.
    pub async fn get_aliases_for_index(
        &self,
        index: &str,
    ) -> Result<BTreeSet<String>, SearchIndexError> {
        Self::validate_name("index", index)?;
        self.engine.get_aliases_for_index(index).await
    }

    /// Resolve the read indices and the single write index of an app.
    ///
    /// # Returns
    ///
    /// * `Ok((read_indices, write_index))` - The read alias targets and the write alias target
    /// * `Err(SearchIndexError::AliasError)` - If the write alias does not resolve to exactly one index
    pub async fn get_read_and_write_indices(
        &self,
        read_alias: &str,
        write_alias: &str,
    ) -> Result<(BTreeSet<String>, String), SearchIndexError> {
        let read_indices = self.get_indices_for_alias(read_alias).await?;
        let write_indices = self.get_indices_for_alias(write_alias).await?;

        let mut write_iter = write_indices.into_iter();
        match (write_iter.next(), write_iter.next()) {
            (Some(write_index), None) => Ok((read_indices, write_index)),
            (None, _) => Err(SearchIndexError::alias(format!(
                "write alias {} does not point at any index",
                write_alias
            ))),
            (Some(_), Some(_)) => Err(SearchIndexError::alias(format!(
                "write alias {} points at more than one index",
                write_alias
            ))),
        }
    }

    /// Documents after a `(timestamp, id)` position, in ascending order.
    pub async fn search_sorted_range(
        &self,
        index: &str,
        query: &SortedRangeQuery,
    ) -> Result<Vec<SearchDocument>, SearchIndexError> {
        Self::validate_name("index", index)?;
        if query.size == 0 {
            return Ok(Vec::new());
        }
        self.engine.search_sorted_range(index, query).await
    }

    /// Start an atomic alias update.
    pub fn alias_transaction(&self) -> AliasTransaction<'_> {
        AliasTransaction {
            service: self,
            actions: Vec::new(),
        }
    }
}

/// Collects alias changes and applies them in one atomic update.
///
/// # Example
///
/// ```no_run
/// # use search_sync_repository::SearchIndexService;
/// # async fn example(service: &SearchIndexService) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = service.alias_transaction();
/// tx.associate(["search-company-new"], "search-company-read")
///     .dissociate(["search-company-old"], "search-company-read");
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct AliasTransaction<'a> {
    service: &'a SearchIndexService,
    actions: Vec<AliasAction>,
}

impl AliasTransaction<'_> {
    /// Point `alias` at each of `indices`.
    pub fn associate<I, S>(&mut self, indices: I, alias: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions
            .extend(indices.into_iter().map(|index| AliasAction::add(index, alias)));
        self
    }

    /// Remove `alias` from each of `indices`.
    pub fn dissociate<I, S>(&mut self, indices: I, alias: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions
            .extend(indices.into_iter().map(|index| AliasAction::remove(index, alias)));
        self
    }

    pub fn actions(&self) -> &[AliasAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Apply every collected action in a single alias update.
    ///
    /// Committing an empty transaction does nothing.
    pub async fn commit(self) -> Result<(), SearchIndexError> {
        if self.actions.is_empty() {
            return Ok(());
        }
        debug!(action_count = self.actions.len(), "Committing alias transaction");
        self.service.engine.update_aliases(&self.actions).await
    }
}
