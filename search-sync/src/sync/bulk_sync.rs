//! Bulk sync engine.
//!
//! Writes batches of live rows to an app's write index and, after each
//! batch, lets a callback act on the other read indices.

use std::collections::BTreeSet;

use async_trait::async_trait;
use search_sync_repository::{BulkSummary, SearchIndexService};
use search_sync_shared::SearchDocument;
use tracing::{debug, error, instrument};

use crate::apps::SearchModel;
use crate::errors::SyncError;
use crate::store::Row;

/// Hook run after every successfully sent batch.
#[async_trait]
pub trait PostBatchCallback: Send + Sync {
    /// # Arguments
    ///
    /// * `index` - The index service the batch was sent through
    /// * `search_model` - Adapter of the synced app
    /// * `summary` - Per-item results of the batch
    /// * `other_read_indices` - Read indices of the app, excluding the write index
    async fn after_batch(
        &self,
        index: &SearchIndexService,
        search_model: &dyn SearchModel,
        summary: &BulkSummary,
        other_read_indices: &BTreeSet<String>,
    ) -> Result<(), SyncError>;
}

/// Deletes stale copies of just-synced documents from the other read indices.
///
/// Used while a migration is in flight so a document is never readable from
/// both the old and the new index for longer than one batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteFromSecondaryIndices;

#[async_trait]
impl PostBatchCallback for DeleteFromSecondaryIndices {
    async fn after_batch(
        &self,
        index: &SearchIndexService,
        search_model: &dyn SearchModel,
        summary: &BulkSummary,
        other_read_indices: &BTreeSet<String>,
    ) -> Result<(), SyncError> {
        let ids: Vec<&str> = summary.succeeded_ids().collect();
        if ids.is_empty() {
            return Ok(());
        }

        for secondary in other_read_indices {
            let stubs: Vec<SearchDocument> = ids
                .iter()
                .map(|id| search_model.to_stub(id, secondary))
                .collect();
            index.bulk_delete_ignoring_not_found(&stubs).await?;
            debug!(
                index = %secondary,
                count = stubs.len(),
                "Removed stale copies from secondary index"
            );
        }
        Ok(())
    }
}

/// Sync rows to the write index with one bulk upsert.
///
/// Per-item failures are logged and returned in the summary without
/// aborting the batch. A transport failure propagates. The callback runs
/// only when the upsert request itself succeeded.
///
/// # Arguments
///
/// * `index` - The index service
/// * `search_model` - Adapter converting rows into documents
/// * `rows` - Live rows, already fetched
/// * `read_indices` - Indices currently behind the read alias
/// * `write_index` - The single write index
/// * `callback` - Optional post-batch hook
#[instrument(skip_all, fields(doc_type = search_model.doc_type(), rows = rows.len(), write_index = %write_index))]
pub async fn sync_objects(
    index: &SearchIndexService,
    search_model: &dyn SearchModel,
    rows: &[Row],
    read_indices: &BTreeSet<String>,
    write_index: &str,
    callback: Option<&dyn PostBatchCallback>,
) -> Result<BulkSummary, SyncError> {
    if rows.is_empty() {
        return Ok(BulkSummary::default());
    }

    let documents: Vec<SearchDocument> = rows
        .iter()
        .map(|row| search_model.to_document(row, write_index))
        .collect();

    let summary = index.bulk_upsert(&documents).await?;

    for result in summary.results.iter().filter(|r| !r.is_success()) {
        error!(
            id = %result.id,
            index = %result.index,
            status = result.status,
            reason = result.error.as_deref().unwrap_or_default(),
            "Failed to sync document"
        );
    }

    if let Some(callback) = callback {
        let other_read_indices: BTreeSet<String> = read_indices
            .iter()
            .filter(|name| name.as_str() != write_index)
            .cloned()
            .collect();
        callback
            .after_batch(index, search_model, &summary, &other_read_indices)
            .await?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{DeclaredSearchModel, FieldSpec, FieldType};
    use search_sync_repository::{AliasAction, InMemorySearchEngine, IndexNaming, SearchEngine};
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    fn model() -> DeclaredSearchModel {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldSpec::new(FieldType::Text));
        DeclaredSearchModel::new("company", IndexNaming::new("search"), fields)
    }

    fn rows(count: usize) -> Vec<Row> {
        (0..count)
            .map(|i| {
                let mut fields = Map::new();
                fields.insert("name".to_string(), json!(format!("Company {}", i)));
                Row::new("company", Uuid::new_v4(), fields)
            })
            .collect()
    }

    async fn engine() -> Arc<InMemorySearchEngine> {
        let engine = Arc::new(InMemorySearchEngine::new());
        engine.create_index("old", &json!({})).await.unwrap();
        engine.create_index("new", &json!({})).await.unwrap();
        engine
            .update_aliases(&[
                AliasAction::add("old", "search-company-read"),
                AliasAction::add("new", "search-company-read"),
                AliasAction::add("new", "search-company-write"),
            ])
            .await
            .unwrap();
        engine
    }

    #[derive(Default)]
    struct RecordingCallback {
        calls: Mutex<Vec<BTreeSet<String>>>,
    }

    #[async_trait]
    impl PostBatchCallback for RecordingCallback {
        async fn after_batch(
            &self,
            _index: &SearchIndexService,
            _search_model: &dyn SearchModel,
            _summary: &BulkSummary,
            other_read_indices: &BTreeSet<String>,
        ) -> Result<(), SyncError> {
            self.calls.lock().await.push(other_read_indices.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_callback_receives_read_indices_without_write_index() {
        let engine = engine().await;
        let service = SearchIndexService::new(engine.clone());
        let callback = RecordingCallback::default();
        let read = BTreeSet::from(["old".to_string(), "new".to_string()]);

        let summary = sync_objects(&service, &model(), &rows(3), &read, "new", Some(&callback))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(engine.document_ids("new").await.len(), 3);
        assert_eq!(
            *callback.calls.lock().await,
            vec![BTreeSet::from(["old".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_delete_from_secondary_indices_removes_stale_copies() {
        let engine = engine().await;
        let service = SearchIndexService::new(engine.clone());
        let rows = rows(2);
        let stale: Vec<SearchDocument> = rows
            .iter()
            .map(|row| model().to_document(row, "old"))
            .collect();
        engine.bulk_upsert(&stale).await.unwrap();
        let read = BTreeSet::from(["old".to_string(), "new".to_string()]);

        sync_objects(
            &service,
            &model(),
            &rows,
            &read,
            "new",
            Some(&DeleteFromSecondaryIndices),
        )
        .await
        .unwrap();

        assert!(engine.document_ids("old").await.is_empty());
        for row in &rows {
            assert_eq!(engine.copies_of("search-company-read", &row.pk.to_string()).await, 1);
        }
    }

    #[tokio::test]
    async fn test_failed_items_keep_their_old_copy() {
        let engine = engine().await;
        let service = SearchIndexService::new(engine.clone());
        let rows = rows(2);
        let failing = rows[0].pk.to_string();
        let stale: Vec<SearchDocument> = rows
            .iter()
            .map(|row| model().to_document(row, "old"))
            .collect();
        engine.bulk_upsert(&stale).await.unwrap();
        engine.fail_document(&failing, 500, "mapping conflict").await;
        let read = BTreeSet::from(["old".to_string(), "new".to_string()]);

        let summary = sync_objects(
            &service,
            &model(),
            &rows,
            &read,
            "new",
            Some(&DeleteFromSecondaryIndices),
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(engine.document_ids("old").await, BTreeSet::from([failing]));
    }

    #[tokio::test]
    async fn test_transport_failure_skips_callback() {
        let engine = engine().await;
        engine.fail_next_bulk_calls(1).await;
        let service = SearchIndexService::new(engine.clone());
        let callback = RecordingCallback::default();

        let result = sync_objects(
            &service,
            &model(),
            &rows(1),
            &BTreeSet::new(),
            "new",
            Some(&callback),
        )
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert!(callback.calls.lock().await.is_empty());
    }
}
