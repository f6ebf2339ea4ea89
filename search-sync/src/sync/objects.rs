//! Object and related-object sync orchestration.
//!
//! Every sync re-reads the current row from the primary store and upserts
//! it by id, so running a sync twice, or out of order, converges on the
//! current state.

use std::sync::Arc;

use search_sync_repository::{BulkItemFailure, BulkOperation, BulkSummary, SearchIndexError};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::apps::SearchApp;
use crate::errors::SyncError;
use crate::queue::{Job, JobHandle, Priority, RetryPolicy};
use crate::store::{RelatedFilter, Row};
use crate::sync::bulk_sync::{sync_objects, DeleteFromSecondaryIndices, PostBatchCallback};
use crate::sync::context::SearchContext;

/// Sync one object now.
///
/// A row that no longer exists is logged and skipped; it was deleted after
/// the sync was requested. Both read and write indices are passed to the
/// bulk sync so that, mid-migration, the stale copy in the old index is
/// removed. A failed document upsert is returned as an error so a
/// scheduling job retries it.
#[instrument(skip(ctx), fields(app = %app_name, pk = %pk))]
pub async fn sync_object(ctx: &SearchContext, app_name: &str, pk: Uuid) -> Result<(), SyncError> {
    let app = ctx.app(app_name)?;

    let Some(row) = app.rows.fetch(pk).await? else {
        warn!("Object no longer exists, skipping sync");
        return Ok(());
    };

    let search_model = app.search_model.as_ref();
    let (read_indices, write_index) = ctx
        .index
        .get_read_and_write_indices(&search_model.read_alias(), &search_model.write_alias())
        .await?;

    let summary = sync_objects(
        &ctx.index,
        search_model,
        &[row],
        &read_indices,
        &write_index,
        Some(&DeleteFromSecondaryIndices),
    )
    .await?;

    let failures: Vec<BulkItemFailure> = summary
        .results
        .iter()
        .filter(|r| !r.is_success())
        .map(BulkItemFailure::from)
        .collect();
    if !failures.is_empty() {
        return Err(SearchIndexError::bulk_failure(BulkOperation::Upsert, failures).into());
    }
    Ok(())
}

/// Schedule `sync_object` on the job queue with the sync task retry policy.
pub fn sync_object_async(
    ctx: &SearchContext,
    app_name: &str,
    pk: Uuid,
) -> Result<JobHandle, SyncError> {
    schedule_sync_object(ctx, app_name, pk, Priority::High)
}

fn schedule_sync_object(
    ctx: &SearchContext,
    app_name: &str,
    pk: Uuid,
    priority: Priority,
) -> Result<JobHandle, SyncError> {
    // fail early for unknown apps instead of inside the job
    ctx.app(app_name)?;

    let job_ctx = ctx.clone();
    let job_app = app_name.to_string();
    let job = Job::new(format!("sync_object:{}:{}", app_name, pk), move || {
        let ctx = job_ctx.clone();
        let app_name = job_app.clone();
        async move { sync_object(&ctx, &app_name, pk).await }
    });

    let handle = ctx.queue.schedule(job, RetryPolicy::sync_task(), priority)?;
    info!(job = %handle, app = %app_name, pk = %pk, "Scheduled object sync");
    Ok(handle)
}

/// Re-index the objects related to `related`.
///
/// Looks up `relation_name` for the row's model in the relation table and
/// schedules a job that resolves the related rows (optionally filtered) and
/// schedules one low-priority `sync_object` per row, so cascading
/// re-indexes never starve direct syncs.
///
/// # Arguments
///
/// * `related` - The saved row other documents depend on
/// * `relation_name` - Name of the declared relation to traverse
/// * `filter` - Optional equality filter on the related rows
/// * `search_app_name` - App to sync the related rows into, defaults to the relation's target app
pub fn sync_related_objects_async(
    ctx: &SearchContext,
    related: &Row,
    relation_name: &str,
    filter: Option<RelatedFilter>,
    search_app_name: Option<&str>,
) -> Result<JobHandle, SyncError> {
    let relation = ctx
        .relations
        .get(&related.model, relation_name)
        .cloned()
        .ok_or_else(|| SyncError::unknown_relation(&related.model, relation_name))?;
    let target_app = search_app_name
        .map(str::to_string)
        .unwrap_or_else(|| relation.target_app.clone());
    ctx.app(&target_app)?;

    let job_ctx = ctx.clone();
    let source = related.clone();
    let filter = filter.unwrap_or_default();
    let job_app = target_app.clone();
    let job = Job::new(
        format!("sync_related_objects:{}:{}:{}", related.model, relation_name, related.pk),
        move || {
            let ctx = job_ctx.clone();
            let source = source.clone();
            let filter = filter.clone();
            let relation = relation.clone();
            let app_name = job_app.clone();
            async move {
                let pks = relation.fetcher.related_pks(&source, &filter).await?;
                info!(
                    app = %app_name,
                    count = pks.len(),
                    "Scheduling syncs of related objects"
                );
                for pk in pks {
                    schedule_sync_object(&ctx, &app_name, pk, Priority::Low)?;
                }
                Ok(())
            }
        },
    );

    ctx.queue
        .schedule(job, RetryPolicy::sync_task(), Priority::High)
}

/// Resync every row of an app into its write index.
///
/// Rows are read in primary-key order in batches of `options.batch_size`.
/// Every batch is attempted; if any document failed, a `BulkFailure` naming
/// them is returned after the last batch.
#[instrument(skip(ctx, app, callback), fields(app = %app.name))]
pub async fn sync_app(
    ctx: &SearchContext,
    app: &SearchApp,
    callback: Option<&dyn PostBatchCallback>,
) -> Result<BulkSummary, SyncError> {
    let search_model = app.search_model.as_ref();
    let (read_indices, write_index) = ctx
        .index
        .get_read_and_write_indices(&search_model.read_alias(), &search_model.write_alias())
        .await?;

    info!(write_index = %write_index, "Syncing app");

    let batch_size = ctx.options.batch_size.max(1);
    let mut total = BulkSummary::default();
    let mut after = None;
    loop {
        let rows = app.rows.fetch_batch_after(after, batch_size).await?;
        let Some(last) = rows.last() else {
            break;
        };
        after = Some(last.pk);

        let summary = sync_objects(
            &ctx.index,
            search_model,
            &rows,
            &read_indices,
            &write_index,
            callback,
        )
        .await?;
        total.merge(summary);

        if rows.len() < batch_size {
            break;
        }
    }

    info!(
        total = total.total,
        failed = total.failed,
        "App sync complete"
    );

    let failures: Vec<BulkItemFailure> = total
        .results
        .iter()
        .filter(|r| !r.is_success())
        .map(BulkItemFailure::from)
        .collect();
    if !failures.is_empty() {
        return Err(SearchIndexError::bulk_failure(BulkOperation::Upsert, failures).into());
    }
    Ok(total)
}

/// Resync several apps, or every registered app when `names` is `None`.
pub async fn sync_apps(ctx: &SearchContext, names: Option<&[String]>) -> Result<(), SyncError> {
    let apps: Vec<Arc<SearchApp>> = match names {
        Some(names) => names
            .iter()
            .map(|name| ctx.app(name))
            .collect::<Result<_, _>>()?,
        None => ctx.registry.apps().cloned().collect(),
    };

    for app in apps {
        sync_app(ctx, &app, None).await?;
    }
    Ok(())
}

/// Remove a document from the write index and every read index of an app.
///
/// A document that is already absent counts as removed.
#[instrument(skip(ctx), fields(app = %app_name, pk = %pk))]
pub async fn delete_document(ctx: &SearchContext, app_name: &str, pk: Uuid) -> Result<(), SyncError> {
    let app = ctx.app(app_name)?;
    let search_model = app.search_model.as_ref();
    let (mut indices, write_index) = ctx
        .index
        .get_read_and_write_indices(&search_model.read_alias(), &search_model.write_alias())
        .await?;
    indices.insert(write_index);

    let id = pk.to_string();
    let stubs: Vec<_> = indices
        .iter()
        .map(|index| search_model.to_stub(&id, index))
        .collect();
    ctx.index.bulk_delete_ignoring_not_found(&stubs).await?;
    Ok(())
}

/// Schedule `delete_document` on the job queue.
pub fn delete_document_async(
    ctx: &SearchContext,
    app_name: &str,
    pk: Uuid,
) -> Result<JobHandle, SyncError> {
    ctx.app(app_name)?;

    let job_ctx = ctx.clone();
    let job_app = app_name.to_string();
    let job = Job::new(format!("delete_document:{}:{}", app_name, pk), move || {
        let ctx = job_ctx.clone();
        let app_name = job_app.clone();
        async move { delete_document(&ctx, &app_name, pk).await }
    });

    ctx.queue
        .schedule(job, RetryPolicy::sync_task(), Priority::High)
}
