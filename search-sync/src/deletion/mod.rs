//! Deletion collector.
//!
//! While a [`DeletionScope`] is open, deletes of every search app's model
//! are buffered as document stubs instead of being propagated one by one.
//! The apps' own delete receivers are disabled for the duration. When the
//! unit of work commits, the scope issues one bulk delete per app against
//! its write alias; when it rolls back, nothing is sent.
//!
//! Only one scope per [`SignalBus`] is open at a time: opening a second one
//! waits until the first is disconnected.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use search_sync_shared::SearchDocument;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, instrument};

use crate::errors::SyncError;
use crate::signals::{DisabledReceivers, Receiver, ReceiverId, Signal, SignalBus, SignalKind};
use crate::sync::SearchContext;

/// Document stubs collected during one scope, keyed by search app name.
#[derive(Debug, Clone, Default)]
pub struct DeletionBatch {
    stubs: BTreeMap<String, Vec<SearchDocument>>,
}

impl DeletionBatch {
    pub fn push(&mut self, app_name: &str, stub: SearchDocument) {
        self.stubs.entry(app_name.to_string()).or_default().push(stub);
    }

    pub fn len(&self) -> usize {
        self.stubs.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.values().all(Vec::is_empty)
    }

    pub fn apps(&self) -> impl Iterator<Item = (&str, &[SearchDocument])> {
        self.stubs
            .iter()
            .map(|(name, stubs)| (name.as_str(), stubs.as_slice()))
    }
}

fn lock(batch: &Mutex<DeletionBatch>) -> MutexGuard<'_, DeletionBatch> {
    batch.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens deletion scopes on a signal bus.
#[derive(Clone)]
pub struct DeletionCollector {
    ctx: SearchContext,
    bus: SignalBus,
}

impl DeletionCollector {
    pub fn new(ctx: SearchContext, bus: SignalBus) -> Self {
        Self { ctx, bus }
    }

    /// Start collecting.
    ///
    /// Attaches a post-delete listener per registered app and disables every
    /// pre-delete and post-delete receiver the apps declared.
    pub async fn connect(&self) -> DeletionScope {
        let gate = self.bus.acquire_collector_gate().await;
        let batch = Arc::new(Mutex::new(DeletionBatch::default()));

        let mut owned = Vec::new();
        let mut listeners = Vec::new();
        for app in self.ctx.registry.apps() {
            owned.extend(
                self.bus
                    .receivers_owned_by(&app.name, &[SignalKind::PreDelete, SignalKind::PostDelete]),
            );

            let batch = Arc::clone(&batch);
            let app_name = app.name.clone();
            let search_model = Arc::clone(&app.search_model);
            let write_alias = search_model.write_alias();
            let listener: Receiver = Arc::new(move |signal: Signal| {
                let stub = search_model.to_stub(&signal.row.pk.to_string(), &write_alias);
                lock(&batch).push(&app_name, stub);
                async {}.boxed()
            });
            listeners.push(self.bus.connect(&app.model, &[SignalKind::PostDelete], None, listener));
        }
        let disabled = self.bus.disable(owned);

        debug!(listeners = listeners.len(), "Deletion collector connected");
        DeletionScope {
            ctx: self.ctx.clone(),
            bus: self.bus.clone(),
            batch,
            listeners,
            disabled: Some(disabled),
            gate: Some(gate),
        }
    }
}

/// An open collection. Disconnects when dropped.
#[must_use = "dropping the scope discards every collected deletion"]
pub struct DeletionScope {
    ctx: SearchContext,
    bus: SignalBus,
    batch: Arc<Mutex<DeletionBatch>>,
    listeners: Vec<ReceiverId>,
    disabled: Option<DisabledReceivers>,
    gate: Option<OwnedMutexGuard<()>>,
}

impl DeletionScope {
    /// Number of stubs collected so far.
    pub fn pending(&self) -> usize {
        lock(&self.batch).len()
    }

    /// Detach the collector's listeners and restore the apps' receivers.
    ///
    /// Calling it again does nothing.
    pub fn disconnect(&mut self) {
        for id in self.listeners.drain(..) {
            self.bus.disconnect(id);
        }
        self.disabled.take();
        if self.gate.take().is_some() {
            debug!("Deletion collector disconnected");
        }
    }

    /// Disconnect, then delete every collected document from its app's
    /// write alias, one bulk request per app.
    ///
    /// Every app is attempted. Documents already absent count as deleted;
    /// the first other failure is returned once all apps were attempted.
    #[instrument(skip(self))]
    pub async fn delete_from_search(mut self) -> Result<(), SyncError> {
        self.disconnect();
        let batch = std::mem::take(&mut *lock(&self.batch));

        let mut first_error = None;
        for (app_name, stubs) in batch.apps() {
            if stubs.is_empty() {
                continue;
            }
            match self.ctx.index.bulk_delete_ignoring_not_found(stubs).await {
                Ok(summary) => {
                    info!(app = %app_name, count = summary.total, "Deleted collected documents");
                }
                Err(e) => {
                    error!(app = %app_name, error = %e, "Failed to delete collected documents");
                    first_error.get_or_insert(SyncError::from(e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Disconnect and drop the collected stubs without deleting anything.
    pub fn discard(mut self) {
        self.disconnect();
        let discarded = std::mem::take(&mut *lock(&self.batch)).len();
        if discarded > 0 {
            info!(count = discarded, "Discarded collected deletions");
        }
    }
}

impl Drop for DeletionScope {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Run a unit of work inside a deletion scope.
///
/// When `work` succeeds, its deletions are flushed to the search engine once
/// after the scope is disconnected. When it fails, the unit of work is
/// treated as rolled back: receivers are restored and no delete request is
/// issued.
///
/// # Example
///
/// ```no_run
/// # use search_sync::deletion::update_search_after_deletions;
/// # use search_sync::signals::{Signal, SignalBus};
/// # use search_sync::store::Row;
/// # use search_sync::sync::SearchContext;
/// # use search_sync::SyncError;
/// # async fn example(ctx: SearchContext, bus: SignalBus, row: Row) -> Result<(), SyncError> {
/// update_search_after_deletions(&ctx, &bus, || async {
///     bus.send(Signal::post_delete(row)).await;
///     Ok::<_, SyncError>(())
/// })
/// .await
/// # }
/// ```
pub async fn update_search_after_deletions<F, Fut, T, E>(
    ctx: &SearchContext,
    bus: &SignalBus,
    work: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SyncError>,
{
    let scope = DeletionCollector::new(ctx.clone(), bus.clone()).connect().await;
    match work().await {
        Ok(value) => {
            scope.delete_from_search().await?;
            Ok(value)
        }
        Err(e) => {
            scope.discard();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::connect_default_receivers;
    use crate::apps::SearchModel;
    use crate::testing::{company_model, contact_model, fixture, named};
    use search_sync_repository::SearchIndexError;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_scope_deletes_collected_documents_in_one_request() {
        let f = fixture().await;
        let bus = SignalBus::new();
        let mut rows = Vec::new();
        for name in ["Acme", "Globex"] {
            let row = f.companies.upsert(Uuid::new_v4(), named(name)).await;
            crate::sync::sync_object(&f.ctx, "company", row.pk).await.unwrap();
            rows.push(row);
        }

        let scope = DeletionCollector::new(f.ctx.clone(), bus.clone()).connect().await;
        for row in &rows {
            f.companies.remove(row.pk).await;
            bus.send(Signal::post_delete(row.clone())).await;
        }
        assert_eq!(scope.pending(), 2);
        scope.delete_from_search().await.unwrap();

        assert!(f.engine
            .document_ids(&company_model().target_index_name())
            .await
            .is_empty());
        assert_eq!(f.engine.bulk_delete_calls().await, 1);
    }

    #[tokio::test]
    async fn test_app_receivers_are_disabled_while_collecting() {
        let f = fixture().await;
        let bus = SignalBus::new();
        connect_default_receivers(&f.ctx, &bus);
        let row = f.companies.upsert(Uuid::new_v4(), named("Acme")).await;

        let scope = DeletionCollector::new(f.ctx.clone(), bus.clone()).connect().await;
        bus.send(Signal::post_delete(row.clone())).await;
        scope.discard();

        assert!(f.queue.scheduled_names().is_empty());

        bus.send(Signal::post_delete(row.clone())).await;
        assert_eq!(
            f.queue.scheduled_names(),
            vec![format!("delete_document:company:{}", row.pk)]
        );
    }

    #[tokio::test]
    async fn test_failed_work_issues_no_delete() {
        let f = fixture().await;
        let bus = SignalBus::new();
        let row = f.companies.upsert(Uuid::new_v4(), named("Acme")).await;
        crate::sync::sync_object(&f.ctx, "company", row.pk).await.unwrap();

        let result: Result<(), SyncError> = update_search_after_deletions(&f.ctx, &bus, || async {
            bus.send(Signal::post_delete(row.clone())).await;
            Err(SyncError::config("rolled back"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(f.engine.bulk_delete_calls().await, 0);
        assert_eq!(f.engine.copies_of("test-company-read", &row.pk.to_string()).await, 1);
    }

    #[tokio::test]
    async fn test_missing_documents_count_as_deleted() {
        let f = fixture().await;
        let bus = SignalBus::new();
        let row = f.companies.upsert(Uuid::new_v4(), named("Never indexed")).await;

        let result: Result<(), SyncError> = update_search_after_deletions(&f.ctx, &bus, || async {
            bus.send(Signal::post_delete(row.clone())).await;
            Ok(())
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_non_404_failure_is_raised_after_all_apps_attempted() {
        let f = fixture().await;
        let bus = SignalBus::new();
        let company = f.companies.upsert(Uuid::new_v4(), named("Acme")).await;
        let contact = f.contacts.upsert(Uuid::new_v4(), named("Jane")).await;
        crate::sync::sync_object(&f.ctx, "company", company.pk).await.unwrap();
        crate::sync::sync_object(&f.ctx, "contact", contact.pk).await.unwrap();
        f.engine
            .fail_document(&company.pk.to_string(), 500, "shard failure")
            .await;

        let result: Result<(), SyncError> = update_search_after_deletions(&f.ctx, &bus, || async {
            bus.send(Signal::post_delete(company.clone())).await;
            bus.send(Signal::post_delete(contact.clone())).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(SyncError::SearchIndex(SearchIndexError::BulkFailure { .. }))
        ));
        assert!(f.engine
            .document_ids(&contact_model().target_index_name())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_dropped_scope_restores_receivers() {
        let f = fixture().await;
        let bus = SignalBus::new();
        let ids = connect_default_receivers(&f.ctx, &bus);

        {
            let _scope = DeletionCollector::new(f.ctx.clone(), bus.clone()).connect().await;
            assert!(ids.iter().any(|id| !bus.is_enabled(*id)));
        }

        assert!(ids.iter().all(|id| bus.is_enabled(*id)));
        // a second scope can be opened once the first is gone
        let scope = DeletionCollector::new(f.ctx.clone(), bus.clone()).connect().await;
        scope.discard();
    }
}
