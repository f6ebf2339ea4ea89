//! Publishing row changes onto the signal bus.

use tracing::{error, info, instrument};

use crate::changes::events::{ChangeEvent, ChangeOp};
use crate::deletion::update_search_after_deletions;
use crate::errors::SyncError;
use crate::signals::SignalBus;
use crate::sync::{delete_document_async, SearchContext};

/// Turns row changes into save and delete signals.
#[derive(Clone)]
pub struct ChangeIngest {
    ctx: SearchContext,
    bus: SignalBus,
}

impl ChangeIngest {
    pub fn new(ctx: SearchContext, bus: SignalBus) -> Self {
        Self { ctx, bus }
    }

    /// Publish `events` in order.
    ///
    /// Consecutive events of one transaction form a unit of work. A unit
    /// containing deletes runs inside a deletion scope, so its deletes reach
    /// the search engine as one bulk request per app. If that request fails
    /// the deletes are rescheduled one by one as background jobs.
    #[instrument(skip_all, fields(count = events.len()))]
    pub async fn apply(&self, events: &[ChangeEvent]) {
        for unit in events.chunk_by(ChangeEvent::same_transaction) {
            if !unit.iter().any(|event| event.op == ChangeOp::Delete) {
                self.publish(unit).await;
                continue;
            }

            let result: Result<(), SyncError> =
                update_search_after_deletions(&self.ctx, &self.bus, || async {
                    self.publish(unit).await;
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Bulk delete of changed rows failed, scheduling single deletes");
                self.schedule_deletes(unit);
            }
        }
    }

    async fn publish(&self, unit: &[ChangeEvent]) {
        for event in unit {
            self.bus.send(event.to_signal()).await;
        }
    }

    fn schedule_deletes(&self, unit: &[ChangeEvent]) {
        let deletes = unit.iter().filter(|event| event.op == ChangeOp::Delete);
        for event in deletes {
            for app in self.ctx.registry.for_model(&event.model) {
                if let Err(e) = delete_document_async(&self.ctx, &app.name, event.pk) {
                    error!(app = %app.name, pk = %event.pk, error = %e, "Failed to schedule deletion");
                }
            }
        }
        info!(count = unit.len(), "Rescheduled deletes of failed unit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{connect_default_receivers, sync_object};
    use crate::testing::{fixture, named, Fixture};
    use uuid::Uuid;

    async fn ingest() -> (Fixture, ChangeIngest) {
        let f = fixture().await;
        let bus = SignalBus::new();
        connect_default_receivers(&f.ctx, &bus);
        let ingest = ChangeIngest::new(f.ctx.clone(), bus);
        (f, ingest)
    }

    async fn indexed_company(f: &Fixture, name: &str) -> Uuid {
        let row = f.companies.upsert(Uuid::new_v4(), named(name)).await;
        sync_object(&f.ctx, "company", row.pk).await.unwrap();
        row.pk
    }

    #[tokio::test]
    async fn test_save_schedules_sync() {
        let (f, ingest) = ingest().await;
        let pk = Uuid::new_v4();

        ingest.apply(&[ChangeEvent::save("company", pk, None)]).await;

        assert_eq!(
            f.queue.scheduled_names(),
            vec![format!("sync_object:company:{}", pk)]
        );
    }

    #[tokio::test]
    async fn test_deletes_of_one_transaction_are_bulk_deleted() {
        let (f, ingest) = ingest().await;
        let acme = indexed_company(&f, "Acme").await;
        let globex = indexed_company(&f, "Globex").await;

        ingest
            .apply(&[
                ChangeEvent::delete("company", acme, Some(7)),
                ChangeEvent::delete("company", globex, Some(7)),
            ])
            .await;

        assert_eq!(f.engine.bulk_delete_calls().await, 1);
        assert!(f.queue.scheduled_names().is_empty());
        for pk in [acme, globex] {
            assert_eq!(f.engine.copies_of("test-company-read", &pk.to_string()).await, 0);
        }
    }

    #[tokio::test]
    async fn test_transactions_are_separate_units() {
        let (f, ingest) = ingest().await;
        let acme = indexed_company(&f, "Acme").await;
        let globex = indexed_company(&f, "Globex").await;
        let saved = Uuid::new_v4();

        ingest
            .apply(&[
                ChangeEvent::delete("company", acme, Some(7)),
                ChangeEvent::save("company", saved, Some(8)),
                ChangeEvent::delete("company", globex, None),
            ])
            .await;

        assert_eq!(f.engine.bulk_delete_calls().await, 2);
        assert_eq!(
            f.queue.scheduled_names(),
            vec![format!("sync_object:company:{}", saved)]
        );
    }

    #[tokio::test]
    async fn test_failed_bulk_delete_falls_back_to_jobs() {
        let (f, ingest) = ingest().await;
        let acme = indexed_company(&f, "Acme").await;
        f.engine.fail_next_bulk_calls(1).await;

        ingest.apply(&[ChangeEvent::delete("company", acme, Some(7))]).await;

        assert_eq!(
            f.queue.scheduled_names(),
            vec![format!("delete_document:company:{}", acme)]
        );
        f.queue.run_until_idle().await;
        assert_eq!(f.engine.copies_of("test-company-read", &acme.to_string()).await, 0);
    }
}
