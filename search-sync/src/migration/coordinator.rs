//! Online index migration.
//!
//! A migration moves an app from the index named after its old mapping hash
//! to a new index named after the target hash, without a window where the
//! app is unreadable:
//!
//! 1. `migrate_app` creates the target index, adds it to the read alias and
//!    moves the write alias onto it, in one alias update.
//! 2. A background `complete_migration` job resyncs every row into the
//!    target index, deleting each synced document's stale copy from the old
//!    indices as it goes.
//! 3. The old indices are then removed from the read alias and deleted once
//!    no alias references them.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::apps::SearchApp;
use crate::errors::SyncError;
use crate::migration::lock::AdvisoryLock;
use crate::queue::{Job, JobHandle, Priority, RetryPolicy};
use crate::sync::{sync_app, DeleteFromSecondaryIndices, SearchContext};

/// Result of one `resync_after_migrate` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Another worker holds the app's migration lock.
    LockContended,
    /// The running code targets a different mapping than the job was scheduled for.
    StaleTarget,
    /// Rows were resynced; the read alias already had a single index.
    ResyncedOnly,
    /// Rows were resynced and the read alias now points only at the write index.
    Migrated {
        dissociated: BTreeSet<String>,
        deleted: BTreeSet<String>,
    },
}

/// Creates, migrates and retires the indices of search apps.
#[derive(Clone)]
pub struct MigrationCoordinator {
    ctx: SearchContext,
    lock: Arc<dyn AdvisoryLock>,
}

impl MigrationCoordinator {
    pub fn new(ctx: SearchContext, lock: Arc<dyn AdvisoryLock>) -> Self {
        Self { ctx, lock }
    }

    /// Create an app's first index when neither of its aliases exists.
    ///
    /// The target index is created, both aliases are pointed at it and a full
    /// resync is scheduled.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The index was initialised
    /// * `Ok(false)` - The app already had indices
    #[instrument(skip(self, app), fields(app = %app.name))]
    pub async fn init_app(&self, app: &SearchApp) -> Result<bool, SyncError> {
        let search_model = app.search_model.as_ref();
        let read_alias = search_model.read_alias();
        let write_alias = search_model.write_alias();
        let read = self.ctx.index.get_indices_for_alias(&read_alias).await?;
        let write = self.ctx.index.get_indices_for_alias(&write_alias).await?;

        match (read.is_empty(), write.is_empty()) {
            (true, true) => {}
            (false, false) => return Ok(false),
            _ => {
                return Err(SyncError::migration_inconsistency(format!(
                    "only one of {} and {} exists",
                    read_alias, write_alias
                )));
            }
        }

        let target = search_model.target_index_name();
        if !self.ctx.index.index_exists(&target).await? {
            self.ctx
                .index
                .create_index(&target, &search_model.index_body())
                .await?;
        }
        let mut tx = self.ctx.index.alias_transaction();
        tx.associate([target.as_str()], &read_alias)
            .associate([target.as_str()], &write_alias);
        tx.commit().await?;
        info!(index = %target, "Initialised search index");

        self.schedule_sync_app(&app.name)?;
        Ok(true)
    }

    /// Start, or continue, the migration of an app whose write index does not
    /// carry the target mapping hash.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(JobHandle))` - Handle of the scheduled `complete_migration` job
    /// * `Ok(None)` - The app is up to date
    #[instrument(skip(self, app), fields(app = %app.name))]
    pub async fn migrate_app(&self, app: &SearchApp) -> Result<Option<JobHandle>, SyncError> {
        let search_model = app.search_model.as_ref();
        let (read, write) = self
            .ctx
            .index
            .get_read_and_write_indices(&search_model.read_alias(), &search_model.write_alias())
            .await?;
        let target_hash = search_model.target_mapping_hash();
        let started = search_model.mapping_hash_of(&write).as_deref() == Some(target_hash.as_str());

        if started && read.len() == 1 && read.contains(&write) {
            info!(index = %write, "Search index is up to date");
            return Ok(None);
        }

        if started {
            info!(write_index = %write, "Migration already in progress");
        } else {
            self.start_migration(app, &read, &write).await?;
        }

        self.schedule_complete_migration(&app.name, &target_hash)
            .map(Some)
    }

    /// Run `init_app` and `migrate_app` for several apps, or every registered
    /// app when `names` is `None`.
    pub async fn migrate_apps(&self, names: Option<&[String]>) -> Result<(), SyncError> {
        let apps: Vec<Arc<SearchApp>> = match names {
            Some(names) => names
                .iter()
                .map(|name| self.ctx.app(name))
                .collect::<Result<_, _>>()?,
            None => self.ctx.registry.apps().cloned().collect(),
        };

        for app in apps {
            if self.init_app(&app).await? {
                continue;
            }
            self.migrate_app(&app).await?;
        }
        Ok(())
    }

    async fn start_migration(
        &self,
        app: &SearchApp,
        read: &BTreeSet<String>,
        write: &str,
    ) -> Result<(), SyncError> {
        let search_model = app.search_model.as_ref();
        let target = search_model.target_index_name();

        if !self.ctx.index.index_exists(&target).await? {
            self.ctx
                .index
                .create_index(&target, &search_model.index_body())
                .await?;
        }

        let mut tx = self.ctx.index.alias_transaction();
        if !read.contains(&target) {
            tx.associate([target.as_str()], &search_model.read_alias());
        }
        tx.dissociate([write], &search_model.write_alias())
            .associate([target.as_str()], &search_model.write_alias());
        tx.commit().await?;

        info!(old_index = %write, new_index = %target, "Started migration");
        Ok(())
    }

    fn schedule_sync_app(&self, app_name: &str) -> Result<JobHandle, SyncError> {
        let ctx = self.ctx.clone();
        let job_app = app_name.to_string();
        let job = Job::new(format!("sync_app:{}", app_name), move || {
            let ctx = ctx.clone();
            let app_name = job_app.clone();
            async move {
                let app = ctx.app(&app_name)?;
                sync_app(&ctx, &app, None).await.map(|_| ())
            }
        });
        self.ctx
            .queue
            .schedule(job, RetryPolicy::sync_task(), Priority::High)
    }

    fn schedule_complete_migration(
        &self,
        app_name: &str,
        target_hash: &str,
    ) -> Result<JobHandle, SyncError> {
        let coordinator = self.clone();
        let job_app = app_name.to_string();
        let job_hash = target_hash.to_string();
        let job = Job::new(
            format!("complete_migration:{}:{}", app_name, target_hash),
            move || {
                let coordinator = coordinator.clone();
                let app_name = job_app.clone();
                let target_hash = job_hash.clone();
                async move {
                    coordinator
                        .complete_migration(&app_name, &target_hash)
                        .await
                        .map(|_| ())
                }
            },
        );

        let handle = self
            .ctx
            .queue
            .schedule(job, RetryPolicy::sync_task(), Priority::High)?;
        info!(job = %handle, app = %app_name, "Scheduled migration completion");
        Ok(handle)
    }

    /// Finish a migration scheduled for `target_hash`.
    ///
    /// Skipped when the running code declares a different mapping, which
    /// happens when a newer deployment already scheduled its own migration.
    pub async fn complete_migration(
        &self,
        app_name: &str,
        target_hash: &str,
    ) -> Result<MigrationOutcome, SyncError> {
        let app = self.ctx.app(app_name)?;
        let current_target = app.search_model.target_mapping_hash();
        if current_target != target_hash {
            warn!(
                app = %app_name,
                scheduled_hash = %target_hash,
                current_hash = %current_target,
                "Skipping migration completion for a stale target mapping"
            );
            return Ok(MigrationOutcome::StaleTarget);
        }
        self.resync_after_migrate(&app).await
    }

    /// Resync an app into its write index and retire its old read indices.
    ///
    /// Returns `LockContended` without doing anything when another worker is
    /// migrating the same app. Fails with `MigrationInconsistency` when the
    /// write index does not carry the target mapping, or when the app's
    /// indices changed while the resync ran.
    #[instrument(skip(self, app), fields(app = %app.name))]
    pub async fn resync_after_migrate(&self, app: &SearchApp) -> Result<MigrationOutcome, SyncError> {
        let key = format!("resync-after-migrate-{}", app.name);
        let Some(_guard) = self.lock.try_acquire(&key).await? else {
            info!("Migration lock held by another worker, skipping");
            return Ok(MigrationOutcome::LockContended);
        };

        let search_model = app.search_model.as_ref();
        let read_alias = search_model.read_alias();
        let write_alias = search_model.write_alias();

        let (read_before, write_before) = self
            .ctx
            .index
            .get_read_and_write_indices(&read_alias, &write_alias)
            .await?;
        let target_hash = search_model.target_mapping_hash();
        if search_model.mapping_hash_of(&write_before).as_deref() != Some(target_hash.as_str()) {
            return Err(SyncError::migration_inconsistency(format!(
                "write index {} does not carry target mapping hash {}",
                write_before, target_hash
            )));
        }

        sync_app(&self.ctx, app, Some(&DeleteFromSecondaryIndices)).await?;

        let (read_after, write_after) = self
            .ctx
            .index
            .get_read_and_write_indices(&read_alias, &write_alias)
            .await?;
        if read_after != read_before || write_after != write_before {
            return Err(SyncError::migration_inconsistency(format!(
                "indices of {} changed during resync: read {:?} -> {:?}, write {} -> {}",
                app.name, read_before, read_after, write_before, write_after
            )));
        }

        if read_after.len() <= 1 {
            info!(index = %write_after, "Resync complete, no old indices");
            return Ok(MigrationOutcome::ResyncedOnly);
        }

        let old: BTreeSet<String> = read_after
            .into_iter()
            .filter(|index| *index != write_after)
            .collect();
        let mut tx = self.ctx.index.alias_transaction();
        tx.dissociate(old.iter().cloned(), &read_alias);
        tx.commit().await?;

        let mut deleted = BTreeSet::new();
        for index in &old {
            let aliases = self.ctx.index.get_aliases_for_index(index).await?;
            if aliases.is_empty() {
                self.ctx.index.delete_index(index).await?;
                info!(index = %index, "Deleted old index");
                deleted.insert(index.clone());
            } else {
                info!(index = %index, aliases = ?aliases, "Old index still referenced, keeping it");
            }
        }

        info!(index = %write_after, "Migration complete");
        Ok(MigrationOutcome::Migrated {
            dissociated: old,
            deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::SearchModel;
    use crate::migration::lock::InProcessLock;
    use crate::errors::StoreError;
    use crate::store::{MemoryTable, Row, RowSource};
    use crate::testing::{bare_fixture, bare_fixture_with_company_rows, company_model, named, Fixture};
    use async_trait::async_trait;
    use search_sync_repository::{AliasAction, InMemorySearchEngine, SearchEngine};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    const OLD_INDEX: &str = "test-company-0ld";
    const STRAY_INDEX: &str = "test-company-stray";

    /// Company rows that put a stray index behind the read alias on the
    /// first batch read after being armed.
    struct AliasChangingRows {
        rows: MemoryTable,
        engine: Arc<InMemorySearchEngine>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl RowSource for AliasChangingRows {
        async fn fetch(&self, pk: Uuid) -> Result<Option<Row>, StoreError> {
            self.rows.fetch(pk).await
        }

        async fn fetch_batch_after(
            &self,
            after: Option<Uuid>,
            limit: usize,
        ) -> Result<Vec<Row>, StoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.engine.create_index(STRAY_INDEX, &serde_json::json!({})).await.unwrap();
                self.engine
                    .update_aliases(&[AliasAction::add(STRAY_INDEX, "test-company-read")])
                    .await
                    .unwrap();
            }
            self.rows.fetch_batch_after(after, limit).await
        }
    }

    /// Company app living in an index with an outdated mapping hash.
    async fn outdated_fixture() -> (Fixture, Vec<Uuid>) {
        populate_outdated(bare_fixture()).await
    }

    async fn populate_outdated(f: Fixture) -> (Fixture, Vec<Uuid>) {
        f.engine.create_index(OLD_INDEX, &serde_json::json!({})).await.unwrap();
        f.engine
            .update_aliases(&[
                AliasAction::add(OLD_INDEX, "test-company-read"),
                AliasAction::add(OLD_INDEX, "test-company-write"),
            ])
            .await
            .unwrap();

        let mut pks = Vec::new();
        for name in ["Acme", "Globex", "Initech"] {
            pks.push(f.companies.upsert(Uuid::new_v4(), named(name)).await.pk);
        }
        let app = f.ctx.app("company").unwrap();
        sync_app(&f.ctx, &app, None).await.unwrap();
        assert_eq!(f.engine.document_ids(OLD_INDEX).await.len(), 3);
        (f, pks)
    }

    fn coordinator(f: &Fixture) -> (MigrationCoordinator, InProcessLock) {
        let lock = InProcessLock::new();
        (
            MigrationCoordinator::new(f.ctx.clone(), Arc::new(lock.clone())),
            lock,
        )
    }

    #[tokio::test]
    async fn test_init_app_creates_index_and_aliases() {
        let f = bare_fixture();
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        let target = company_model().target_index_name();

        assert!(coordinator.init_app(&app).await.unwrap());
        assert!(!coordinator.init_app(&app).await.unwrap());

        assert_eq!(
            f.engine.get_indices_for_alias("test-company-read").await.unwrap(),
            BTreeSet::from([target.clone()])
        );
        assert_eq!(
            f.engine.get_indices_for_alias("test-company-write").await.unwrap(),
            BTreeSet::from([target])
        );
        assert_eq!(f.queue.scheduled_names(), vec!["sync_app:company".to_string()]);
    }

    #[tokio::test]
    async fn test_up_to_date_app_is_not_migrated() {
        let f = bare_fixture();
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        coordinator.init_app(&app).await.unwrap();
        f.queue.clear();

        assert!(coordinator.migrate_app(&app).await.unwrap().is_none());
        assert_eq!(f.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_full_migration() {
        let (f, pks) = outdated_fixture().await;
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        let target = company_model().target_index_name();

        let handle = coordinator.migrate_app(&app).await.unwrap().unwrap();
        assert!(handle.name.starts_with("complete_migration:company:"));
        assert_eq!(
            f.engine.get_indices_for_alias("test-company-read").await.unwrap(),
            BTreeSet::from([OLD_INDEX.to_string(), target.clone()])
        );
        assert_eq!(
            f.engine.get_indices_for_alias("test-company-write").await.unwrap(),
            BTreeSet::from([target.clone()])
        );

        let report = f.queue.run_until_idle().await;
        assert_eq!(report.failed, 0);

        assert_eq!(
            f.engine.get_indices_for_alias("test-company-read").await.unwrap(),
            BTreeSet::from([target.clone()])
        );
        assert!(!f.engine.index_exists(OLD_INDEX).await.unwrap());
        for pk in pks {
            assert_eq!(f.engine.copies_of("test-company-read", &pk.to_string()).await, 1);
        }
    }

    #[tokio::test]
    async fn test_shared_old_index_is_kept() {
        let (f, _) = outdated_fixture().await;
        f.engine
            .update_aliases(&[AliasAction::add(OLD_INDEX, "legacy-reports")])
            .await
            .unwrap();
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        coordinator.migrate_app(&app).await.unwrap();
        f.queue.clear();

        let outcome = coordinator.resync_after_migrate(&app).await.unwrap();

        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                dissociated: BTreeSet::from([OLD_INDEX.to_string()]),
                deleted: BTreeSet::new(),
            }
        );
        assert!(f.engine.index_exists(OLD_INDEX).await.unwrap());
        assert_eq!(
            f.engine.get_aliases_for_index(OLD_INDEX).await.unwrap(),
            BTreeSet::from(["legacy-reports".to_string()])
        );
    }

    #[tokio::test]
    async fn test_lock_contention_is_a_no_op() {
        let (f, _) = outdated_fixture().await;
        let (coordinator, lock) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        coordinator.migrate_app(&app).await.unwrap();
        let upserts = f.engine.bulk_upsert_calls().await;

        let _held = lock
            .try_acquire("resync-after-migrate-company")
            .await
            .unwrap()
            .unwrap();
        let outcome = coordinator.resync_after_migrate(&app).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::LockContended);
        assert_eq!(f.engine.bulk_upsert_calls().await, upserts);
        assert!(f.engine.index_exists(OLD_INDEX).await.unwrap());
    }

    #[tokio::test]
    async fn test_unstarted_migration_is_inconsistent() {
        let (f, _) = outdated_fixture().await;
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();

        let result = coordinator.resync_after_migrate(&app).await;

        assert!(matches!(result, Err(SyncError::MigrationInconsistency(_))));
    }

    #[tokio::test]
    async fn test_alias_change_during_resync_is_inconsistent() {
        let mut changing = None;
        let f = bare_fixture_with_company_rows(|companies, engine| {
            let rows = Arc::new(AliasChangingRows {
                rows: companies.clone(),
                engine: engine.clone(),
                armed: AtomicBool::new(false),
            });
            changing = Some(rows.clone());
            rows as Arc<dyn RowSource>
        });
        let changing = changing.unwrap();
        let (f, _) = populate_outdated(f).await;
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        coordinator.migrate_app(&app).await.unwrap();
        f.queue.clear();

        changing.armed.store(true, Ordering::SeqCst);
        let result = coordinator.resync_after_migrate(&app).await;

        assert!(matches!(result, Err(SyncError::MigrationInconsistency(_))));
        let read = f.engine.get_indices_for_alias("test-company-read").await.unwrap();
        assert!(read.contains(OLD_INDEX));
        assert!(read.contains(STRAY_INDEX));
        assert!(f.engine.index_exists(OLD_INDEX).await.unwrap());
    }

    #[tokio::test]
    async fn test_single_read_index_only_resyncs() {
        let f = bare_fixture();
        let (coordinator, _) = coordinator(&f);
        let app = f.ctx.app("company").unwrap();
        coordinator.init_app(&app).await.unwrap();
        let pk = f.companies.upsert(Uuid::new_v4(), named("Acme")).await.pk;
        let aliases_updates = f.engine.alias_update_calls().await;

        let outcome = coordinator.resync_after_migrate(&app).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::ResyncedOnly);
        assert_eq!(f.engine.alias_update_calls().await, aliases_updates);
        assert_eq!(f.engine.copies_of("test-company-read", &pk.to_string()).await, 1);
    }

    #[tokio::test]
    async fn test_stale_target_is_skipped() {
        let (f, _) = outdated_fixture().await;
        let (coordinator, _) = coordinator(&f);

        let outcome = coordinator.complete_migration("company", "0ld").await.unwrap();

        assert_eq!(outcome, MigrationOutcome::StaleTarget);
        assert!(f.engine.index_exists(OLD_INDEX).await.unwrap());
    }
}
