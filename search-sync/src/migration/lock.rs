//! Advisory locks serializing migrations per search app.
//!
//! Acquisition never blocks: losing the race returns `None`.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::errors::{StoreError, SyncError};

/// Held lock. Released when dropped.
pub struct LockGuard {
    key: String,
    _release: Box<dyn Send>,
}

impl LockGuard {
    /// Wrap a value whose drop releases the lock.
    pub fn new(key: impl Into<String>, release: impl Send + 'static) -> Self {
        Self {
            key: key.into(),
            _release: Box::new(release),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

/// Non-blocking mutual exclusion keyed by name.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// # Returns
    ///
    /// * `Ok(Some(LockGuard))` - The lock was free and is now held
    /// * `Ok(None)` - Someone else holds the lock
    /// * `Err(SyncError)` - The lock backend failed
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, SyncError>;
}

type HeldKeys = Arc<Mutex<HashSet<String>>>;

fn held(keys: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    keys.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock shared by every holder in this process.
#[derive(Clone, Default)]
pub struct InProcessLock {
    keys: HeldKeys,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        held(&self.keys).contains(key)
    }
}

struct InProcessRelease {
    keys: HeldKeys,
    key: String,
}

impl Drop for InProcessRelease {
    fn drop(&mut self) {
        held(&self.keys).remove(&self.key);
    }
}

#[async_trait]
impl AdvisoryLock for InProcessLock {
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, SyncError> {
        if !held(&self.keys).insert(key.to_string()) {
            return Ok(None);
        }
        let release = InProcessRelease {
            keys: Arc::clone(&self.keys),
            key: key.to_string(),
        };
        Ok(Some(LockGuard::new(key, release)))
    }
}

/// PostgreSQL transaction-level advisory lock.
///
/// The guard keeps the transaction open; dropping it rolls the transaction
/// back, which releases the lock. Works across processes sharing the
/// database.
#[derive(Clone)]
pub struct PostgresAdvisoryLock {
    pool: PgPool,
}

impl PostgresAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdvisoryLock for PostgresAdvisoryLock {
    async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, SyncError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        if !acquired {
            debug!(key = %key, "Advisory lock held elsewhere");
            tx.rollback().await.map_err(StoreError::from)?;
            return Ok(None);
        }
        Ok(Some(LockGuard::new(key, tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let lock = InProcessLock::new();

        let guard = lock.try_acquire("resync-after-migrate-company").await.unwrap();
        assert!(guard.is_some());
        assert!(lock
            .try_acquire("resync-after-migrate-company")
            .await
            .unwrap()
            .is_none());
        assert!(lock
            .try_acquire("resync-after-migrate-contact")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let lock = InProcessLock::new();

        let guard = lock.try_acquire("company").await.unwrap();
        assert!(lock.is_held("company"));
        drop(guard);

        assert!(!lock.is_held("company"));
        assert!(lock.try_acquire("company").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let lock = InProcessLock::new();
        let other = lock.clone();

        let _guard = lock.try_acquire("company").await.unwrap();

        assert!(other.try_acquire("company").await.unwrap().is_none());
    }
}
