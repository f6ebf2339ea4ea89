//! Search synchronization error types.

use search_sync_repository::SearchIndexError;
use search_sync_shared::CursorParseError;
use thiserror::Error;

use crate::errors::StoreError;

/// Errors that can occur while synchronizing, migrating or serving the activity stream.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Error from the search engine.
    #[error("Search index error: {0}")]
    SearchIndex(#[from] SearchIndexError),

    /// Error from the primary store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No search app is registered under this name.
    #[error("Unknown search app: {0}")]
    UnknownSearchApp(String),

    /// No relation is declared under this name for the model.
    #[error("Unknown relation {relation} on model {model}")]
    UnknownRelation { model: String, relation: String },

    /// Index state changed underneath a migration holding the lock.
    ///
    /// Requires operator intervention; never retried.
    #[error("Migration inconsistency: {0}")]
    MigrationInconsistency(String),

    /// An advisory lock could not be taken or released.
    #[error("Lock error: {0}")]
    LockError(String),

    /// A job could not be scheduled.
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A cursor could not be parsed.
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorParseError),
}

impl SyncError {
    /// Create an unknown search app error.
    pub fn unknown_app(name: impl Into<String>) -> Self {
        Self::UnknownSearchApp(name.into())
    }

    /// Create an unknown relation error.
    pub fn unknown_relation(model: impl Into<String>, relation: impl Into<String>) -> Self {
        Self::UnknownRelation {
            model: model.into(),
            relation: relation.into(),
        }
    }

    /// Create a migration inconsistency error.
    pub fn migration_inconsistency(msg: impl Into<String>) -> Self {
        Self::MigrationInconsistency(msg.into())
    }

    /// Create a lock error.
    pub fn lock(msg: impl Into<String>) -> Self {
        Self::LockError(msg.into())
    }

    /// Create a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::QueueError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether a background job failing with this error should be retried.
    ///
    /// Transient search engine failures, bulk item failures and store
    /// failures retry. Everything else is logged and dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SearchIndex(err) => {
                err.is_transient() || matches!(err, SearchIndexError::BulkFailure { .. })
            }
            Self::Store(StoreError::DatabaseError(_)) => true,
            _ => false,
        }
    }
}
