//! Shared state of the synchronization entry points.

use std::sync::Arc;

use search_sync_repository::SearchIndexService;

use crate::apps::{SearchApp, SearchAppRegistry};
use crate::errors::SyncError;
use crate::queue::JobQueue;
use crate::store::RelationTable;

/// Default number of rows fetched per batch during a full app resync.
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 2000;

/// Tuning of the synchronization entry points.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Rows fetched per batch during a full app resync.
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }
}

/// Everything the sync, deletion and migration code needs.
///
/// Cheap to clone; jobs capture their own copy.
#[derive(Clone)]
pub struct SearchContext {
    pub registry: Arc<SearchAppRegistry>,
    pub relations: Arc<RelationTable>,
    pub index: SearchIndexService,
    pub queue: Arc<dyn JobQueue>,
    pub options: SyncOptions,
}

impl SearchContext {
    pub fn new(
        registry: Arc<SearchAppRegistry>,
        relations: Arc<RelationTable>,
        index: SearchIndexService,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            registry,
            relations,
            index,
            queue,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn app(&self, name: &str) -> Result<Arc<SearchApp>, SyncError> {
        self.registry.get(name)
    }
}
