//! Object synchronization.
//!
//! - [`bulk_sync`]: writes batches of rows to the write index
//! - [`objects`]: single object, related object and full app syncs
//! - [`receivers`]: signal receivers scheduling syncs

pub mod bulk_sync;
pub mod context;
pub mod objects;
pub mod receivers;

pub use bulk_sync::{sync_objects, DeleteFromSecondaryIndices, PostBatchCallback};
pub use context::{SearchContext, SyncOptions, DEFAULT_SYNC_BATCH_SIZE};
pub use objects::{
    delete_document, delete_document_async, sync_app, sync_apps, sync_object, sync_object_async,
    sync_related_objects_async,
};
pub use receivers::{connect_default_receivers, remove_on_delete, sync_on_save, sync_related_on_save};
