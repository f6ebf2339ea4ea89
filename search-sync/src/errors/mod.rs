//! Error types for search synchronization.

mod store_error;
mod sync_error;

pub use store_error::StoreError;
pub use sync_error::SyncError;
