//! # Search Sync
//!
//! Keeps OpenSearch indices consistent with the primary store, migrates
//! indices online when a mapping changes, and serves an activity stream of
//! recently modified records to an external consumer.
//!
//! ## Architecture
//!
//! 1. **Apps**: each search app maps rows of one model to documents of one index
//! 2. **Sync**: rows are written to the write alias in chunked bulk requests,
//!    either inline or as retried background jobs
//! 3. **Changes**: row changes notified by the primary store become save and
//!    delete signals that schedule the syncs
//! 4. **Deletion**: deletions are collected while a unit of work runs and
//!    applied once it succeeds
//! 5. **Migration**: a changed mapping creates a new index, moves the write
//!    alias, resyncs and retires the old index under an advisory lock
//! 6. **Activity stream**: cursor-paginated feeds behind Hawk authentication
//!
//! ## Modules
//!
//! - [`apps`]: search apps and their registry
//! - [`store`]: primary-store row sources and relations
//! - [`signals`]: save/delete notifications
//! - [`changes`]: primary-store change feed feeding the signals
//! - [`queue`]: background jobs with retries
//! - [`sync`]: bulk sync and object/related sync entry points
//! - [`deletion`]: deferred deletion of removed rows
//! - [`migration`]: index migration coordination
//! - [`activity_stream`]: pagination, sources and the HTTP endpoint
//! - [`config`]: settings and dependency initialization
//! - [`errors`]: error types

pub mod activity_stream;
pub mod apps;
pub mod changes;
pub mod clock;
pub mod config;
pub mod deletion;
pub mod errors;
pub mod migration;
pub mod queue;
pub mod signals;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{Dependencies, SyncSettings};
pub use errors::{StoreError, SyncError};
