//! # Search Sync Repository
//!
//! This crate provides the seam between the synchronization logic and the
//! search engine. It includes the error type, the `SearchEngine` trait,
//! index/alias naming with mapping hashes, an OpenSearch implementation, an
//! in-memory implementation, and the `SearchIndexService` used by
//! application code for chunked bulk operations and alias transactions.

pub mod config;
pub mod errors;
pub mod index_config;
pub mod interfaces;
pub mod memory;
pub mod opensearch;
pub mod service;
pub mod types;

pub use config::SearchIndexServiceConfig;
pub use errors::SearchIndexError;
pub use index_config::{mapping_hash, IndexNaming};
pub use interfaces::SearchEngine;
pub use memory::InMemorySearchEngine;
pub use opensearch::OpenSearchProvider;
pub use service::{AliasTransaction, SearchIndexService};
pub use types::{
    AliasAction, BulkItemFailure, BulkItemResult, BulkOperation, BulkSummary, SortedRangeQuery,
};
