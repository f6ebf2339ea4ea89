//! Search index error types.
//!
//! This module defines the unified error type for all search engine operations,
//! including both transport-level failures and per-item bulk failures.

use thiserror::Error;

use crate::types::{BulkItemFailure, BulkOperation};

/// Unified errors from search engine operations.
///
/// Used by the `SearchEngine` trait and `SearchIndexService`. Transient
/// failures (connection, transport, 5xx) are kept distinct from not-found
/// conditions so callers can decide whether to retry.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Validation error (e.g., invalid index name, empty alias).
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Failed to establish connection to the search engine.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A request failed in transit or the engine answered with a server error.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Failed to create an index.
    #[error("Index creation error: {0}")]
    IndexCreationError(String),

    /// Failed to delete an index.
    #[error("Index deletion error: {0}")]
    IndexDeletionError(String),

    /// The index does not exist.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// Failed to read or update aliases.
    #[error("Alias error: {0}")]
    AliasError(String),

    /// One or more items of a bulk request failed with a non-404 status.
    #[error("{} bulk {} operation(s) failed: {}", .failures.len(), .operation, describe_failures(.failures))]
    BulkFailure {
        operation: BulkOperation,
        failures: Vec<BulkItemFailure>,
    },

    /// Document not found.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Failed to parse a response from the search engine.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize a request body.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

fn describe_failures(failures: &[BulkItemFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}/{} ({}: {})", f.index, f.id, f.status, f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SearchIndexError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    /// Create an index creation error.
    pub fn index_creation(msg: impl Into<String>) -> Self {
        Self::IndexCreationError(msg.into())
    }

    /// Create an index deletion error.
    pub fn index_deletion(msg: impl Into<String>) -> Self {
        Self::IndexDeletionError(msg.into())
    }

    /// Create an index not found error.
    pub fn index_not_found(index: impl Into<String>) -> Self {
        Self::IndexNotFound(index.into())
    }

    /// Create an alias error.
    pub fn alias(msg: impl Into<String>) -> Self {
        Self::AliasError(msg.into())
    }

    /// Create a bulk failure error naming every failed item.
    pub fn bulk_failure(operation: BulkOperation, failures: Vec<BulkItemFailure>) -> Self {
        Self::BulkFailure {
            operation,
            failures,
        }
    }

    /// Create a document not found error.
    pub fn document_not_found(index: &str, id: &str) -> Self {
        Self::DocumentNotFound(format!("index={}, id={}", index, id))
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }

    /// Create an unknown error.
    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Whether the failure is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::TransportError(_))
    }

    /// Whether the failure means the target is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DocumentNotFound(_) | Self::IndexNotFound(_))
    }
}
