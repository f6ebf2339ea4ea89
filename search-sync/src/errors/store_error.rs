//! Primary store error types.

use thiserror::Error;

/// Errors raised while reading rows from the primary store.
///
/// A missing row is not an error: row sources return `Ok(None)` for it.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The database rejected the query or the connection failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A configured table or column name is not a plain identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A row could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl StoreError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    /// Create an invalid identifier error.
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Self::InvalidIdentifier(name.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}
