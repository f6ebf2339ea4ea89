//! Request and response types for search engine operations.

use std::fmt;

use chrono::{DateTime, Utc};
use search_sync_shared::Cursor;

/// Kind of operation carried by a bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    /// Create-or-update by id.
    Upsert,
    /// Delete by id.
    Delete,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert => write!(f, "upsert"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Result of a bulk operation for a single item.
///
/// Mirrors the per-item entry of a bulk response: the concrete index the
/// item landed in, its HTTP-like status and the error reason, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    /// The document id.
    pub id: String,
    /// The index the operation was applied to.
    pub index: String,
    /// Status code reported for the item.
    pub status: u16,
    /// Error reason if the operation failed.
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(id: impl Into<String>, index: impl Into<String>, status: u16) -> Self {
        Self {
            id: id.into(),
            index: index.into(),
            status,
            error: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        index: impl Into<String>,
        status: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            index: index.into(),
            status,
            error: Some(reason.into()),
        }
    }

    /// Whether the item succeeded.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_none()
    }

    /// Whether the item failed because the document (or index) was absent.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// A failed bulk item, as reported in `SearchIndexError::BulkFailure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    pub index: String,
    pub id: String,
    pub status: u16,
    pub reason: String,
}

impl From<&BulkItemResult> for BulkItemFailure {
    fn from(result: &BulkItemResult) -> Self {
        Self {
            index: result.index.clone(),
            id: result.id.clone(),
            status: result.status,
            reason: result.error.clone().unwrap_or_default(),
        }
    }
}

/// Summary of a bulk operation containing aggregate statistics and individual results.
///
/// Per-item failures are reported here rather than aborting the whole
/// request, so callers can handle partial failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Total number of items in the batch.
    pub total: usize,
    /// Number of successful operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Individual results for each item.
    pub results: Vec<BulkItemResult>,
}

impl BulkSummary {
    /// Build a summary from per-item results.
    pub fn from_results(results: Vec<BulkItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: BulkSummary) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.results.extend(other.results);
    }

    /// Failed items excluding those that failed with 404.
    pub fn non_404_failures(&self) -> Vec<BulkItemFailure> {
        self.results
            .iter()
            .filter(|r| !r.is_success() && !r.is_not_found())
            .map(BulkItemFailure::from)
            .collect()
    }

    /// Ids of the items that succeeded.
    pub fn succeeded_ids(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.id.as_str())
    }
}

/// One action of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }
}

/// A range-filtered, `(timestamp, id)`-sorted query.
///
/// Selects documents whose `(timestamp_field, id_field)` tuple is strictly
/// greater than `after` and whose timestamp is strictly before `before`,
/// ordered ascending by both fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedRangeQuery {
    pub timestamp_field: String,
    pub id_field: String,
    pub after: Cursor,
    pub before: DateTime<Utc>,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let summary = BulkSummary::from_results(vec![
            BulkItemResult::ok("1", "idx", 200),
            BulkItemResult::ok("2", "idx", 201),
            BulkItemResult::failed("3", "idx", 404, "not_found"),
            BulkItemResult::failed("4", "idx", 500, "boom"),
        ]);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded_ids().collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn test_non_404_failures_excludes_not_found() {
        let summary = BulkSummary::from_results(vec![
            BulkItemResult::failed("3", "idx", 404, "not_found"),
            BulkItemResult::failed("4", "idx", 500, "boom"),
        ]);

        let failures = summary.non_404_failures();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "4");
        assert_eq!(failures[0].reason, "boom");
    }

    #[test]
    fn test_merge() {
        let mut summary = BulkSummary::from_results(vec![BulkItemResult::ok("1", "idx", 200)]);
        summary.merge(BulkSummary::from_results(vec![BulkItemResult::failed(
            "2", "idx", 500, "boom",
        )]));

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
    }
}
