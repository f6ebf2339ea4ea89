//! Statically declared relations between models.
//!
//! Saving a row of one model may require re-indexing rows of another (an
//! interaction document carries its company's name). Which relations exist
//! is declared as data in a `RelationTable`, keyed by source model and
//! relation name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::Row;

/// Equality filter applied to related rows: column name to expected value.
pub type RelatedFilter = BTreeMap<String, Value>;

/// Resolves the rows related to a source row.
#[async_trait]
pub trait RelatedRows: Send + Sync {
    /// Primary keys of the target rows related to `source` and matching `filter`.
    async fn related_pks(&self, source: &Row, filter: &RelatedFilter)
        -> Result<Vec<Uuid>, StoreError>;
}

/// One searchable relation: the app whose documents depend on the source
/// model, and how to find the affected rows.
#[derive(Clone)]
pub struct Relation {
    pub target_app: String,
    pub fetcher: Arc<dyn RelatedRows>,
}

/// Relations keyed by `(source model, relation name)`.
#[derive(Clone, Default)]
pub struct RelationTable {
    relations: BTreeMap<(String, String), Relation>,
}

impl RelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a relation, replacing any previous one with the same key.
    pub fn register(
        &mut self,
        model: impl Into<String>,
        name: impl Into<String>,
        target_app: impl Into<String>,
        fetcher: Arc<dyn RelatedRows>,
    ) {
        self.relations.insert(
            (model.into(), name.into()),
            Relation {
                target_app: target_app.into(),
                fetcher,
            },
        );
    }

    pub fn get(&self, model: &str, name: &str) -> Option<&Relation> {
        self.relations.get(&(model.to_string(), name.to_string()))
    }

    /// Every declared relation as `(model, name, relation)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Relation)> {
        self.relations
            .iter()
            .map(|((model, name), relation)| (model.as_str(), name.as_str(), relation))
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Whether a row satisfies an equality filter.
///
/// String and non-string values are compared by their textual form, so a
/// filter value of `"true"` matches a boolean column.
pub(crate) fn matches_filter(row: &Row, filter: &RelatedFilter) -> bool {
    filter.iter().all(|(column, expected)| {
        row.fields
            .get(column)
            .is_some_and(|actual| value_text(actual) == value_text(expected))
    })
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    struct NoRows;

    #[async_trait]
    impl RelatedRows for NoRows {
        async fn related_pks(
            &self,
            _source: &Row,
            _filter: &RelatedFilter,
        ) -> Result<Vec<Uuid>, StoreError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_lookup_by_model_and_name() {
        let mut table = RelationTable::new();
        table.register("company", "interactions", "interaction", Arc::new(NoRows));

        assert_eq!(
            table.get("company", "interactions").map(|r| r.target_app.as_str()),
            Some("interaction")
        );
        assert!(table.get("company", "contacts").is_none());
        assert!(table.get("contact", "interactions").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_matches_filter() {
        let mut fields = Map::new();
        fields.insert("archived".to_string(), json!(false));
        fields.insert("kind".to_string(), json!("meeting"));
        let row = Row::new("interaction", Uuid::new_v4(), fields);

        let mut filter = RelatedFilter::new();
        filter.insert("kind".to_string(), json!("meeting"));
        filter.insert("archived".to_string(), json!("false"));
        assert!(matches_filter(&row, &filter));

        filter.insert("kind".to_string(), json!("email"));
        assert!(!matches_filter(&row, &filter));
    }
}
