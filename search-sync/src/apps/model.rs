//! Index model adapter.
//!
//! Converts primary-store rows into search documents and knows the index
//! naming of one search app: its read alias, its write alias and the
//! mapping hash the running code expects.

use std::collections::BTreeMap;

use search_sync_repository::index_config::{default_index_settings, index_body};
use search_sync_repository::opensearch::DOCUMENT_TYPE_FIELD;
use search_sync_repository::{mapping_hash, IndexNaming};
use search_sync_shared::SearchDocument;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::store::Row;

/// Document schema and index naming of one search app.
pub trait SearchModel: Send + Sync {
    /// Type tag stored with every document.
    fn doc_type(&self) -> &str;

    fn naming(&self) -> &IndexNaming;

    /// The mapping the running code declares.
    fn mapping(&self) -> Value;

    /// Index settings used when creating a new index.
    fn settings(&self) -> Value {
        default_index_settings()
    }

    /// Convert a live row into a document targeted at `index`.
    fn to_document(&self, row: &Row, index: &str) -> SearchDocument;

    /// Hash of the declared mapping.
    fn target_mapping_hash(&self) -> String {
        mapping_hash(&self.mapping())
    }

    fn read_alias(&self) -> String {
        self.naming().read_alias(self.doc_type())
    }

    fn write_alias(&self) -> String {
        self.naming().write_alias(self.doc_type())
    }

    /// Name of the index the declared mapping lives in.
    fn target_index_name(&self) -> String {
        self.naming()
            .index_name(self.doc_type(), &self.target_mapping_hash())
    }

    /// Mapping hash embedded in an existing index name.
    fn mapping_hash_of(&self, index: &str) -> Option<String> {
        self.naming()
            .mapping_hash_of(self.doc_type(), index)
            .map(str::to_string)
    }

    /// Full creation body for the target index.
    fn index_body(&self) -> Value {
        index_body(&self.settings(), &self.mapping())
    }

    /// Id-only document used for deletions.
    fn to_stub(&self, pk: &str, index: &str) -> SearchDocument {
        SearchDocument::stub(pk, index, self.doc_type())
    }
}

/// Field types a declared search model can map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Keyword,
    Text,
    Date,
    Boolean,
    Integer,
    Long,
    Double,
    Object,
}

impl FieldType {
    fn mapping(self) -> Value {
        match self {
            Self::Keyword => json!({"type": "keyword"}),
            Self::Text => json!({"type": "text", "fields": {"keyword": {"type": "keyword"}}}),
            Self::Date => json!({"type": "date"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Long => json!({"type": "long"}),
            Self::Double => json!({"type": "double"}),
            Self::Object => json!({"type": "object", "dynamic": true}),
        }
    }
}

/// One declared document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Dotted path of the row value; defaults to the field name.
    #[serde(default)]
    pub source: Option<String>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            source: None,
        }
    }

    pub fn from_path(field_type: FieldType, source: impl Into<String>) -> Self {
        Self {
            field_type,
            source: Some(source.into()),
        }
    }
}

/// A search model declared as data: a type tag and its fields.
#[derive(Debug, Clone)]
pub struct DeclaredSearchModel {
    doc_type: String,
    naming: IndexNaming,
    fields: BTreeMap<String, FieldSpec>,
}

impl DeclaredSearchModel {
    pub fn new(
        doc_type: impl Into<String>,
        naming: IndexNaming,
        fields: BTreeMap<String, FieldSpec>,
    ) -> Self {
        Self {
            doc_type: doc_type.into(),
            naming,
            fields,
        }
    }
}

impl SearchModel for DeclaredSearchModel {
    fn doc_type(&self) -> &str {
        &self.doc_type
    }

    fn naming(&self) -> &IndexNaming {
        &self.naming
    }

    fn mapping(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("id".to_string(), FieldType::Keyword.mapping());
        properties.insert(DOCUMENT_TYPE_FIELD.to_string(), FieldType::Keyword.mapping());
        for (name, spec) in &self.fields {
            properties.insert(name.clone(), spec.field_type.mapping());
        }
        json!({
            "dynamic": false,
            "properties": properties
        })
    }

    fn to_document(&self, row: &Row, index: &str) -> SearchDocument {
        let mut source = Map::new();
        source.insert("id".to_string(), Value::String(row.pk.to_string()));
        source.insert(
            DOCUMENT_TYPE_FIELD.to_string(),
            Value::String(self.doc_type.clone()),
        );
        for (name, spec) in &self.fields {
            let path = spec.source.as_deref().unwrap_or(name);
            let value = row.get_path(path).cloned().unwrap_or(Value::Null);
            source.insert(name.clone(), value);
        }
        SearchDocument::new(row.pk.to_string(), index, &self.doc_type, source)
    }
}
