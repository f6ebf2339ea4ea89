//! Index naming and mapping hashes.
//!
//! Every search app owns a read alias, a write alias and one or more
//! concrete indices. Concrete index names embed a hash of the mapping they
//! were created with, which is how a schema change is detected.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Suffix of the alias used for queries.
pub const READ_ALIAS_SUFFIX: &str = "read";

/// Suffix of the alias used for writes.
pub const WRITE_ALIAS_SUFFIX: &str = "write";

/// Builds index and alias names for search apps under a common prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNaming {
    /// Prefix shared by every index and alias (e.g. "search").
    pub prefix: String,
}

impl IndexNaming {
    /// Create a new naming scheme.
    ///
    /// # Arguments
    ///
    /// * `prefix` - The prefix shared by all index and alias names
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Name of the concrete index for a document type and mapping hash.
    ///
    /// # Returns
    ///
    /// The index name (e.g. "search-company-3f2a...")
    pub fn index_name(&self, doc_type: &str, mapping_hash: &str) -> String {
        format!("{}-{}-{}", self.prefix, doc_type, mapping_hash)
    }

    /// Name of the read alias for a document type.
    pub fn read_alias(&self, doc_type: &str) -> String {
        format!("{}-{}-{}", self.prefix, doc_type, READ_ALIAS_SUFFIX)
    }

    /// Name of the write alias for a document type.
    pub fn write_alias(&self, doc_type: &str) -> String {
        format!("{}-{}-{}", self.prefix, doc_type, WRITE_ALIAS_SUFFIX)
    }

    /// Extract the mapping hash embedded in a concrete index name.
    ///
    /// Returns `None` when the index was not named by this scheme for `doc_type`.
    pub fn mapping_hash_of<'a>(&self, doc_type: &str, index: &'a str) -> Option<&'a str> {
        let expected_prefix = format!("{}-{}-", self.prefix, doc_type);
        index
            .strip_prefix(expected_prefix.as_str())
            .filter(|hash| !hash.is_empty() && !hash.contains('-'))
    }
}

/// Fingerprint of a mapping.
///
/// Object keys are sorted before hashing so that the hash only changes when
/// the mapping content changes.
pub fn mapping_hash(mapping: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(mapping).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields = keys
                .into_iter()
                .map(|key| format!("{}:{}", Value::String(key.clone()), canonical_json(&map[key])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", fields)
        }
        Value::Array(items) => {
            let items = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{}]", items)
        }
        other => other.to_string(),
    }
}

/// Default index settings.
///
/// # Sharding Configuration
///
/// - 1 primary shard
/// - 1 replica for redundancy
pub fn default_index_settings() -> Value {
    json!({
        "number_of_shards": 1,
        "number_of_replicas": 1
    })
}

/// Full index creation body from settings and a mapping.
pub fn index_body(settings: &Value, mapping: &Value) -> Value {
    json!({
        "settings": settings,
        "mappings": mapping
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_and_alias_names() {
        let naming = IndexNaming::new("search");

        assert_eq!(naming.index_name("company", "abc123"), "search-company-abc123");
        assert_eq!(naming.read_alias("company"), "search-company-read");
        assert_eq!(naming.write_alias("company"), "search-company-write");
    }

    #[test]
    fn test_mapping_hash_of_index() {
        let naming = IndexNaming::new("search");

        assert_eq!(
            naming.mapping_hash_of("company", "search-company-abc123"),
            Some("abc123")
        );
        assert_eq!(naming.mapping_hash_of("contact", "search-company-abc123"), None);
        assert_eq!(naming.mapping_hash_of("company", "search-company-"), None);
        assert_eq!(naming.mapping_hash_of("company", "legacy-company-abc"), None);
    }

    #[test]
    fn test_mapping_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(
            r#"{"properties": {"name": {"type": "text"}, "id": {"type": "keyword"}}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{"properties": {"id": {"type": "keyword"}, "name": {"type": "text"}}}"#,
        )
        .unwrap();

        assert_eq!(mapping_hash(&a), mapping_hash(&b));
        assert_eq!(mapping_hash(&a).len(), 64);
    }

    #[test]
    fn test_mapping_hash_changes_with_content() {
        let a = json!({"properties": {"name": {"type": "text"}}});
        let b = json!({"properties": {"name": {"type": "keyword"}}});

        assert_ne!(mapping_hash(&a), mapping_hash(&b));
    }

    #[test]
    fn test_index_settings_structure() {
        let body = index_body(
            &default_index_settings(),
            &json!({"properties": {"id": {"type": "keyword"}}}),
        );

        assert!(body["settings"]["number_of_shards"].is_number());
        assert!(body["settings"]["number_of_replicas"].is_number());
        assert_eq!(body["mappings"]["properties"]["id"]["type"], "keyword");
    }
}
