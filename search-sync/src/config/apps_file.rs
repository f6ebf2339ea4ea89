//! Declarative table of search apps, relations and activity feeds.
//!
//! ```json
//! {
//!   "apps": [{
//!     "name": "company", "table": "company_company",
//!     "fields": { "name": { "type": "text" } }
//!   }],
//!   "relations": [{
//!     "model": "company", "name": "contacts", "target_app": "contact",
//!     "table": "company_contact", "foreign_key": "company_id"
//!   }],
//!   "activity_streams": [{
//!     "name": "interactions", "summary": "Interaction Activities", "kind": "Interaction",
//!     "source": "database", "table": "interaction_interaction"
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use search_sync_repository::{IndexNaming, SearchIndexService};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use crate::activity_stream::{ActivitySource, PostgresActivitySource, SearchActivitySource};
use crate::apps::{DeclaredSearchModel, FieldSpec, SearchApp, SearchAppRegistry};
use crate::errors::SyncError;
use crate::store::{PostgresRelation, PostgresRowSource, RelationTable};

fn default_pk_column() -> String {
    "id".to_string()
}

fn default_modified_column() -> String {
    "modified_on".to_string()
}

/// One search app entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AppEntry {
    pub name: String,
    /// Primary-store model; defaults to the app name.
    #[serde(default)]
    pub model: Option<String>,
    pub table: String,
    #[serde(default = "default_pk_column")]
    pub pk_column: String,
    /// Document type tag; defaults to the app name.
    #[serde(default)]
    pub doc_type: Option<String>,
    pub fields: BTreeMap<String, FieldSpec>,
    #[serde(default)]
    pub view_permissions: Vec<String>,
}

impl AppEntry {
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.name)
    }

    pub fn doc_type(&self) -> &str {
        self.doc_type.as_deref().unwrap_or(&self.name)
    }
}

/// A relation from `model` to the rows of `target_app` whose `foreign_key`
/// references it.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationEntry {
    pub model: String,
    pub name: String,
    pub target_app: String,
    pub table: String,
    pub foreign_key: String,
    #[serde(default = "default_pk_column")]
    pub pk_column: String,
}

/// Where a feed reads its records from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FeedSourceEntry {
    /// A primary-store table.
    Database {
        table: String,
        #[serde(default = "default_pk_column")]
        id_column: String,
        #[serde(default = "default_modified_column")]
        modified_column: String,
    },
    /// The read alias of a search app.
    Search {
        app: String,
        #[serde(default = "default_modified_column")]
        timestamp_field: String,
    },
}

/// One activity feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    pub summary: String,
    /// Entity kind used in activity ids, e.g. `Interaction`.
    pub kind: String,
    #[serde(flatten)]
    pub source: FeedSourceEntry,
}

/// A feed ready to be served.
pub struct ActivityFeedSpec {
    pub name: String,
    pub summary: String,
    pub source: Arc<dyn ActivitySource>,
}

/// Contents of the apps file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppsFile {
    #[serde(default)]
    pub apps: Vec<AppEntry>,
    #[serde(default)]
    pub relations: Vec<RelationEntry>,
    #[serde(default)]
    pub activity_streams: Vec<FeedEntry>,
}

impl AppsFile {
    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            apps = file.apps.len(),
            relations = file.relations.len(),
            feeds = file.activity_streams.len(),
            "Loaded search apps file"
        );
        Ok(file)
    }

    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::config(format!("Invalid search apps file: {}", e)))
    }

    /// Register every app, each reading its rows from `pool`.
    pub fn build_registry(
        &self,
        naming: &IndexNaming,
        pool: &PgPool,
    ) -> Result<SearchAppRegistry, SyncError> {
        let mut registry = SearchAppRegistry::new();
        for entry in &self.apps {
            let search_model =
                DeclaredSearchModel::new(entry.doc_type(), naming.clone(), entry.fields.clone());
            let rows = PostgresRowSource::new(pool.clone(), entry.model(), &entry.table, &entry.pk_column)?;
            registry.register(
                SearchApp::new(entry.name.clone(), entry.model(), Arc::new(search_model), Arc::new(rows))
                    .with_view_permissions(entry.view_permissions.clone()),
            )?;
        }
        Ok(registry)
    }

    /// Build the relation table. Every target app must be registered.
    pub fn build_relations(
        &self,
        registry: &SearchAppRegistry,
        pool: &PgPool,
    ) -> Result<RelationTable, SyncError> {
        let mut relations = RelationTable::new();
        for entry in &self.relations {
            registry.get(&entry.target_app)?;
            let fetcher =
                PostgresRelation::new(pool.clone(), &entry.table, &entry.foreign_key, &entry.pk_column)?;
            relations.register(
                entry.model.clone(),
                entry.name.clone(),
                entry.target_app.clone(),
                Arc::new(fetcher),
            );
        }
        Ok(relations)
    }

    /// Build the activity feeds.
    pub fn build_feeds(
        &self,
        registry: &SearchAppRegistry,
        index: &SearchIndexService,
        pool: &PgPool,
    ) -> Result<Vec<ActivityFeedSpec>, SyncError> {
        self.activity_streams
            .iter()
            .map(|entry| -> Result<ActivityFeedSpec, SyncError> {
                let source: Arc<dyn ActivitySource> = match &entry.source {
                    FeedSourceEntry::Database {
                        table,
                        id_column,
                        modified_column,
                    } => Arc::new(PostgresActivitySource::new(
                        pool.clone(),
                        entry.kind.clone(),
                        table,
                        id_column,
                        modified_column,
                    )?),
                    FeedSourceEntry::Search {
                        app,
                        timestamp_field,
                    } => {
                        let app = registry.get(app)?;
                        Arc::new(SearchActivitySource::new(
                            index.clone(),
                            app.search_model.read_alias(),
                            entry.kind.clone(),
                            timestamp_field.clone(),
                        ))
                    }
                };
                Ok(ActivityFeedSpec {
                    name: entry.name.clone(),
                    summary: entry.summary.clone(),
                    source,
                })
            })
            .collect()
    }
}
