//! Search apps and their registry.
//!
//! A search app binds one primary-store model to one search index
//! definition. Apps are registered at process start and never change while
//! the process runs.

mod model;

pub use model::{DeclaredSearchModel, FieldSpec, FieldType, SearchModel};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::SyncError;
use crate::store::RowSource;

/// Registration of one entity type for search.
pub struct SearchApp {
    /// Unique key, used for locks and dispatch.
    pub name: String,
    /// Primary-store model whose rows this app indexes.
    pub model: String,
    pub search_model: Arc<dyn SearchModel>,
    /// Live row resolver.
    pub rows: Arc<dyn RowSource>,
    pub view_permissions: Vec<String>,
}

impl SearchApp {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        search_model: Arc<dyn SearchModel>,
        rows: Arc<dyn RowSource>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            search_model,
            rows,
            view_permissions: Vec::new(),
        }
    }

    pub fn with_view_permissions(mut self, permissions: Vec<String>) -> Self {
        self.view_permissions = permissions;
        self
    }
}

impl std::fmt::Debug for SearchApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchApp")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("doc_type", &self.search_model.doc_type())
            .finish()
    }
}

/// Registered search apps keyed by name.
#[derive(Debug, Default)]
pub struct SearchAppRegistry {
    apps: BTreeMap<String, Arc<SearchApp>>,
}

impl SearchAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an app.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the app was registered
    /// * `Err(SyncError::ConfigError)` - If an app with the same name exists
    pub fn register(&mut self, app: SearchApp) -> Result<(), SyncError> {
        if self.apps.contains_key(&app.name) {
            return Err(SyncError::config(format!(
                "search app {} is registered twice",
                app.name
            )));
        }
        self.apps.insert(app.name.clone(), Arc::new(app));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<SearchApp>, SyncError> {
        self.apps
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::unknown_app(name))
    }

    /// Apps indexing rows of `model`.
    pub fn for_model<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a Arc<SearchApp>> + 'a {
        self.apps.values().filter(move |app| app.model == model)
    }

    pub fn apps(&self) -> impl Iterator<Item = &Arc<SearchApp>> {
        self.apps.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
