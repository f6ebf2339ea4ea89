//! Default signal receivers connecting primary-store events to syncs.
//!
//! Receivers only schedule jobs; the request path never waits on the search
//! engine. Scheduling failures are logged, never raised into the writer.

use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::apps::SearchApp;
use crate::signals::{Receiver, ReceiverId, Signal, SignalBus, SignalKind};
use crate::sync::context::SearchContext;
use crate::sync::objects::{delete_document_async, sync_object_async, sync_related_objects_async};

/// Re-index an app's object whenever a row of its model is saved.
pub fn sync_on_save(ctx: &SearchContext, bus: &SignalBus, app: &SearchApp) -> ReceiverId {
    let ctx = ctx.clone();
    let app_name = app.name.clone();
    let receiver: Receiver = Arc::new(move |signal: Signal| {
        if let Err(e) = sync_object_async(&ctx, &app_name, signal.row.pk) {
            error!(app = %app_name, pk = %signal.row.pk, error = %e, "Failed to schedule sync");
        }
        async {}.boxed()
    });
    bus.connect(&app.model, &[SignalKind::PostSave], Some(&app.name), receiver)
}

/// Remove an app's document in the background whenever a row of its model is deleted.
///
/// Disabled while a deletion collector is active, which deletes in bulk instead.
pub fn remove_on_delete(ctx: &SearchContext, bus: &SignalBus, app: &SearchApp) -> ReceiverId {
    let ctx = ctx.clone();
    let app_name = app.name.clone();
    let receiver: Receiver = Arc::new(move |signal: Signal| {
        if let Err(e) = delete_document_async(&ctx, &app_name, signal.row.pk) {
            error!(app = %app_name, pk = %signal.row.pk, error = %e, "Failed to schedule deletion");
        }
        async {}.boxed()
    });
    bus.connect(&app.model, &[SignalKind::PostDelete], Some(&app.name), receiver)
}

/// Re-index related objects whenever a row of `model` is saved.
///
/// # Arguments
///
/// * `model` - The source model of the relation
/// * `relation_name` - Relation declared for `model` in the relation table
/// * `owner` - The search app whose documents depend on the relation
pub fn sync_related_on_save(
    ctx: &SearchContext,
    bus: &SignalBus,
    model: &str,
    relation_name: &str,
    owner: &str,
) -> ReceiverId {
    let ctx = ctx.clone();
    let relation = relation_name.to_string();
    let receiver: Receiver = Arc::new(move |signal: Signal| {
        if let Err(e) = sync_related_objects_async(&ctx, &signal.row, &relation, None, None) {
            error!(
                model = %signal.row.model,
                relation = %relation,
                error = %e,
                "Failed to schedule related sync"
            );
        }
        async {}.boxed()
    });
    bus.connect(model, &[SignalKind::PostSave], Some(owner), receiver)
}

/// Connect the default receivers of every registered app and relation.
pub fn connect_default_receivers(ctx: &SearchContext, bus: &SignalBus) -> Vec<ReceiverId> {
    let mut ids = Vec::new();
    for app in ctx.registry.apps() {
        ids.push(sync_on_save(ctx, bus, app));
        ids.push(remove_on_delete(ctx, bus, app));
    }
    for (model, name, relation) in ctx.relations.iter() {
        ids.push(sync_related_on_save(ctx, bus, model, name, &relation.target_app));
    }
    ids
}
