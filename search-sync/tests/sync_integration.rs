//! Integration tests for object, related-object and signal driven syncs.

mod common;

use common::{contact_of, env, named};
use search_sync::queue::{Priority, RunReport};
use search_sync::signals::{Signal, SignalBus};
use search_sync::sync::{connect_default_receivers, sync_object, sync_object_async, sync_related_objects_async};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_sync_is_idempotent() {
    let env = env().await;
    let row = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;

    sync_object(&env.ctx, "company", row.pk).await.unwrap();
    let first = env.engine.document("it-company-read", &row.pk.to_string()).await;
    sync_object(&env.ctx, "company", row.pk).await.unwrap();
    let second = env.engine.document("it-company-read", &row.pk.to_string()).await;

    assert!(first.is_some());
    assert_eq!(first, second);
    assert_eq!(env.engine.copies_of("it-company-read", &row.pk.to_string()).await, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_indexed() {
    let env = env().await;
    let row = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;
    env.engine.fail_next_bulk_calls(2).await;

    sync_object_async(&env.ctx, "company", row.pk).unwrap();
    let report = env.queue.run_until_idle().await;

    assert_eq!(
        report,
        RunReport {
            succeeded: 1,
            retried: 2,
            failed: 0
        }
    );
    let doc = env
        .engine
        .document("it-company-read", &row.pk.to_string())
        .await
        .unwrap();
    assert_eq!(doc["name"], json!("Acme"));
}

#[tokio::test]
async fn test_deleted_row_is_skipped() {
    let env = env().await;

    sync_object(&env.ctx, "company", Uuid::new_v4()).await.unwrap();

    assert_eq!(env.engine.bulk_upsert_calls().await, 0);
}

#[tokio::test]
async fn test_related_objects_sync_at_low_priority() {
    let env = env().await;
    let company = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;
    let mut contacts = Vec::new();
    for name in ["Jane", "John"] {
        contacts.push(env.contacts.upsert(Uuid::new_v4(), contact_of(name, company.pk)).await);
    }
    env.contacts.upsert(Uuid::new_v4(), contact_of("Other", Uuid::new_v4())).await;

    sync_related_objects_async(&env.ctx, &company, "contacts", None, None).unwrap();
    env.queue.run_until_idle().await;

    let low: Vec<String> = env
        .queue
        .scheduled()
        .into_iter()
        .filter(|(_, priority)| *priority == Priority::Low)
        .map(|(handle, _)| handle.name)
        .collect();
    assert_eq!(low.len(), 2);
    for contact in &contacts {
        assert!(low.contains(&format!("sync_object:contact:{}", contact.pk)));
        assert_eq!(
            env.engine.copies_of("it-contact-read", &contact.pk.to_string()).await,
            1
        );
    }
}

#[tokio::test]
async fn test_unknown_relation_is_rejected() {
    let env = env().await;
    let company = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;

    assert!(sync_related_objects_async(&env.ctx, &company, "orders", None, None).is_err());
}

#[tokio::test]
async fn test_save_and_delete_signals_drive_background_jobs() {
    let env = env().await;
    let bus = SignalBus::new();
    connect_default_receivers(&env.ctx, &bus);
    let row = env.companies.upsert(Uuid::new_v4(), named("Acme")).await;

    bus.send(Signal::post_save(row.clone())).await;
    env.queue.run_until_idle().await;
    assert_eq!(env.engine.copies_of("it-company-read", &row.pk.to_string()).await, 1);

    env.companies.remove(row.pk).await;
    bus.send(Signal::post_delete(row.clone())).await;
    env.queue.run_until_idle().await;
    assert_eq!(env.engine.copies_of("it-company-read", &row.pk.to_string()).await, 0);
}
