//! Registry behaviour against the in-memory queue store
//!
//! Run with: cargo test --test registry_tests

use std::sync::Arc;
use std::time::Duration;

use testnode_dispatch::registrar::{handle_register, handle_report};
use testnode_dispatch::{
    ConflictReason, DispatchError, InMemoryQueueStore, NodeRecord, NodeRegistry, QueueStore,
    RegistryConfig, ENTRY_TTL,
};

fn setup() -> (Arc<InMemoryQueueStore>, NodeRegistry) {
    let store = Arc::new(InMemoryQueueStore::new());
    let registry = NodeRegistry::new(store.clone(), RegistryConfig::default());
    (store, registry)
}

fn rpi1() -> NodeRecord {
    NodeRecord::new("10.0.0.1", "k1").unwrap().with_name("rpi1")
}

#[tokio::test]
async fn test_register_then_list_has_exactly_one_entry() {
    let (_store, registry) = setup();

    registry.register(rpi1()).await.unwrap();
    let entries = registry.list_active().await.unwrap();

    let matching: Vec<_> = entries
        .iter()
        .filter(|e| e.has_identity("10.0.0.1", "rpi1"))
        .collect();
    assert_eq!(matching.len(), 1);
    assert!(!matching[0].record.busy);
    assert_eq!(matching[0].record.port, 4812);
}

#[tokio::test]
async fn test_entry_expiry_comes_from_queue_ttl() {
    let (_store, registry) = setup();

    let before = chrono::Utc::now();
    let entry = registry.register(rpi1()).await.unwrap();

    let ttl = chrono::Duration::from_std(ENTRY_TTL).unwrap();
    assert!(entry.expires_at >= before + ttl);
    assert!(entry.expires_at <= chrono::Utc::now() + ttl);
}

#[tokio::test]
async fn test_reregister_far_from_expiry_conflicts() {
    let (store, registry) = setup();
    registry.register(rpi1()).await.unwrap();

    let err = registry.register(rpi1()).await.unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Conflict(ConflictReason::NotExpiring)
    ));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_reregister_near_expiry_replaces_entry() {
    let (store, registry) = setup();
    // An entry inserted long ago: two minutes of TTL left
    let old = store
        .enqueue(&rpi1().to_payload().unwrap(), Duration::from_secs(120))
        .await
        .unwrap();

    let new = registry.register(rpi1()).await.unwrap();

    assert_eq!(store.len().await, 1);
    assert_ne!(new.handle.message_id, old.handle.message_id);
    assert!(new.expires_at > old.expires_at);

    let entries = registry.list_active().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].handle.message_id, new.handle.message_id);
}

#[tokio::test]
async fn test_same_name_different_ip_conflicts() {
    let (store, registry) = setup();
    registry.register(rpi1()).await.unwrap();

    let imposter = NodeRecord::new("10.0.0.99", "k9").unwrap().with_name("rpi1");
    let err = registry.register(imposter).await.unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Conflict(ConflictReason::IpMismatch)
    ));
    assert_eq!(store.len().await, 1);
    let entries = registry.list_active().await.unwrap();
    assert_eq!(entries[0].record, rpi1());
}

#[tokio::test]
async fn test_ip_mismatch_wins_even_when_entry_is_expiring() {
    let (store, registry) = setup();
    store
        .enqueue(&rpi1().to_payload().unwrap(), Duration::from_secs(60))
        .await
        .unwrap();

    let other = NodeRecord::new("10.0.0.2", "k1").unwrap().with_name("rpi1");
    let err = registry.register(other).await.unwrap_err();

    assert!(matches!(err, DispatchError::Conflict(ConflictReason::IpMismatch)));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_distinct_nodes_coexist() {
    let (_store, registry) = setup();
    registry.register(rpi1()).await.unwrap();
    registry
        .register(NodeRecord::new("10.0.0.2", "k2").unwrap().with_name("rpi2"))
        .await
        .unwrap();

    let names: Vec<_> = registry
        .list_active()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.record.name)
        .collect();
    assert_eq!(names, vec!["rpi1", "rpi2"]);
}

#[tokio::test]
async fn test_missing_required_fields_rejected_before_queue_access() {
    let (store, registry) = setup();
    store.set_fail_receive(true);

    let mut record = rpi1();
    record.signing_key.clear();
    let err = registry.register(record).await.unwrap_err();

    assert!(matches!(err, DispatchError::InvalidInput(_)));
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_insert_failure_is_retryable_internal_error() {
    let (store, registry) = setup();
    store.set_fail_enqueue(true);

    let err = registry.register(rpi1()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 500);

    store.set_fail_enqueue(false);
    registry.register(rpi1()).await.unwrap();
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_update_keeps_expiry() {
    let (_store, registry) = setup();
    let registered = registry.register(rpi1()).await.unwrap();

    let entry = registry.list_active().await.unwrap().remove(0);
    registry.set_busy(&entry, true).await.unwrap();

    let after = registry.list_active().await.unwrap().remove(0);
    assert!(after.record.busy);
    assert_eq!(after.expires_at, registered.expires_at);
}

#[tokio::test]
async fn test_remove_deletes_entry() {
    let (store, registry) = setup();
    registry.register(rpi1()).await.unwrap();

    let entry = registry.list_active().await.unwrap().remove(0);
    registry.remove(&entry).await.unwrap();

    assert!(store.is_empty().await);
    assert!(registry.list_active().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_report_releases_busy_node() {
    let (_store, registry) = setup();
    registry.register(rpi1().with_busy(true)).await.unwrap();

    registry.report(rpi1().with_busy(false)).await.unwrap();

    let entry = registry.list_active().await.unwrap().remove(0);
    assert!(!entry.record.busy);
}

#[tokio::test]
async fn test_report_for_unknown_node_is_not_found() {
    let (_store, registry) = setup();
    registry.register(rpi1()).await.unwrap();

    let stranger = NodeRecord::new("10.0.0.7", "k7").unwrap().with_name("rpi7");
    let err = registry.report(stranger).await.unwrap_err();
    assert!(matches!(err, DispatchError::MessageNotFound(_)));
}

#[tokio::test]
async fn test_listing_does_not_hide_entries() {
    let (store, registry) = setup();
    registry.register(rpi1()).await.unwrap();

    // Back-to-back listings, as a registration followed by a dispatch does
    assert_eq!(registry.list_active().await.unwrap().len(), 1);
    assert_eq!(registry.list_active().await.unwrap().len(), 1);

    // Nothing stays leased for other readers either
    let raw = store.receive(32, Duration::ZERO).await.unwrap();
    assert_eq!(raw.len(), 1);
}

#[tokio::test]
async fn test_listing_pages_with_long_lease() {
    let store = Arc::new(InMemoryQueueStore::new());
    let registry = NodeRegistry::new(
        store.clone(),
        RegistryConfig {
            list_visibility: Duration::from_secs(60),
            receive_batch: 2,
        },
    );
    for i in 0..5 {
        registry
            .register(
                NodeRecord::new(&format!("10.0.2.{}", i), "k")
                    .unwrap()
                    .with_name(&format!("n{}", i)),
            )
            .await
            .unwrap();
    }

    let first = registry.list_active().await.unwrap();
    let second = registry.list_active().await.unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(second.len(), 5);

    // Handles from the latest listing stay usable
    registry.set_busy(&second[4], true).await.unwrap();
    assert!(registry.list_active().await.unwrap()[4].record.busy);
}

#[tokio::test]
async fn test_registrar_status_codes() {
    let (_store, registry) = setup();
    let body = r#"{"node_name":"rpi1","node_sig_key":"k1","listen_port":5000}"#;

    let first = handle_register(&registry, body, Some("10.0.0.1")).await;
    assert_eq!(first.status_code, 200);
    assert_eq!(first.body, "OK");

    let repeat = handle_register(&registry, body, Some("10.0.0.1")).await;
    assert_eq!(repeat.status_code, 409);

    let moved = handle_register(&registry, body, Some("10.0.0.50")).await;
    assert_eq!(moved.status_code, 409);
    assert!(moved.body.contains("different IP"));

    let no_ip = handle_register(&registry, body, None).await;
    assert_eq!(no_ip.status_code, 400);

    let entry = registry.list_active().await.unwrap().remove(0);
    assert_eq!(entry.record.ip, "10.0.0.1");
    assert_eq!(entry.record.port, 5000);

    let report = handle_report(
        &registry,
        r#"{"node_name":"rpi1","node_sig_key":"k1","listen_port":5000,"busy":true}"#,
        Some("10.0.0.1"),
    )
    .await;
    assert_eq!(report.status_code, 200);
    assert!(registry.list_active().await.unwrap()[0].record.busy);
}
