//! Workflow and dispatcher behavior against a real database.
//!
//! Requires Postgres (see tests/common). Run with:
//! cargo test --package shipping-rs --test pipeline_test -- --ignored

mod common;

use common::{clean_tables, count, order_completed_envelope, setup_test_pool};
use event_bus::{EventBus, EventEnvelope, InMemoryBus};
use futures::StreamExt;
use serial_test::serial;
use shipping_rs::contracts::{
    ShippingCreatedPayload, ORDER_COMPLETED_SUBJECT, SHIPPING_CREATED_SUBJECT,
    SHIPPING_DLQ_SUBJECT,
};
use shipping_rs::repos::{outbox_repo, shipment_repo};
use shipping_rs::service::{process_order_completed, Outcome, ShippingError};
use shipping_rs::{publisher, start_order_completed_consumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn first_delivery_creates_shipment_and_sequenced_event() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let envelope = order_completed_envelope(order_id, user_id, Some(event_id));

    let outcome = process_order_completed(&pool, &envelope).await.unwrap();

    let (shipping_id, sequence) = match outcome {
        Outcome::Created {
            shipping_id,
            sequence,
        } => (shipping_id, sequence),
        other => panic!("expected Created, got {:?}", other),
    };
    assert_eq!(sequence, 1, "fresh partition starts at 1");

    // Domain record persisted with business defaults
    let shipment = shipment_repo::find_first_by_order_id(&pool, order_id)
        .await
        .unwrap()
        .expect("shipment should exist");
    assert_eq!(shipment.shipping_id, shipping_id);
    assert_eq!(shipment.user_id, user_id);
    assert_eq!(shipment.carrier, "PostNord");
    assert_eq!(shipment.shipping_method, "standard");

    // Ledger entry
    let processed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
    )
    .bind(event_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(processed, "event id should be in the ledger");

    // Outbound envelope sits in the outbox with tracing fields propagated
    let (subject, payload): (String, serde_json::Value) =
        sqlx::query_as("SELECT subject, payload FROM events_outbox")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(subject, SHIPPING_CREATED_SUBJECT);

    let outbound: EventEnvelope<ShippingCreatedPayload> =
        serde_json::from_value(payload).unwrap();
    assert!(outbound.is("ShippingCreated", 1));
    assert_eq!(outbound.causation_id, Some(event_id));
    assert_eq!(outbound.correlation_id, envelope.correlation_id);
    assert_eq!(outbound.partition_key, order_id.to_string());
    assert_eq!(outbound.sequence, 1);
    assert_eq!(outbound.producer, "shipping-service");
    assert_eq!(outbound.payload.order_id, order_id);
    assert_ne!(
        outbound.event_id,
        Some(outbound.payload.shipping_id),
        "outbound event id is independent of the shipping id"
    );
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn redelivery_with_same_event_id_has_no_effect() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let envelope = order_completed_envelope(Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4()));

    let first = process_order_completed(&pool, &envelope).await.unwrap();
    assert!(matches!(first, Outcome::Created { .. }));

    let second = process_order_completed(&pool, &envelope).await.unwrap();
    assert_eq!(second, Outcome::DuplicateEvent);

    assert_eq!(count(&pool, "shipments").await, 1);
    assert_eq!(count(&pool, "events_outbox").await, 1);
    assert_eq!(count(&pool, "processed_events").await, 1);
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn different_event_id_for_same_order_is_fulfilled_once() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let first = order_completed_envelope(order_id, user_id, Some(Uuid::new_v4()));
    let second = order_completed_envelope(order_id, user_id, Some(Uuid::new_v4()));

    assert!(matches!(
        process_order_completed(&pool, &first).await.unwrap(),
        Outcome::Created { .. }
    ));
    assert_eq!(
        process_order_completed(&pool, &second).await.unwrap(),
        Outcome::AlreadyFulfilled
    );

    // One shipment, one outbound event, but both event ids recorded
    assert_eq!(count(&pool, "shipments").await, 1);
    assert_eq!(count(&pool, "events_outbox").await, 1);
    assert_eq!(count(&pool, "processed_events").await, 2);
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn concurrent_events_for_same_order_create_one_shipment() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let order_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let first = order_completed_envelope(order_id, user_id, Some(Uuid::new_v4()));
    let second = order_completed_envelope(order_id, user_id, Some(Uuid::new_v4()));

    let pool_a = pool.clone();
    let pool_b = pool.clone();
    let env_a = first.clone();
    let env_b = second.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { process_order_completed(&pool_a, &env_a).await }),
        tokio::spawn(async move { process_order_completed(&pool_b, &env_b).await }),
    );

    // The loser either observed the winner's committed shipment or hit the
    // UNIQUE(order_id) violation; the latter surfaces as a database error
    // that the consumer retries.
    let mut created = 0;
    for result in [a.unwrap(), b.unwrap()] {
        match result {
            Ok(Outcome::Created { .. }) => created += 1,
            Ok(Outcome::AlreadyFulfilled) => {}
            Err(ShippingError::Database(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
    assert_eq!(created, 1, "exactly one event creates the shipment");

    // A losing transaction rolls back whole: no extra sequence or ledger row
    assert_eq!(count(&pool, "shipments").await, 1);
    assert_eq!(count(&pool, "events_outbox").await, 1);
    assert_eq!(count(&pool, "event_sequences").await, 1);

    // Redelivery of either event converges without new side effects
    for envelope in [&first, &second] {
        let retried = process_order_completed(&pool, envelope).await.unwrap();
        assert!(
            matches!(retried, Outcome::AlreadyFulfilled | Outcome::DuplicateEvent),
            "retry must converge, got {:?}",
            retried
        );
    }

    assert_eq!(count(&pool, "shipments").await, 1);
    assert_eq!(count(&pool, "events_outbox").await, 1);
    assert_eq!(count(&pool, "processed_events").await, 2);
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn relay_batches_do_not_overlap_across_instances() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let mut tx = pool.begin().await.unwrap();
    outbox_repo::enqueue(&mut tx, SHIPPING_CREATED_SUBJECT, &serde_json::json!({"n": 1}))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // First relay claims the row for the duration of its transaction
    let mut relay_a = pool.begin().await.unwrap();
    let claimed = outbox_repo::fetch_unpublished(&mut relay_a, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // A second relay running concurrently skips the locked row
    let mut relay_b = pool.begin().await.unwrap();
    let overlap = outbox_repo::fetch_unpublished(&mut relay_b, 10).await.unwrap();
    assert!(overlap.is_empty(), "locked rows must not be claimed twice");
    relay_b.rollback().await.unwrap();

    outbox_repo::mark_published(&mut relay_a, claimed[0].id)
        .await
        .unwrap();
    relay_a.commit().await.unwrap();

    // Nothing left once the first relay commits
    let mut relay_c = pool.begin().await.unwrap();
    let remaining = outbox_repo::fetch_unpublished(&mut relay_c, 10).await.unwrap();
    assert!(remaining.is_empty());
    relay_c.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn unknown_shape_is_acknowledged_without_side_effects() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let mut envelope =
        order_completed_envelope(Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4()));
    envelope.event_name = "OrderCancelled".to_string();

    let outcome = process_order_completed(&pool, &envelope).await.unwrap();
    assert_eq!(outcome, Outcome::ShapeMismatch);

    // Wrong version is also a skip
    let mut versioned =
        order_completed_envelope(Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4()));
    versioned.event_version = 2;
    assert_eq!(
        process_order_completed(&pool, &versioned).await.unwrap(),
        Outcome::ShapeMismatch
    );

    assert_eq!(count(&pool, "shipments").await, 0);
    assert_eq!(count(&pool, "events_outbox").await, 0);
    assert_eq!(count(&pool, "processed_events").await, 0);
    assert_eq!(count(&pool, "event_sequences").await, 0);
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn storage_failure_leaves_no_partial_state() {
    let verify_pool = setup_test_pool().await;
    clean_tables(&verify_pool).await;

    let broken_pool = setup_test_pool().await;
    broken_pool.close().await;

    let envelope =
        order_completed_envelope(Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4()));

    let result = process_order_completed(&broken_pool, &envelope).await;
    assert!(matches!(result, Err(ShippingError::Database(_))));

    assert_eq!(count(&verify_pool, "shipments").await, 0);
    assert_eq!(count(&verify_pool, "processed_events").await, 0);
    assert_eq!(count(&verify_pool, "event_sequences").await, 0);
    assert_eq!(count(&verify_pool, "events_outbox").await, 0);
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn end_to_end_consumer_relay_round_trip() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let mut created_stream = bus.subscribe(SHIPPING_CREATED_SUBJECT).await.unwrap();

    start_order_completed_consumer(bus.clone(), pool.clone()).await;
    let relay_pool = pool.clone();
    let relay_bus = bus.clone();
    tokio::spawn(async move {
        publisher::run_relay(relay_pool, relay_bus).await;
    });

    // Give the consumer time to subscribe
    sleep(Duration::from_millis(500)).await;

    let order_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let envelope = order_completed_envelope(order_id, Uuid::new_v4(), Some(event_id));

    bus.publish(ORDER_COMPLETED_SUBJECT, envelope.encode().unwrap())
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(10), created_stream.next())
        .await
        .expect("timed out waiting for ShippingCreated")
        .expect("stream ended");

    let outbound: EventEnvelope<ShippingCreatedPayload> =
        EventEnvelope::decode(&msg.payload).unwrap();
    assert_eq!(outbound.payload.order_id, order_id);
    assert_eq!(outbound.causation_id, Some(event_id));
    assert_eq!(outbound.sequence, 1);

    // Redeliver the identical message: no second outbound event
    bus.publish(ORDER_COMPLETED_SUBJECT, envelope.encode().unwrap())
        .await
        .unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(count(&pool, "shipments").await, 1);
    assert_eq!(count(&pool, "events_outbox").await, 1);
    let extra = timeout(Duration::from_millis(200), created_stream.next()).await;
    assert!(extra.is_err(), "no second ShippingCreated expected");
}

#[tokio::test]
#[serial]
#[ignore] // requires Postgres
async fn poison_message_is_dead_lettered_verbatim() {
    let pool = setup_test_pool().await;
    clean_tables(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let mut dlq_stream = bus.subscribe(SHIPPING_DLQ_SUBJECT).await.unwrap();

    start_order_completed_consumer(bus.clone(), pool.clone()).await;
    sleep(Duration::from_millis(500)).await;

    // Shape matches but the payload is unusable: orderId is not a UUID
    let event_id = Uuid::new_v4();
    let mut envelope = order_completed_envelope(Uuid::new_v4(), Uuid::new_v4(), Some(event_id));
    envelope.payload = serde_json::json!({
        "orderId": "not-a-uuid",
        "userId": "also-not-a-uuid",
        "timestamp": "2024-05-01T12:00:00Z",
    });
    let bytes = envelope.encode().unwrap();

    bus.publish(ORDER_COMPLETED_SUBJECT, bytes.clone())
        .await
        .unwrap();

    // Retries back off (100ms, 200ms) before dead-lettering
    let msg = timeout(Duration::from_secs(10), dlq_stream.next())
        .await
        .expect("timed out waiting for DLQ message")
        .expect("stream ended");
    assert_eq!(msg.payload, bytes, "DLQ receives the original bytes verbatim");

    // Durable archive captured the failure
    let (archived_subject, error): (String, String) = sqlx::query_as(
        "SELECT subject, error FROM failed_events WHERE event_id = $1",
    )
    .bind(event_id)
    .fetch_one(&pool)
    .await
    .expect("failed event should be archived");
    assert_eq!(archived_subject, ORDER_COMPLETED_SUBJECT);
    assert!(!error.is_empty());

    // And no business side effects happened
    assert_eq!(count(&pool, "shipments").await, 0);
    assert_eq!(count(&pool, "processed_events").await, 0);
}
