//! Shipment workflow: turns an inbound OrderCompleted event into at most one
//! shipment and exactly one outbound ShippingCreated event.
//!
//! The durable writes (shipment, sequence counter, outbox row, processed
//! marker) commit in a single transaction. A crash or storage failure at any
//! point rolls back the whole unit of work: no shipment without its sequence,
//! no sequence without its idempotency marker, no half-published event.

use chrono::Utc;
use event_bus::EventEnvelope;
use sqlx::PgPool;
use uuid::Uuid;

use crate::contracts::{
    OrderCompletedPayload, ShippingCreatedPayload, ORDER_COMPLETED_NAME, ORDER_COMPLETED_VERSION,
    PRODUCER, SHIPPING_CREATED_NAME, SHIPPING_CREATED_SCHEMA, SHIPPING_CREATED_SUBJECT,
    SHIPPING_CREATED_VERSION,
};
use crate::models::{Address, Shipment};
use crate::repos::{outbox_repo, processed_repo, sequence_repo, shipment_repo};

/// Errors that can occur while processing an OrderCompleted event
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    /// Envelope matched the expected shape but its payload did not parse.
    /// Not retriable; the message is poison.
    #[error("invalid OrderCompleted payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("failed to encode outbound envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Storage failure during the unit of work. Retriable.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How a message was disposed of. Every variant is acknowledged upstream;
/// failures surface as `ShippingError` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Shipment created and ShippingCreated enqueued for publication
    Created { shipping_id: Uuid, sequence: i64 },
    /// A shipment already existed for this order; event marked processed
    AlreadyFulfilled,
    /// Event id already in the ledger; no side effects
    DuplicateEvent,
    /// Not an OrderCompleted v1 envelope; no side effects
    ShapeMismatch,
}

/// Process one inbound envelope.
///
/// The envelope arrives with an untyped payload so that shape mismatches can
/// be skipped silently instead of failing deserialization.
pub async fn process_order_completed(
    pool: &PgPool,
    envelope: &EventEnvelope<serde_json::Value>,
) -> Result<Outcome, ShippingError> {
    if !envelope.is(ORDER_COMPLETED_NAME, ORDER_COMPLETED_VERSION) {
        tracing::debug!(
            event_name = %envelope.event_name,
            event_version = envelope.event_version,
            "ignoring event with unexpected shape"
        );
        return Ok(Outcome::ShapeMismatch);
    }

    let payload: OrderCompletedPayload =
        serde_json::from_value(envelope.payload.clone()).map_err(ShippingError::Payload)?;

    // Dedupe by event id when the producer supplied one
    if let Some(event_id) = envelope.event_id {
        if processed_repo::exists(pool, event_id).await? {
            tracing::info!(event_id = %event_id, "duplicate event ignored (already processed)");
            return Ok(Outcome::DuplicateEvent);
        }
    }

    // Second line of defense: a duplicate may arrive under a different
    // transport id after the shipment already exists. Skip creation but still
    // record the event id.
    if shipment_repo::find_first_by_order_id(pool, payload.order_id)
        .await?
        .is_some()
    {
        let mut tx = pool.begin().await?;
        mark_processed(&mut tx, envelope).await?;
        tx.commit().await?;
        tracing::info!(
            order_id = %payload.order_id,
            "shipment already exists for order, marking event processed"
        );
        return Ok(Outcome::AlreadyFulfilled);
    }

    let mut tx = pool.begin().await?;

    let now = Utc::now();
    let shipment = Shipment {
        shipping_id: Uuid::new_v4(),
        order_id: payload.order_id,
        user_id: payload.user_id,
        address: default_address(),
        shipping_method: "standard".to_string(),
        carrier: "PostNord".to_string(),
        created_at: now,
    };
    shipment_repo::insert(&mut tx, &shipment).await?;

    let partition_key = resolve_partition_key(&envelope.partition_key, payload.order_id);
    let sequence = sequence_repo::next(&mut tx, &partition_key).await?;

    let outbound = EventEnvelope::new(
        SHIPPING_CREATED_NAME,
        SHIPPING_CREATED_VERSION,
        PRODUCER,
        ShippingCreatedPayload {
            shipping_id: shipment.shipping_id,
            order_id: shipment.order_id,
            user_id: shipment.user_id,
            address: shipment.address.clone(),
            shipping_method: shipment.shipping_method.clone(),
            carrier: shipment.carrier.clone(),
            created_at: now,
        },
    )
    .with_correlation_id(envelope.correlation_id)
    .with_causation_id(envelope.event_id)
    .with_partition_key(partition_key.clone())
    .with_sequence(sequence as u64)
    .with_schema(SHIPPING_CREATED_SCHEMA);

    let outbound_json = serde_json::to_value(&outbound).map_err(ShippingError::Encode)?;
    outbox_repo::enqueue(&mut tx, SHIPPING_CREATED_SUBJECT, &outbound_json).await?;

    mark_processed(&mut tx, envelope).await?;

    tx.commit().await?;

    tracing::info!(
        shipping_id = %shipment.shipping_id,
        order_id = %shipment.order_id,
        partition_key = %partition_key,
        sequence,
        "shipment created, ShippingCreated enqueued"
    );

    Ok(Outcome::Created {
        shipping_id: shipment.shipping_id,
        sequence,
    })
}

/// Envelope partition key when present, else the order id groups the stream.
fn resolve_partition_key(envelope_key: &str, order_id: Uuid) -> String {
    if envelope_key.trim().is_empty() {
        order_id.to_string()
    } else {
        envelope_key.to_string()
    }
}

/// Current business defaults for synthesized shipments
fn default_address() -> Address {
    Address {
        line1: "123 Market St".to_string(),
        line2: None,
        city: "Aarhus".to_string(),
        state: "DK".to_string(),
        postal_code: "8000".to_string(),
        country: "DK".to_string(),
    }
}

async fn mark_processed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    envelope: &EventEnvelope<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    // Events without an id cannot be deduplicated by ledger; the
    // existing-shipment check covers them.
    if let Some(event_id) = envelope.event_id {
        processed_repo::insert(tx, event_id, &envelope.event_name, Utc::now()).await?;
    }
    Ok(())
}
