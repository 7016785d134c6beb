//! Transactional outbox for outbound events.
//!
//! The workflow enqueues the outbound envelope in the same transaction as the
//! shipment, sequence, and idempotency writes; the background relay
//! (`publisher::run_relay`) publishes pending rows to the bus afterwards.
//! This closes the dual-write window between the durable store and the
//! transport: a crashed publish is retried on the next relay pass, a rolled
//! back workflow leaves nothing to publish.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub subject: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Enqueue an encoded envelope for publication to `subject`.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    subject: &str,
    payload: &serde_json::Value,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO events_outbox (subject, payload)
        VALUES ($1, $2)
        RETURNING id
        "#,
    )
    .bind(subject)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await?;

    tracing::debug!(outbox_id = id, subject = %subject, "enqueued outbound event");

    Ok(id)
}

/// Fetch and lock unpublished rows in insertion order.
///
/// Insertion order is commit order per partition (the sequence row lock is
/// held across the outbox insert), so publishing in id order preserves the
/// per-partition sequence order downstream.
///
/// SKIP LOCKED confines each batch to one relay: rows claimed by another
/// instance's in-flight transaction are passed over instead of republished.
pub async fn fetch_unpublished(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<OutboxRecord>, sqlx::Error> {
    sqlx::query_as::<_, OutboxRecord>(
        r#"
        SELECT id, subject, payload, created_at, published_at
        FROM events_outbox
        WHERE published_at IS NULL
        ORDER BY id ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
}

pub async fn mark_published(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE events_outbox SET published_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
