//! Idempotency ledger: durable set of already-processed event ids.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Check whether an event has already been processed
pub async fn exists(pool: &PgPool, event_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1)",
    )
    .bind(event_id)
    .fetch_one(pool)
    .await?;

    Ok(result)
}

/// Record a processed event within the workflow transaction.
///
/// ON CONFLICT DO NOTHING keeps redeliveries racing past the exists() check
/// from failing the whole unit of work.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    event_name: &str,
    processed_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO processed_events (event_id, event_name, processed_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event_id)
    .bind(event_name)
    .bind(processed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
