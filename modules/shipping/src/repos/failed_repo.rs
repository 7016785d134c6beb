//! Durable record of dead-lettered events.

use sqlx::PgPool;
use uuid::Uuid;

/// Archive a failed event so nothing is dropped without a trace.
///
/// Upserts on event_id: a redelivered poison message refreshes the error and
/// retry count instead of failing the insert.
pub async fn insert(
    pool: &PgPool,
    event_id: Uuid,
    subject: &str,
    envelope: &serde_json::Value,
    error: &str,
    retry_count: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO failed_events (event_id, subject, envelope, error, retry_count)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (event_id) DO UPDATE
        SET retry_count = EXCLUDED.retry_count,
            error = EXCLUDED.error,
            failed_at = NOW()
        "#,
    )
    .bind(event_id)
    .bind(subject)
    .bind(envelope)
    .bind(error)
    .bind(retry_count)
    .execute(pool)
    .await?;

    Ok(())
}
