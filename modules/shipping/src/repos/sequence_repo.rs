//! Per-partition monotonic sequence allocator.
//!
//! Counters live in the `event_sequences` table, one row per partition key,
//! starting at 1. Allocation is a read-increment-write under a row-level
//! exclusive lock, so concurrent workers for the same key serialize while
//! different keys never block each other. Because the lock is held until the
//! caller's transaction commits, allocation order equals commit order per
//! partition, which is what makes the downstream sequence gap-free.

use sqlx::{Postgres, Transaction};

/// Allocate the next sequence number for `partition_key`.
///
/// Must run inside the workflow transaction: a rollback returns the number
/// to the counter, so failed deliveries never burn sequence values.
pub async fn next(
    tx: &mut Transaction<'_, Postgres>,
    partition_key: &str,
) -> Result<i64, sqlx::Error> {
    // Create the counter row on first sight of a partition key. DO NOTHING on
    // conflict: a concurrent creator is fine, the FOR UPDATE below serializes.
    sqlx::query(
        r#"
        INSERT INTO event_sequences (partition_key, next_sequence)
        VALUES ($1, 1)
        ON CONFLICT (partition_key) DO NOTHING
        "#,
    )
    .bind(partition_key)
    .execute(&mut **tx)
    .await?;

    let current = sqlx::query_scalar::<_, i64>(
        "SELECT next_sequence FROM event_sequences WHERE partition_key = $1 FOR UPDATE",
    )
    .bind(partition_key)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query("UPDATE event_sequences SET next_sequence = next_sequence + 1 WHERE partition_key = $1")
        .bind(partition_key)
        .execute(&mut **tx)
        .await?;

    Ok(current)
}
