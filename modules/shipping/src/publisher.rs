//! Outbox relay: background task that publishes committed outbox rows.

use event_bus::EventBus;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::repos::outbox_repo;

const BATCH_SIZE: i64 = 100;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run the relay loop. Never returns; spawn it.
pub async fn run_relay(pool: PgPool, bus: Arc<dyn EventBus>) {
    tracing::info!("starting outbox relay");

    loop {
        match publish_pending(&pool, &bus).await {
            Ok(count) if count > 0 => {
                tracing::debug!(count, "published events from outbox");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "outbox relay pass failed");
            }
        }

        sleep(POLL_INTERVAL).await;
    }
}

/// Publish pending outbox rows in id order.
///
/// The batch is claimed with row locks (SKIP LOCKED) inside one transaction,
/// so concurrent relay instances never pick up the same rows. Publication is
/// at-least-once: a crash between publish and commit republishes the batch on
/// the next pass, and downstream consumers dedupe by event id. A publish
/// failure stops the batch so ordering is never violated by skipping ahead.
async fn publish_pending(pool: &PgPool, bus: &Arc<dyn EventBus>) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let records = outbox_repo::fetch_unpublished(&mut tx, BATCH_SIZE).await?;

    let mut published = 0;

    for record in records {
        let payload = match serde_json::to_vec(&record.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(outbox_id = record.id, error = %e, "unserializable outbox row");
                break;
            }
        };

        match bus.publish(&record.subject, payload).await {
            Ok(()) => {
                outbox_repo::mark_published(&mut tx, record.id).await?;
                published += 1;
                tracing::trace!(outbox_id = record.id, subject = %record.subject, "published");
            }
            Err(e) => {
                tracing::error!(
                    outbox_id = record.id,
                    subject = %record.subject,
                    error = %e,
                    "publish failed, will retry next pass"
                );
                break;
            }
        }
    }

    tx.commit().await?;

    Ok(published)
}
