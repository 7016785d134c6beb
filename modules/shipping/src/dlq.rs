//! Dead-letter handling.
//!
//! Rejected messages go two places: a durable `failed_events` row (when
//! enough metadata can be extracted) and the `shipping.dlq` subject verbatim.
//! The observer task consumes the DLQ subject purely for visibility; replay
//! is an external, operator-driven action.

use event_bus::{BusMessage, EventBus};
use futures::StreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::contracts::SHIPPING_DLQ_SUBJECT;
use crate::repos::failed_repo;

/// Dead-letter a message that exhausted its retries.
///
/// Best-effort on both legs; a failure to archive or republish is logged
/// loudly but must not take the consumer down.
pub async fn dead_letter(
    pool: &PgPool,
    bus: &dyn EventBus,
    msg: &BusMessage,
    error: &str,
    retry_count: i32,
) {
    match serde_json::from_slice::<serde_json::Value>(&msg.payload) {
        Ok(envelope) => {
            let event_id = envelope
                .get("eventId")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());

            match event_id {
                Some(event_id) => {
                    if let Err(db_err) =
                        failed_repo::insert(pool, event_id, &msg.subject, &envelope, error, retry_count)
                            .await
                    {
                        tracing::error!(
                            event_id = %event_id,
                            subject = %msg.subject,
                            error = %error,
                            db_error = %db_err,
                            "failed to archive dead-lettered event"
                        );
                    } else {
                        tracing::error!(
                            event_id = %event_id,
                            subject = %msg.subject,
                            retry_count,
                            error = %error,
                            "event dead-lettered"
                        );
                    }
                }
                None => {
                    tracing::error!(
                        subject = %msg.subject,
                        error = %error,
                        "dead-lettered event has no eventId, skipping archive"
                    );
                }
            }
        }
        Err(parse_err) => {
            tracing::error!(
                subject = %msg.subject,
                error = %error,
                parse_error = %parse_err,
                "dead-lettered message is not valid JSON, skipping archive"
            );
        }
    }

    // Forward the original bytes untouched so operators see exactly what the
    // consumer saw.
    if let Err(publish_err) = bus.publish(SHIPPING_DLQ_SUBJECT, msg.payload.clone()).await {
        tracing::error!(
            subject = %msg.subject,
            dlq_subject = SHIPPING_DLQ_SUBJECT,
            error = %publish_err,
            "failed to forward message to DLQ subject"
        );
    }
}

/// Start the DLQ observer task.
///
/// Logs every dead-lettered payload and its size; performs no business logic
/// and never errors on malformed payloads.
pub async fn start_dlq_observer(bus: Arc<dyn EventBus>) {
    tokio::spawn(async move {
        let mut stream = match bus.subscribe(SHIPPING_DLQ_SUBJECT).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = SHIPPING_DLQ_SUBJECT, error = %e, "DLQ subscribe failed");
                return;
            }
        };

        tracing::info!(subject = SHIPPING_DLQ_SUBJECT, "DLQ observer subscribed");

        while let Some(msg) = stream.next().await {
            tracing::error!(
                bytes = msg.payload.len(),
                payload = %String::from_utf8_lossy(&msg.payload),
                "DLQ message received"
            );
        }

        tracing::warn!("DLQ observer stopped");
    });
}
