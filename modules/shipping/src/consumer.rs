//! OrderCompleted consumer.
//!
//! Bridges the bus delivery model to the shipment workflow: decode, process,
//! and on failure dead-letter instead of requeueing. Skips (shape mismatch,
//! duplicates, already-fulfilled orders) are acknowledged by simply moving on
//! to the next message.

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventBus, EventEnvelope};
use futures::StreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::Instrument;

use crate::contracts::ORDER_COMPLETED_SUBJECT;
use crate::dlq;
use crate::service::{self, Outcome, ShippingError};

/// Start the OrderCompleted consumer task
pub async fn start_order_completed_consumer(bus: Arc<dyn EventBus>, pool: PgPool) {
    tokio::spawn(async move {
        tracing::info!("starting OrderCompleted consumer");

        let mut stream = match bus.subscribe(ORDER_COMPLETED_SUBJECT).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(subject = ORDER_COMPLETED_SUBJECT, error = %e, "subscribe failed");
                return;
            }
        };

        tracing::info!(subject = ORDER_COMPLETED_SUBJECT, "subscribed");

        let retry_config = RetryConfig::default();

        while let Some(msg) = stream.next().await {
            let span = tracing::info_span!(
                "process_order_completed",
                subject = %msg.subject,
                payload_bytes = msg.payload.len()
            );

            async {
                let pool = pool.clone();
                let msg_clone = msg.clone();

                let result = retry_with_backoff(
                    || {
                        let pool = pool.clone();
                        let msg = msg_clone.clone();
                        async move { process_message(&pool, &msg).await }
                    },
                    &retry_config,
                    "order_completed_consumer",
                )
                .await;

                if let Err(error) = result {
                    tracing::error!(
                        error = %error,
                        retry_count = retry_config.max_attempts,
                        "message processing failed, dead-lettering"
                    );

                    dlq::dead_letter(
                        &pool,
                        bus.as_ref(),
                        &msg,
                        &error.to_string(),
                        retry_config.max_attempts as i32,
                    )
                    .await;
                }
            }
            .instrument(span)
            .await;
        }

        tracing::warn!("OrderCompleted consumer stopped");
    });
}

/// Decode and process one message.
///
/// A malformed envelope is an error (poison message); a well-formed envelope
/// for an unrecognized shape is not.
async fn process_message(pool: &PgPool, msg: &BusMessage) -> Result<(), ProcessingError> {
    let envelope: EventEnvelope<serde_json::Value> = EventEnvelope::decode(&msg.payload)
        .map_err(|e| ProcessingError::Malformed(e.to_string()))?;

    let outcome = service::process_order_completed(pool, &envelope)
        .await
        .map_err(|e| match e {
            ShippingError::Payload(_) | ShippingError::Encode(_) => {
                ProcessingError::Malformed(e.to_string())
            }
            ShippingError::Database(_) => ProcessingError::Storage(e.to_string()),
        })?;

    match outcome {
        Outcome::Created {
            shipping_id,
            sequence,
        } => {
            tracing::info!(%shipping_id, sequence, "order completed event handled");
        }
        Outcome::AlreadyFulfilled | Outcome::DuplicateEvent | Outcome::ShapeMismatch => {
            tracing::debug!(?outcome, "event skipped");
        }
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum ProcessingError {
    /// Undecodable or semantically invalid message; retrying will not help
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Transient storage failure; worth retrying before dead-lettering
    #[error("storage failure: {0}")]
    Storage(String),
}
