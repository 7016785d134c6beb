use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::Shipment;

const SELECT_COLUMNS: &str = "shipping_id, order_id, user_id, line1, line2, city, state, \
     postal_code, country, shipping_method, carrier, created_at";

/// Insert a shipment within the workflow transaction.
///
/// The UNIQUE constraint on order_id is the last line of defense against two
/// concurrently processed events for the same order; the loser's transaction
/// fails and rolls back whole.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    shipment: &Shipment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO shipments
            (shipping_id, order_id, user_id, line1, line2, city, state,
             postal_code, country, shipping_method, carrier, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(shipment.shipping_id)
    .bind(shipment.order_id)
    .bind(shipment.user_id)
    .bind(&shipment.address.line1)
    .bind(&shipment.address.line2)
    .bind(&shipment.address.city)
    .bind(&shipment.address.state)
    .bind(&shipment.address.postal_code)
    .bind(&shipment.address.country)
    .bind(&shipment.shipping_method)
    .bind(&shipment.carrier)
    .bind(shipment.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn find_by_id(pool: &PgPool, shipping_id: Uuid) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as::<_, Shipment>(&format!(
        "SELECT {SELECT_COLUMNS} FROM shipments WHERE shipping_id = $1"
    ))
    .bind(shipping_id)
    .fetch_optional(pool)
    .await
}

pub async fn find_first_by_order_id(
    pool: &PgPool,
    order_id: Uuid,
) -> Result<Option<Shipment>, sqlx::Error> {
    sqlx::query_as::<_, Shipment>(&format!(
        "SELECT {SELECT_COLUMNS} FROM shipments WHERE order_id = $1 ORDER BY created_at ASC LIMIT 1"
    ))
    .bind(order_id)
    .fetch_optional(pool)
    .await
}
