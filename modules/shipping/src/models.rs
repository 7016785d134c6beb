use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Postal address embedded in shipments and outbound payloads
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Shipment domain record.
///
/// Created exactly once per order by the workflow; never mutated afterwards.
/// The address columns are flattened into the shipments table.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub shipping_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(flatten)]
    pub address: Address,
    pub shipping_method: String,
    pub carrier: String,
    pub created_at: DateTime<Utc>,
}
