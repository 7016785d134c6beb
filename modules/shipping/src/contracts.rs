//! Event contracts consumed and produced by the shipping service.
//!
//! Payload wire names are camelCase to match the platform contract schemas
//! referenced by the `schema` envelope field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Address;

/// Logical producer name stamped on outbound envelopes
pub const PRODUCER: &str = "shipping-service";

pub const ORDER_COMPLETED_NAME: &str = "OrderCompleted";
pub const ORDER_COMPLETED_VERSION: u32 = 1;

pub const SHIPPING_CREATED_NAME: &str = "ShippingCreated";
pub const SHIPPING_CREATED_VERSION: u32 = 1;
pub const SHIPPING_CREATED_SCHEMA: &str =
    "contracts/events/shipping/ShippingCreated.v1.payload.schema.json";

/// Inbound subject carrying OrderCompleted events
pub const ORDER_COMPLETED_SUBJECT: &str = "orders.events.completed";

/// Outbound subject for ShippingCreated events
pub const SHIPPING_CREATED_SUBJECT: &str = "shipping.events.created";

/// Dead-letter subject; rejected inbound messages land here verbatim
pub const SHIPPING_DLQ_SUBJECT: &str = "shipping.dlq";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompletedPayload {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingCreatedPayload {
    pub shipping_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub address: Address,
    pub shipping_method: String,
    pub carrier: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_completed_payload_parses_camel_case() {
        let json = r#"{
            "orderId": "11111111-1111-1111-1111-111111111111",
            "userId": "22222222-2222-2222-2222-222222222222",
            "timestamp": "2024-05-01T12:00:00Z"
        }"#;

        let payload: OrderCompletedPayload = serde_json::from_str(json).unwrap();
        assert_eq!(
            payload.order_id,
            "11111111-1111-1111-1111-111111111111".parse::<Uuid>().unwrap()
        );
    }

    #[test]
    fn shipping_created_payload_serializes_nested_address() {
        let payload = ShippingCreatedPayload {
            shipping_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            address: Address {
                line1: "123 Market St".to_string(),
                line2: None,
                city: "Aarhus".to_string(),
                state: "DK".to_string(),
                postal_code: "8000".to_string(),
                country: "DK".to_string(),
            },
            shipping_method: "standard".to_string(),
            carrier: "PostNord".to_string(),
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["address"]["postalCode"], "8000");
        assert_eq!(value["shippingMethod"], "standard");
        assert_eq!(value["carrier"], "PostNord");
    }
}
