//! Read endpoints over the shipment store.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Shipment;
use crate::repos::shipment_repo;

pub fn shipping_router(pool: PgPool) -> Router {
    Router::new()
        .route("/api/shipping/{shipping_id}", get(get_by_id))
        .route("/api/shipping/by-order/{order_id}", get(get_by_order))
        .with_state(pool)
}

async fn get_by_id(
    State(pool): State<PgPool>,
    Path(shipping_id): Path<Uuid>,
) -> Result<Json<Shipment>, StatusCode> {
    let shipment = shipment_repo::find_by_id(&pool, shipping_id)
        .await
        .map_err(|e| {
            tracing::error!(%shipping_id, error = %e, "shipment lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    shipment.map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_by_order(
    State(pool): State<PgPool>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Shipment>, StatusCode> {
    let shipment = shipment_repo::find_first_by_order_id(&pool, order_id)
        .await
        .map_err(|e| {
            tracing::error!(%order_id, error = %e, "shipment lookup by order failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    shipment.map(Json).ok_or(StatusCode::NOT_FOUND)
}
