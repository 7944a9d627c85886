//! Order commitment and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CartId, Money, OrderId, ProductId, StoreId, VariantId};
use domain::{Order, OrderDraft, OrderItem, OrderStatus};
use serde::{Deserialize, Serialize};
use stock_store::{CommittedOrder, OrderRemoval, StockStore};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct CommitOrderRequest {
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: Option<String>,
    pub payment_method: String,
    pub items: Vec<OrderItemRequest>,
    pub cart_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

impl CommitOrderRequest {
    fn into_draft(self) -> OrderDraft {
        let items = self
            .items
            .into_iter()
            .map(|line| {
                let mut item = OrderItem::new(
                    ProductId::from_uuid(line.product_id),
                    line.variant_id.map(VariantId::from_uuid),
                    line.product_name,
                    line.sku,
                    line.quantity,
                    Money::from_cents(line.unit_price_cents),
                );
                if let Some(url) = line.image_url {
                    item = item.with_image_url(url);
                }
                item
            })
            .collect();
        OrderDraft {
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            shipping_address: self.shipping_address,
            payment_method: self.payment_method,
            items,
            cart_id: self.cart_id.map(CartId::from_uuid),
            idempotency_key: self.idempotency_key,
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    pub actor: Option<String>,
}

#[derive(Serialize)]
pub struct DeleteOrderResponse {
    pub removal: OrderRemoval,
}

/// POST /stores/{store_id}/orders — commit a draft into an order.
///
/// A replay under an idempotency key returns 200 with the original order;
/// a fresh commit returns 201.
#[tracing::instrument(skip(state, req))]
pub async fn commit<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Json(req): Json<CommitOrderRequest>,
) -> Result<(StatusCode, Json<CommittedOrder>), ApiError> {
    let committed = state
        .orders
        .commit(StoreId::from_uuid(store_id), req.into_draft())
        .await?;
    let status = if committed.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(committed)))
}

/// GET /stores/{store_id}/orders/{id} — read one order with its items.
pub async fn get<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, ApiError> {
    state
        .orders
        .order(StoreId::from_uuid(store_id), OrderId::from_uuid(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("order not found: {id}")))
}

/// GET /stores/{store_id}/orders/by-key/{key} — find an order by its
/// idempotency key.
pub async fn get_by_key<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, key)): Path<(Uuid, String)>,
) -> Result<Json<Order>, ApiError> {
    state
        .orders
        .order_by_idempotency_key(StoreId::from_uuid(store_id), &key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no order under key: {key}")))
}

/// PUT /stores/{store_id}/orders/{id}/status — apply a status transition.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let to = OrderStatus::parse(&req.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown order status: {}", req.status)))?;
    let order = state
        .orders
        .update_status(
            StoreId::from_uuid(store_id),
            OrderId::from_uuid(id),
            to,
            req.actor.as_deref(),
        )
        .await?;
    Ok(Json(order))
}

/// POST /stores/{store_id}/orders/{id}/cancel — cancel and restore stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .cancel(StoreId::from_uuid(store_id), OrderId::from_uuid(id), None)
        .await?;
    Ok(Json(order))
}

/// POST /stores/{store_id}/orders/{id}/refund — refund the order.
#[tracing::instrument(skip(state))]
pub async fn refund<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .orders
        .refund(StoreId::from_uuid(store_id), OrderId::from_uuid(id), None)
        .await?;
    Ok(Json(order))
}

/// DELETE /stores/{store_id}/orders/{id} — remove an order.
#[tracing::instrument(skip(state))]
pub async fn delete<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteOrderResponse>, ApiError> {
    let removal = state
        .orders
        .delete(StoreId::from_uuid(store_id), OrderId::from_uuid(id))
        .await?;
    Ok(Json(DeleteOrderResponse { removal }))
}
