//! Stock level and availability endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::StoreId;
use domain::{AuditEntry, StockAvailability, StockLevel};
use serde::{Deserialize, Serialize};
use stock_store::StockStore;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::ItemParams;

#[derive(Deserialize)]
pub struct StockLevelRequest {
    #[serde(flatten)]
    pub item: ItemParams,
    pub total_quantity: i64,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Deserialize)]
pub struct AdjustStockRequest {
    #[serde(flatten)]
    pub item: ItemParams,
    pub delta: i64,
    pub actor: Option<String>,
}

#[derive(Serialize)]
pub struct AdjustStockResponse {
    pub total_quantity: i64,
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

/// PUT /stores/{store_id}/stock — set the on-hand quantity for an item.
#[tracing::instrument(skip(state, req))]
pub async fn upsert<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Json(req): Json<StockLevelRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    if req.total_quantity < 0 {
        return Err(ApiError::BadRequest(
            "total_quantity must not be negative".to_string(),
        ));
    }
    let mut level = StockLevel::new(StoreId::from_uuid(store_id), req.item.item(), req.total_quantity);
    if let Some(threshold) = req.low_stock_threshold {
        level = level.with_low_stock_threshold(threshold);
    }
    state.reservations.set_stock_level(level.clone()).await?;
    Ok(Json(level))
}

/// POST /stores/{store_id}/stock/adjust — apply a manual delta.
#[tracing::instrument(skip(state, req))]
pub async fn adjust<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Json(req): Json<AdjustStockRequest>,
) -> Result<Json<AdjustStockResponse>, ApiError> {
    let total_quantity = state
        .reservations
        .adjust_stock(
            StoreId::from_uuid(store_id),
            req.item.item(),
            req.delta,
            req.actor.as_deref(),
        )
        .await?;
    Ok(Json(AdjustStockResponse { total_quantity }))
}

/// GET /stores/{store_id}/availability — availability snapshot for an item.
pub async fn availability<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Query(params): Query<ItemParams>,
) -> Result<Json<StockAvailability>, ApiError> {
    let availability = state
        .reservations
        .availability(StoreId::from_uuid(store_id), params.item())
        .await?;
    Ok(Json(availability))
}

/// GET /stores/{store_id}/audit — recent audit entries, newest first.
pub async fn audit<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let trail = state
        .reservations
        .audit_trail(StoreId::from_uuid(store_id), query.limit.unwrap_or(50))
        .await?;
    Ok(Json(trail))
}
