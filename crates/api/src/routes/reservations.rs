//! Reservation lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CartId, ReservationId, StoreId};
use domain::{Reservation, ReservationRequest};
use serde::{Deserialize, Serialize};
use stock_store::{ReservationBatch, StockStore};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::ItemParams;

#[derive(Deserialize)]
pub struct ReservationLineRequest {
    #[serde(flatten)]
    pub item: ItemParams,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct CreateReservationsRequest {
    pub items: Vec<ReservationLineRequest>,
    pub cart_id: Option<Uuid>,
    pub ttl_minutes: Option<i64>,
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub minutes: i64,
}

#[derive(Serialize)]
pub struct ReleasedResponse {
    pub released: u64,
}

/// POST /stores/{store_id}/reservations — create a batch of holds.
///
/// Partial success returns 201 with the failed lines listed; a batch in
/// which every line failed returns 409 with the same body.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(store_id): Path<Uuid>,
    Json(req): Json<CreateReservationsRequest>,
) -> Result<(StatusCode, Json<ReservationBatch>), ApiError> {
    let requests: Vec<ReservationRequest> = req
        .items
        .iter()
        .map(|line| ReservationRequest::new(line.item.item(), line.quantity))
        .collect();

    let batch = state
        .reservations
        .reserve(
            StoreId::from_uuid(store_id),
            &requests,
            req.cart_id.map(CartId::from_uuid),
            req.ttl_minutes,
        )
        .await?;

    let status = if batch.all_failed() {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(batch)))
}

/// GET /stores/{store_id}/reservations/{id} — read one reservation.
pub async fn get<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Reservation>, ApiError> {
    state
        .reservations
        .reservation(StoreId::from_uuid(store_id), ReservationId::from_uuid(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("reservation not found: {id}")))
}

/// DELETE /stores/{store_id}/reservations/{id} — release one hold.
///
/// Releasing a reservation that is already gone or terminal is a no-op,
/// so repeated deletes all return 204.
#[tracing::instrument(skip(state))]
pub async fn release<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .reservations
        .release(StoreId::from_uuid(store_id), ReservationId::from_uuid(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /stores/{store_id}/reservations/{id}/extend — extend the hold once.
#[tracing::instrument(skip(state, req))]
pub async fn extend<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = state
        .reservations
        .extend(
            StoreId::from_uuid(store_id),
            ReservationId::from_uuid(id),
            req.minutes,
        )
        .await?;
    Ok(Json(reservation))
}

/// DELETE /stores/{store_id}/carts/{cart_id}/reservations — release every
/// active hold of a cart.
#[tracing::instrument(skip(state))]
pub async fn release_cart<S: StockStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((store_id, cart_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReleasedResponse>, ApiError> {
    let released = state
        .reservations
        .release_cart(StoreId::from_uuid(store_id), CartId::from_uuid(cart_id))
        .await?;
    Ok(Json(ReleasedResponse { released }))
}
