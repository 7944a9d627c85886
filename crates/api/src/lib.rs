//! HTTP API server with observability for the inventory reservation
//! engine.
//!
//! Provides REST endpoints for stock levels, reservations, and orders,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use inventory::ReservationService;
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{LoggingNotificationService, OrderCommitService};
use stock_store::StockStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: StockStore> {
    pub reservations: ReservationService<S>,
    pub orders: OrderCommitService<S>,
}

/// Creates application state over one store, using the logging
/// notification service.
pub fn create_state<S: StockStore + Clone + 'static>(
    store: S,
    default_ttl_minutes: i64,
) -> Result<Arc<AppState<S>>, inventory::InventoryError> {
    let reservations = ReservationService::new(store.clone(), default_ttl_minutes)?;
    let orders = OrderCommitService::new(store, Arc::new(LoggingNotificationService::new()));
    Ok(Arc::new(AppState {
        reservations,
        orders,
    }))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: StockStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/stores/{store_id}/stock", put(routes::stock::upsert::<S>))
        .route(
            "/stores/{store_id}/stock/adjust",
            post(routes::stock::adjust::<S>),
        )
        .route(
            "/stores/{store_id}/availability",
            get(routes::stock::availability::<S>),
        )
        .route("/stores/{store_id}/audit", get(routes::stock::audit::<S>))
        .route(
            "/stores/{store_id}/reservations",
            post(routes::reservations::create::<S>),
        )
        .route(
            "/stores/{store_id}/reservations/{id}",
            get(routes::reservations::get::<S>).delete(routes::reservations::release::<S>),
        )
        .route(
            "/stores/{store_id}/reservations/{id}/extend",
            post(routes::reservations::extend::<S>),
        )
        .route(
            "/stores/{store_id}/carts/{cart_id}/reservations",
            delete(routes::reservations::release_cart::<S>),
        )
        .route("/stores/{store_id}/orders", post(routes::orders::commit::<S>))
        .route(
            "/stores/{store_id}/orders/by-key/{key}",
            get(routes::orders::get_by_key::<S>),
        )
        .route(
            "/stores/{store_id}/orders/{id}",
            get(routes::orders::get::<S>).delete(routes::orders::delete::<S>),
        )
        .route(
            "/stores/{store_id}/orders/{id}/status",
            put(routes::orders::update_status::<S>),
        )
        .route(
            "/stores/{store_id}/orders/{id}/cancel",
            post(routes::orders::cancel::<S>),
        )
        .route(
            "/stores/{store_id}/orders/{id}/refund",
            post(routes::orders::refund::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
