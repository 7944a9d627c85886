//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use inventory::InventoryError;
use orders::OrderError;
use stock_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain rule violation.
    Domain(DomainError),
    /// Storage operation failure.
    Store(StoreError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        // Conflicts: the request was well-formed but the current state
        // forbids it.
        DomainError::InvalidTransition { .. } | DomainError::AlreadyExtended { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        DomainError::InvalidQuantity { .. }
        | DomainError::InvalidTtl { .. }
        | DomainError::EmptyBatch
        | DomainError::NoItems
        | DomainError::InvalidPrice { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match err {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        StoreError::InsufficientStock { .. } => (StatusCode::CONFLICT, err.to_string()),
        StoreError::Domain(inner) => domain_error_to_response(inner),
        StoreError::Database(_) | StoreError::Serialization(_) | StoreError::Decode(_) => {
            tracing::error!(error = %err, "storage error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Domain(err) => ApiError::Domain(err),
            InventoryError::Store(err) => ApiError::Store(err),
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::Domain(err) => ApiError::Domain(err),
            OrderError::Store(err) => ApiError::Store(err),
            OrderError::Notification(msg) => ApiError::Internal(msg),
        }
    }
}
