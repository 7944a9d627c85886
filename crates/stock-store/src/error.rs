//! Storage error types.

use domain::{DomainError, ItemRef};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from the underlying database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization failure while persisting or loading a value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A domain rule was violated inside the storage operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The named entity does not exist in this store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation would have driven stock below zero or past the
    /// available quantity.
    #[error("insufficient stock for {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: ItemRef,
        requested: i64,
        available: i64,
    },

    /// A stored row could not be mapped back into a domain value.
    #[error("invalid stored row: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
