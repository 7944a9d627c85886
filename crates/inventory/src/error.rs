//! Inventory service error types.

use thiserror::Error;

/// Errors that can occur while managing stock and reservations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A domain rule was violated before any storage was touched.
    #[error(transparent)]
    Domain(#[from] domain::DomainError),

    /// An error from the storage backend.
    #[error(transparent)]
    Store(#[from] stock_store::StoreError),
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
