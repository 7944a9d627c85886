//! Order service error types.

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A domain rule was violated.
    #[error(transparent)]
    Domain(#[from] domain::DomainError),

    /// An error from the storage backend.
    #[error(transparent)]
    Store(#[from] stock_store::StoreError),

    /// The notification channel rejected a message.
    #[error("notification error: {0}")]
    Notification(String),
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
