//! Domain rule violations.

use common::ReservationId;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by pure domain rules, before any storage is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Quantity must be a positive integer.
    #[error("invalid quantity: {quantity} (must be positive)")]
    InvalidQuantity { quantity: i64 },

    /// Reservation TTL outside the allowed window.
    #[error("invalid reservation TTL: {minutes} minutes (allowed 1..={max})")]
    InvalidTtl { minutes: i64, max: i64 },

    /// A reservation batch must contain at least one item.
    #[error("reservation batch contains no items")]
    EmptyBatch,

    /// A reservation may be extended exactly once.
    #[error("reservation {reservation} has already been extended")]
    AlreadyExtended { reservation: ReservationId },

    /// Illegal order status change; the order is left unchanged.
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// An order must contain at least one line item.
    #[error("order contains no items")]
    NoItems,

    /// Unit prices cannot be negative.
    #[error("invalid unit price: {cents} cents")]
    InvalidPrice { cents: i64 },
}
