//! Domain layer for the inventory reservation and order-commitment engine.
//!
//! Everything in this crate is pure: types, invariants, and the rules that
//! govern reservations and order status transitions. Storage backends and
//! services build on top of it.

mod audit;
mod error;
mod item;
pub mod order;
mod reservation;
mod stock;

pub use audit::{AuditAction, AuditEntry};
pub use error::DomainError;
pub use item::ItemRef;
pub use order::{
    Order, OrderDraft, OrderItem, OrderStatus, StockEffect, format_order_number,
    next_order_number, order_number_prefix, stock_effect,
};
pub use reservation::{
    DEFAULT_TTL_MINUTES, MAX_EXTENSION_MINUTES, MAX_TTL_MINUTES, Reservation, ReservationRequest,
    ReservationStatus,
};
pub use stock::{StockAdjustmentReason, StockAvailability, StockLevel};
