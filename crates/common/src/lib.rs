//! Shared types used across the inventory engine crates.

mod ids;
mod money;

pub use ids::{CartId, OrderId, ProductId, ReservationId, StoreId, VariantId};
pub use money::Money;
