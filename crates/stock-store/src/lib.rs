//! Storage backends for the inventory reservation engine.

mod error;
mod memory;
mod postgres;
mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use store::{
    CommittedOrder, OrderRemoval, ReservationBatch, ReservationFailure, StockStore,
    validate_reservation_requests,
};
