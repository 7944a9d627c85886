//! Reservation lifecycle management.
//!
//! This crate provides the inventory side of the engine:
//! - [`ReservationService`] for stock levels, holds, and availability
//! - [`ExpirationSweeper`] for returning lapsed holds to availability

pub mod error;
pub mod service;
pub mod sweeper;

pub use error::{InventoryError, Result};
pub use service::ReservationService;
pub use sweeper::ExpirationSweeper;
