//! Order commitment and lifecycle.
//!
//! This crate provides the order side of the engine:
//! - [`OrderCommitService`] for atomic commitment, status transitions,
//!   cancellation, refunds, and removal
//! - [`NotificationService`] as the seam for customer-facing messages,
//!   with logging and in-memory implementations

pub mod commit;
pub mod error;
pub mod notify;

pub use commit::OrderCommitService;
pub use error::{OrderError, Result};
pub use notify::{InMemoryNotificationService, LoggingNotificationService, NotificationService};
