//! Stock reservations (holds).
//!
//! A reservation is a temporary claim on stock: it reduces *available*
//! quantity but never touches the durable ledger. It is consumed when its
//! cart's order commits, released on explicit cancellation, or expired by
//! the sweeper.

use chrono::{DateTime, Duration, Utc};
use common::{CartId, OrderId, ReservationId, StoreId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::item::ItemRef;

/// Default hold duration granted at creation.
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Longest hold a caller may request at creation.
pub const MAX_TTL_MINUTES: i64 = 60;

/// Longest extension, granted at most once per reservation.
pub const MAX_EXTENSION_MINUTES: i64 = 15;

/// Lifecycle state of a reservation.
///
/// `Active` is the only non-terminal state. The consumed variant carries
/// the order that absorbed the hold, so a consumed reservation without an
/// order cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Expired,
    Released,
    Consumed { order_id: OrderId },
}

impl ReservationStatus {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::Consumed { .. } => "consumed",
        }
    }

    /// True for states with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One requested hold: an item and a positive quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub item: ItemRef,
    pub quantity: i64,
}

impl ReservationRequest {
    pub fn new(item: ItemRef, quantity: i64) -> Self {
        Self { item, quantity }
    }
}

/// A durable hold against the stock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub store_id: StoreId,
    pub item: ItemRef,
    /// Fixed after creation; only `expires_at` may change, once.
    pub quantity: i64,
    /// Groups the reservations of one checkout attempt.
    pub cart_id: Option<CartId>,
    #[serde(flatten)]
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    /// Set when the single allowed extension is used.
    pub extended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new active reservation expiring `ttl_minutes` from `now`.
    pub fn new(
        store_id: StoreId,
        item: ItemRef,
        quantity: i64,
        cart_id: Option<CartId>,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            store_id,
            item,
            quantity,
            cart_id,
            status: ReservationStatus::Active,
            expires_at: now + Duration::minutes(ttl_minutes),
            extended_at: None,
            created_at: now,
        }
    }

    /// True when this hold still counts against available stock.
    pub fn holds_stock_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at > now
    }

    /// True when the sweeper should transition this reservation to expired.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at <= now
    }

    /// Applies the single allowed expiry extension.
    ///
    /// The new expiry is `max(expires_at, now) + minutes`: extending a
    /// reservation that has lapsed but not yet been swept grants a full
    /// fresh window instead of compounding from the stale timestamp.
    pub fn extend(&mut self, minutes: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        if minutes < 1 || minutes > MAX_EXTENSION_MINUTES {
            return Err(DomainError::InvalidTtl {
                minutes,
                max: MAX_EXTENSION_MINUTES,
            });
        }
        if self.extended_at.is_some() {
            return Err(DomainError::AlreadyExtended {
                reservation: self.id,
            });
        }
        self.expires_at = self.expires_at.max(now) + Duration::minutes(minutes);
        self.extended_at = Some(now);
        Ok(())
    }
}
