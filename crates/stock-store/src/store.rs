//! The `StockStore` trait: the storage seam of the engine.
//!
//! Every trait method is one atomic unit. Backends that speak to a real
//! database wrap the method body in a single transaction; the in-memory
//! backend holds its write lock for the duration. Compound operations
//! (reservation batches, order commit, status changes with inventory
//! restoration) are therefore single methods, never sequences the caller
//! has to keep atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, ReservationId, StoreId};
use domain::{
    AuditEntry, DomainError, ItemRef, MAX_TTL_MINUTES, Order, OrderDraft, OrderStatus,
    Reservation, ReservationRequest, StockAdjustmentReason, StockAvailability, StockLevel,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One rejected line of a reservation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFailure {
    pub item: ItemRef,
    pub requested: i64,
    pub available: i64,
}

/// Outcome of a reservation batch: created holds plus per-item failures.
/// Partial success is legal; when every line fails the batch was rolled
/// back and nothing was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationBatch {
    pub reservations: Vec<Reservation>,
    pub failures: Vec<ReservationFailure>,
}

impl ReservationBatch {
    /// True when no line succeeded.
    pub fn all_failed(&self) -> bool {
        self.reservations.is_empty() && !self.failures.is_empty()
    }
}

/// Outcome of an order commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOrder {
    pub order: Order,
    /// True when the idempotency key matched an existing order and no new
    /// order was created.
    pub replayed: bool,
}

/// How an order was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRemoval {
    /// Row removed outright (only Pending/Canceled orders).
    Hard,
    /// `deleted_at` stamped, row retained.
    Soft,
}

/// Rejects malformed reservation input before any storage is touched.
pub fn validate_reservation_requests(
    requests: &[ReservationRequest],
    ttl_minutes: i64,
) -> std::result::Result<(), DomainError> {
    if requests.is_empty() {
        return Err(DomainError::EmptyBatch);
    }
    for request in requests {
        if request.quantity < 1 {
            return Err(DomainError::InvalidQuantity {
                quantity: request.quantity,
            });
        }
    }
    if ttl_minutes < 1 || ttl_minutes > MAX_TTL_MINUTES {
        return Err(DomainError::InvalidTtl {
            minutes: ttl_minutes,
            max: MAX_TTL_MINUTES,
        });
    }
    Ok(())
}

/// Storage operations for stock levels, reservations, orders, and the
/// audit trail. All reads and writes are store-scoped (multi-tenant).
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Creates or replaces the stock level for an item. This is the
    /// catalog's seed / manual-recount entry point.
    async fn upsert_stock_level(&self, level: StockLevel) -> Result<()>;

    /// Reads the stock level for an item.
    async fn stock_level(&self, store_id: StoreId, item: ItemRef) -> Result<Option<StockLevel>>;

    /// Atomically adjusts on-hand quantity by `delta`, refusing to go
    /// negative. Writes a stock-adjusted audit entry with before/after
    /// values. Returns the new quantity.
    #[allow(clippy::too_many_arguments)]
    async fn adjust_stock(
        &self,
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        reason: StockAdjustmentReason,
        order_id: Option<OrderId>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    /// Availability snapshot: total, reserved (active and unexpired
    /// holds), and available.
    async fn availability(
        &self,
        store_id: StoreId,
        item: ItemRef,
        now: DateTime<Utc>,
    ) -> Result<StockAvailability>;

    /// Creates a batch of holds in one atomic unit. Lines that exceed
    /// availability are reported in `failures`; earlier lines of the
    /// batch count against later lines of the same item. A batch where
    /// every line fails is rolled back entirely.
    async fn create_reservations(
        &self,
        store_id: StoreId,
        requests: &[ReservationRequest],
        cart_id: Option<CartId>,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<ReservationBatch>;

    /// Reads one reservation.
    async fn reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
    ) -> Result<Option<Reservation>>;

    /// Transitions one active reservation to released. Returns false
    /// when the reservation is missing or no longer active, so repeated
    /// calls are idempotent.
    async fn release_reservation(&self, store_id: StoreId, id: ReservationId) -> Result<bool>;

    /// Releases every active reservation of a cart. Returns the count.
    async fn release_cart_reservations(&self, store_id: StoreId, cart_id: CartId) -> Result<u64>;

    /// Applies the single allowed expiry extension to an active
    /// reservation.
    async fn extend_reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Transitions every active reservation with `expires_at <= now` to
    /// expired, across all stores. Guarded on current status, so a
    /// concurrent consumption wins the race and this sweep skips the
    /// reservation. Returns the expired reservations.
    async fn expire_due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>>;

    /// Commits an order: idempotency replay, stock validation, order
    /// numbering, header + line-item insert, ledger deduction, and cart
    /// reservation consumption, all in one atomic unit. Any failure
    /// leaves no partial order and no partial deduction.
    async fn commit_order(
        &self,
        store_id: StoreId,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<CommittedOrder>;

    /// Reads one order with its items.
    async fn order(&self, store_id: StoreId, id: OrderId) -> Result<Option<Order>>;

    /// Finds the order committed under an idempotency key.
    async fn order_by_idempotency_key(&self, store_id: StoreId, key: &str)
    -> Result<Option<Order>>;

    /// Applies a validated status transition, stamping timestamps and
    /// performing the inventory restoration or re-deduction the
    /// transition demands, all in one atomic unit. Fails without any
    /// state change when the transition is illegal.
    async fn update_order_status(
        &self,
        store_id: StoreId,
        id: OrderId,
        to: OrderStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order>;

    /// Removes an order: hard removal for Pending/Canceled, otherwise a
    /// soft delete stamping `deleted_at`.
    async fn delete_order(
        &self,
        store_id: StoreId,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<OrderRemoval>;

    /// Most recent audit entries for a store, newest first.
    async fn audit_trail(&self, store_id: StoreId, limit: usize) -> Result<Vec<AuditEntry>>;
}
