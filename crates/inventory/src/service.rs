//! Reservation and stock level service.

use chrono::Utc;
use common::{CartId, ReservationId, StoreId};
use domain::{
    AuditEntry, ItemRef, MAX_TTL_MINUTES, Reservation, ReservationRequest, StockAdjustmentReason,
    StockAvailability, StockLevel,
};
use stock_store::{ReservationBatch, StockStore};

use crate::error::{InventoryError, Result};

/// Manages stock levels and the reservation lifecycle on top of a
/// [`StockStore`].
///
/// The service validates input, applies the configured default TTL, and
/// records metrics; the atomicity of each operation lives in the store.
pub struct ReservationService<S: StockStore> {
    store: S,
    default_ttl_minutes: i64,
}

impl<S: StockStore> ReservationService<S> {
    /// Creates a new service. The default TTL applies when a reservation
    /// request does not carry its own.
    pub fn new(store: S, default_ttl_minutes: i64) -> Result<Self> {
        if default_ttl_minutes < 1 || default_ttl_minutes > MAX_TTL_MINUTES {
            return Err(InventoryError::Domain(domain::DomainError::InvalidTtl {
                minutes: default_ttl_minutes,
                max: MAX_TTL_MINUTES,
            }));
        }
        Ok(Self {
            store,
            default_ttl_minutes,
        })
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a batch of holds, falling back to the configured TTL.
    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn reserve(
        &self,
        store_id: StoreId,
        requests: &[ReservationRequest],
        cart_id: Option<CartId>,
        ttl_minutes: Option<i64>,
    ) -> Result<ReservationBatch> {
        let ttl = ttl_minutes.unwrap_or(self.default_ttl_minutes);
        let batch = self
            .store
            .create_reservations(store_id, requests, cart_id, ttl, Utc::now())
            .await?;

        metrics::counter!("reservations_created").increment(batch.reservations.len() as u64);
        if !batch.failures.is_empty() {
            metrics::counter!("reservation_failures").increment(batch.failures.len() as u64);
            tracing::info!(
                failed = batch.failures.len(),
                created = batch.reservations.len(),
                "reservation batch partially rejected"
            );
        }
        Ok(batch)
    }

    /// Reads one reservation.
    pub async fn reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
    ) -> Result<Option<Reservation>> {
        Ok(self.store.reservation(store_id, id).await?)
    }

    /// Releases one hold. Returns false when there was nothing to release.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, store_id: StoreId, id: ReservationId) -> Result<bool> {
        let released = self.store.release_reservation(store_id, id).await?;
        if released {
            metrics::counter!("reservations_released").increment(1);
        }
        Ok(released)
    }

    /// Releases every active hold of a cart. Returns the count.
    #[tracing::instrument(skip(self))]
    pub async fn release_cart(&self, store_id: StoreId, cart_id: CartId) -> Result<u64> {
        let released = self.store.release_cart_reservations(store_id, cart_id).await?;
        metrics::counter!("reservations_released").increment(released);
        Ok(released)
    }

    /// Applies the single allowed expiry extension.
    #[tracing::instrument(skip(self))]
    pub async fn extend(
        &self,
        store_id: StoreId,
        id: ReservationId,
        minutes: i64,
    ) -> Result<Reservation> {
        let reservation = self
            .store
            .extend_reservation(store_id, id, minutes, Utc::now())
            .await?;
        metrics::counter!("reservations_extended").increment(1);
        Ok(reservation)
    }

    /// Availability snapshot for one item.
    pub async fn availability(&self, store_id: StoreId, item: ItemRef) -> Result<StockAvailability> {
        Ok(self.store.availability(store_id, item, Utc::now()).await?)
    }

    /// Reads the stock level for one item.
    pub async fn stock_level(&self, store_id: StoreId, item: ItemRef) -> Result<Option<StockLevel>> {
        Ok(self.store.stock_level(store_id, item).await?)
    }

    /// Sets the on-hand quantity for an item.
    #[tracing::instrument(skip(self, level), fields(item = %level.item))]
    pub async fn set_stock_level(&self, level: StockLevel) -> Result<()> {
        if level.is_low_stock() {
            tracing::warn!(
                item = %level.item,
                total = level.total_quantity,
                threshold = level.low_stock_threshold,
                "stock level set at or below low-stock threshold"
            );
        }
        Ok(self.store.upsert_stock_level(level).await?)
    }

    /// Applies a manual adjustment to the ledger and returns the new
    /// quantity.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        actor: Option<&str>,
    ) -> Result<i64> {
        let after = self
            .store
            .adjust_stock(
                store_id,
                item,
                delta,
                StockAdjustmentReason::Manual,
                None,
                actor,
                Utc::now(),
            )
            .await?;

        if let Some(level) = self.store.stock_level(store_id, item).await?
            && level.is_low_stock()
        {
            tracing::warn!(
                item = %item,
                total = after,
                threshold = level.low_stock_threshold,
                "stock fell to or below low-stock threshold"
            );
        }
        Ok(after)
    }

    /// Most recent audit entries for a store, newest first.
    pub async fn audit_trail(&self, store_id: StoreId, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(self.store.audit_trail(store_id, limit).await?)
    }
}
