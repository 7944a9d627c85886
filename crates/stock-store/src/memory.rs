use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, ReservationId, StoreId};
use domain::{
    AuditAction, AuditEntry, ItemRef, Order, OrderDraft, OrderStatus, Reservation,
    ReservationRequest, ReservationStatus, StockAdjustmentReason, StockAvailability, StockEffect,
    StockLevel, stock_effect,
};
use tokio::sync::RwLock;

use crate::{
    StoreError,
    error::Result,
    store::{
        CommittedOrder, OrderRemoval, ReservationBatch, ReservationFailure, StockStore,
        validate_reservation_requests,
    },
};

#[derive(Default)]
struct State {
    stock: HashMap<(StoreId, ItemRef), StockLevel>,
    reservations: HashMap<ReservationId, Reservation>,
    orders: HashMap<OrderId, Order>,
    audit: Vec<AuditEntry>,
}

impl State {
    fn total_quantity(&self, store_id: StoreId, item: ItemRef) -> i64 {
        self.stock
            .get(&(store_id, item))
            .map_or(0, |level| level.total_quantity)
    }

    fn reserved_quantity(&self, store_id: StoreId, item: ItemRef, now: DateTime<Utc>) -> i64 {
        self.reservations
            .values()
            .filter(|r| r.store_id == store_id && r.item == item && r.holds_stock_at(now))
            .map(|r| r.quantity)
            .sum()
    }

    /// Highest existing order number for the store carrying the given
    /// prefix. Length is compared first so five-digit sequences sort
    /// above four-digit ones.
    fn highest_order_number(&self, store_id: StoreId, prefix: &str) -> Option<String> {
        self.orders
            .values()
            .filter(|o| o.store_id == store_id && o.order_number.starts_with(prefix))
            .map(|o| o.order_number.clone())
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
    }

    fn apply_adjustment(
        &mut self,
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        reason: StockAdjustmentReason,
        order_id: Option<OrderId>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let level =
            self.stock
                .get_mut(&(store_id, item))
                .ok_or_else(|| StoreError::NotFound {
                    entity: "stock level",
                    id: item.to_string(),
                })?;
        let before = level.total_quantity;
        let after = before + delta;
        if after < 0 {
            return Err(StoreError::InsufficientStock {
                item,
                requested: -delta,
                available: before,
            });
        }
        level.total_quantity = after;
        self.audit.push(
            AuditEntry::for_stock_adjustment(
                store_id, item, delta, before, after, reason, order_id, now,
            )
            .with_actor(actor),
        );
        Ok(after)
    }
}

/// In-memory stock store.
///
/// Used by unit tests and as the no-database runtime fallback. Holding the
/// write lock for the duration of a method is what makes each operation
/// atomic, mirroring the per-method transaction of the PostgreSQL backend.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStockStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of audit entries across all stores.
    pub async fn audit_len(&self) -> usize {
        self.state.read().await.audit.len()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn upsert_stock_level(&self, level: StockLevel) -> Result<()> {
        let mut state = self.state.write().await;
        state.stock.insert((level.store_id, level.item), level);
        Ok(())
    }

    async fn stock_level(&self, store_id: StoreId, item: ItemRef) -> Result<Option<StockLevel>> {
        let state = self.state.read().await;
        Ok(state.stock.get(&(store_id, item)).cloned())
    }

    async fn adjust_stock(
        &self,
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        reason: StockAdjustmentReason,
        order_id: Option<OrderId>,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        state.apply_adjustment(store_id, item, delta, reason, order_id, actor, now)
    }

    async fn availability(
        &self,
        store_id: StoreId,
        item: ItemRef,
        now: DateTime<Utc>,
    ) -> Result<StockAvailability> {
        let state = self.state.read().await;
        let total = state.total_quantity(store_id, item);
        let reserved = state.reserved_quantity(store_id, item, now);
        Ok(StockAvailability::compute(total, reserved))
    }

    async fn create_reservations(
        &self,
        store_id: StoreId,
        requests: &[ReservationRequest],
        cart_id: Option<CartId>,
        ttl_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<ReservationBatch> {
        validate_reservation_requests(requests, ttl_minutes)?;

        let mut state = self.state.write().await;
        let mut created: Vec<Reservation> = Vec::new();
        let mut failures = Vec::new();

        for request in requests {
            let total = state.total_quantity(store_id, request.item);
            let reserved = state.reserved_quantity(store_id, request.item, now)
                + created
                    .iter()
                    .filter(|r| r.item == request.item)
                    .map(|r| r.quantity)
                    .sum::<i64>();
            let available = (total - reserved).max(0);

            if request.quantity > available {
                failures.push(ReservationFailure {
                    item: request.item,
                    requested: request.quantity,
                    available,
                });
            } else {
                created.push(Reservation::new(
                    store_id,
                    request.item,
                    request.quantity,
                    cart_id,
                    ttl_minutes,
                    now,
                ));
            }
        }

        // An exhausted batch rolls back entirely: nothing is persisted.
        if created.is_empty() {
            return Ok(ReservationBatch {
                reservations: vec![],
                failures,
            });
        }

        for reservation in &created {
            state.audit.push(AuditEntry::for_reservation(
                AuditAction::ReservationCreated,
                reservation,
                None,
                now,
            ));
            state
                .reservations
                .insert(reservation.id, reservation.clone());
        }

        Ok(ReservationBatch {
            reservations: created,
            failures,
        })
    }

    async fn reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .get(&id)
            .filter(|r| r.store_id == store_id)
            .cloned())
    }

    async fn release_reservation(&self, store_id: StoreId, id: ReservationId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(reservation) = state
            .reservations
            .get_mut(&id)
            .filter(|r| r.store_id == store_id)
        else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Active {
            return Ok(false);
        }
        reservation.status = ReservationStatus::Released;
        let entry = AuditEntry::for_reservation(
            AuditAction::ReservationReleased,
            reservation,
            None,
            Utc::now(),
        );
        state.audit.push(entry);
        Ok(true)
    }

    async fn release_cart_reservations(&self, store_id: StoreId, cart_id: CartId) -> Result<u64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut released = 0;
        let mut entries = Vec::new();
        for reservation in state.reservations.values_mut() {
            if reservation.store_id == store_id
                && reservation.cart_id == Some(cart_id)
                && reservation.status == ReservationStatus::Active
            {
                reservation.status = ReservationStatus::Released;
                released += 1;
                entries.push(AuditEntry::for_reservation(
                    AuditAction::ReservationReleased,
                    reservation,
                    None,
                    now,
                ));
            }
        }
        state.audit.extend(entries);
        Ok(released)
    }

    async fn extend_reservation(
        &self,
        store_id: StoreId,
        id: ReservationId,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;
        let Some(reservation) = state
            .reservations
            .get_mut(&id)
            .filter(|r| r.store_id == store_id && r.status == ReservationStatus::Active)
        else {
            return Err(StoreError::NotFound {
                entity: "reservation",
                id: id.to_string(),
            });
        };
        reservation.extend(minutes, now)?;
        let extended = reservation.clone();
        let entry =
            AuditEntry::for_reservation(AuditAction::ReservationExtended, &extended, None, now);
        state.audit.push(entry);
        Ok(extended)
    }

    async fn expire_due_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let mut state = self.state.write().await;
        let mut expired = Vec::new();
        for reservation in state.reservations.values_mut() {
            if reservation.is_due_for_expiry(now) {
                reservation.status = ReservationStatus::Expired;
                expired.push(reservation.clone());
            }
        }
        for reservation in &expired {
            state.audit.push(AuditEntry::for_reservation(
                AuditAction::ReservationExpired,
                reservation,
                None,
                now,
            ));
        }
        Ok(expired)
    }

    async fn commit_order(
        &self,
        store_id: StoreId,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<CommittedOrder> {
        draft.validate()?;

        let mut state = self.state.write().await;

        // Idempotency replay: an existing order under this key is returned
        // unchanged, with no second deduction.
        if let Some(key) = draft.idempotency_key.as_deref()
            && let Some(existing) = state
                .orders
                .values()
                .find(|o| o.store_id == store_id && o.idempotency_key.as_deref() == Some(key))
        {
            return Ok(CommittedOrder {
                order: existing.clone(),
                replayed: true,
            });
        }

        // Validate every line against the ledger before any write, tracking
        // the running deduction so duplicate lines of one item cannot
        // collectively oversell.
        let mut remaining: HashMap<ItemRef, i64> = HashMap::new();
        for line in &draft.items {
            let item = line.item();
            let available = remaining
                .entry(item)
                .or_insert_with(|| state.total_quantity(store_id, item));
            let requested = i64::from(line.quantity);
            if requested > *available {
                return Err(StoreError::InsufficientStock {
                    item,
                    requested,
                    available: *available,
                });
            }
            *available -= requested;
        }

        let prefix = domain::order_number_prefix(now.date_naive());
        let highest = state.highest_order_number(store_id, &prefix);
        let order_number = domain::next_order_number(highest.as_deref(), now.date_naive());

        let cart_id = draft.cart_id;
        let order = Order::from_draft(store_id, order_number, draft, now);

        // Ledger deduction, one audit entry per line.
        for line in &order.items {
            state.apply_adjustment(
                store_id,
                line.item(),
                -i64::from(line.quantity),
                StockAdjustmentReason::OrderPlaced,
                Some(order.id),
                None,
                now,
            )?;
        }

        // Consume the cart's active holds; their stock is now permanently
        // deducted, so they must stop counting toward reserved quantity.
        if let Some(cart_id) = cart_id {
            let mut entries = Vec::new();
            for reservation in state.reservations.values_mut() {
                if reservation.store_id == store_id
                    && reservation.cart_id == Some(cart_id)
                    && reservation.status == ReservationStatus::Active
                {
                    reservation.status = ReservationStatus::Consumed { order_id: order.id };
                    entries.push(AuditEntry::for_reservation(
                        AuditAction::ReservationConsumed,
                        reservation,
                        Some(order.id),
                        now,
                    ));
                }
            }
            state.audit.extend(entries);
        }

        state.orders.insert(order.id, order.clone());
        Ok(CommittedOrder {
            order,
            replayed: false,
        })
    }

    async fn order(&self, store_id: StoreId, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .get(&id)
            .filter(|o| o.store_id == store_id)
            .cloned())
    }

    async fn order_by_idempotency_key(
        &self,
        store_id: StoreId,
        key: &str,
    ) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.store_id == store_id && o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update_order_status(
        &self,
        store_id: StoreId,
        id: OrderId,
        to: OrderStatus,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let Some(order) = state
            .orders
            .get(&id)
            .filter(|o| o.store_id == store_id)
            .cloned()
        else {
            return Err(StoreError::NotFound {
                entity: "order",
                id: id.to_string(),
            });
        };

        let from = order.status;
        let mut updated = order;
        updated.apply_status(to, now)?;

        // For a re-deduction, check every line before touching the ledger
        // so a failure leaves no partial deduction.
        if stock_effect(from, to) == StockEffect::Rededuct {
            let mut remaining: HashMap<ItemRef, i64> = HashMap::new();
            for line in &updated.items {
                let item = line.item();
                let available = remaining
                    .entry(item)
                    .or_insert_with(|| state.total_quantity(store_id, item));
                let requested = i64::from(line.quantity);
                if requested > *available {
                    return Err(StoreError::InsufficientStock {
                        item,
                        requested,
                        available: *available,
                    });
                }
                *available -= requested;
            }
        }

        match stock_effect(from, to) {
            StockEffect::None => {}
            StockEffect::Restore(reason) => {
                for line in &updated.items {
                    state.apply_adjustment(
                        store_id,
                        line.item(),
                        i64::from(line.quantity),
                        reason,
                        Some(updated.id),
                        actor,
                        now,
                    )?;
                }
            }
            StockEffect::Rededuct => {
                for line in &updated.items {
                    state.apply_adjustment(
                        store_id,
                        line.item(),
                        -i64::from(line.quantity),
                        StockAdjustmentReason::OrderReactivated,
                        Some(updated.id),
                        actor,
                        now,
                    )?;
                }
            }
        }

        state.orders.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_order(
        &self,
        store_id: StoreId,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<OrderRemoval> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id).filter(|o| o.store_id == store_id) else {
            return Err(StoreError::NotFound {
                entity: "order",
                id: id.to_string(),
            });
        };
        if order.status.allows_hard_delete() {
            state.orders.remove(&id);
            Ok(OrderRemoval::Hard)
        } else {
            order.deleted_at = Some(now);
            Ok(OrderRemoval::Soft)
        }
    }

    async fn audit_trail(&self, store_id: StoreId, limit: usize) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|e| e.store_id == store_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{Money, ProductId, VariantId};
    use domain::OrderItem;

    fn product_item() -> ItemRef {
        ItemRef::product(ProductId::new())
    }

    async fn store_with_stock(quantity: i64) -> (InMemoryStockStore, StoreId, ItemRef) {
        let store = InMemoryStockStore::new();
        let store_id = StoreId::new();
        let item = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_id, item, quantity))
            .await
            .unwrap();
        (store, store_id, item)
    }

    fn draft_for(item: ItemRef, quantity: u32) -> OrderDraft {
        OrderDraft {
            customer_name: "Grace Hopper".to_string(),
            customer_email: "grace@example.com".to_string(),
            shipping_address: None,
            payment_method: "card".to_string(),
            items: vec![OrderItem::new(
                item.product_id(),
                item.variant_id(),
                "Widget",
                "SKU-001",
                quantity,
                Money::from_cents(1000),
            )],
            cart_id: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_read_stock_level() {
        let (store, store_id, item) = store_with_stock(10).await;
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 10);

        // Upsert replaces, e.g. after a warehouse recount.
        store
            .upsert_stock_level(StockLevel::new(store_id, item, 4))
            .await
            .unwrap();
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 4);
    }

    #[tokio::test]
    async fn adjust_stock_refuses_to_go_negative() {
        let (store, store_id, item) = store_with_stock(3).await;
        let err = store
            .adjust_stock(
                store_id,
                item,
                -5,
                StockAdjustmentReason::Manual,
                None,
                None,
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock {
                requested: 5,
                available: 3,
                ..
            }
        ));
        // Unchanged after the rejected adjustment.
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 3);
    }

    #[tokio::test]
    async fn adjust_stock_records_before_and_after() {
        let (store, store_id, item) = store_with_stock(10).await;
        let new_quantity = store
            .adjust_stock(
                store_id,
                item,
                -4,
                StockAdjustmentReason::Manual,
                None,
                Some("ops@example.com"),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(new_quantity, 6);

        let trail = store.audit_trail(store_id, 10).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::StockAdjusted);
        assert_eq!(trail[0].quantity_before, Some(10));
        assert_eq!(trail[0].quantity_after, Some(6));
        assert_eq!(trail[0].actor.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn reservations_reduce_availability_not_total() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();

        let batch = store
            .create_reservations(
                store_id,
                &[ReservationRequest::new(item, 4)],
                None,
                15,
                now,
            )
            .await
            .unwrap();
        assert_eq!(batch.reservations.len(), 1);
        assert!(batch.failures.is_empty());

        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.total_stock, 10);
        assert_eq!(availability.reserved_quantity, 4);
        assert_eq!(availability.available_stock, 6);
    }

    #[tokio::test]
    async fn batch_allows_partial_success() {
        let (store, store_id, item) = store_with_stock(5).await;
        let other = product_item();
        let now = Utc::now();

        let batch = store
            .create_reservations(
                store_id,
                &[
                    ReservationRequest::new(item, 3),
                    ReservationRequest::new(other, 1),
                ],
                None,
                15,
                now,
            )
            .await
            .unwrap();

        assert_eq!(batch.reservations.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].item, other);
        assert_eq!(batch.failures[0].available, 0);
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn exhausted_batch_rolls_back_entirely() {
        let (store, store_id, item) = store_with_stock(2).await;
        let now = Utc::now();

        let batch = store
            .create_reservations(
                store_id,
                &[ReservationRequest::new(item, 3)],
                None,
                15,
                now,
            )
            .await
            .unwrap();
        assert!(batch.all_failed());
        assert_eq!(batch.failures[0].requested, 3);
        assert_eq!(batch.failures[0].available, 2);

        // Nothing persisted: availability unchanged, no audit entries.
        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.reserved_quantity, 0);
        assert_eq!(store.audit_len().await, 0);
    }

    #[tokio::test]
    async fn batch_lines_count_against_each_other() {
        let (store, store_id, item) = store_with_stock(5).await;
        let now = Utc::now();

        let batch = store
            .create_reservations(
                store_id,
                &[
                    ReservationRequest::new(item, 3),
                    ReservationRequest::new(item, 3),
                ],
                None,
                15,
                now,
            )
            .await
            .unwrap();

        // The first hold takes 3 of 5, leaving 2 for the second line.
        assert_eq!(batch.reservations.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].available, 2);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (store, store_id, item) = store_with_stock(5).await;
        let now = Utc::now();
        let batch = store
            .create_reservations(store_id, &[ReservationRequest::new(item, 2)], None, 15, now)
            .await
            .unwrap();
        let id = batch.reservations[0].id;

        assert!(store.release_reservation(store_id, id).await.unwrap());
        assert!(!store.release_reservation(store_id, id).await.unwrap());
        assert!(
            !store
                .release_reservation(store_id, ReservationId::new())
                .await
                .unwrap()
        );

        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.available_stock, 5);
    }

    #[tokio::test]
    async fn release_cart_releases_only_that_carts_active_holds() {
        let (store, store_id, item) = store_with_stock(10).await;
        let cart = CartId::new();
        let now = Utc::now();

        store
            .create_reservations(
                store_id,
                &[
                    ReservationRequest::new(item, 2),
                    ReservationRequest::new(item, 3),
                ],
                Some(cart),
                15,
                now,
            )
            .await
            .unwrap();
        store
            .create_reservations(store_id, &[ReservationRequest::new(item, 1)], None, 15, now)
            .await
            .unwrap();

        let released = store
            .release_cart_reservations(store_id, cart)
            .await
            .unwrap();
        assert_eq!(released, 2);

        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.reserved_quantity, 1);

        // Second call finds nothing left to release.
        let released = store
            .release_cart_reservations(store_id, cart)
            .await
            .unwrap();
        assert_eq!(released, 0);
    }

    #[tokio::test]
    async fn extension_is_allowed_exactly_once() {
        let (store, store_id, item) = store_with_stock(5).await;
        let now = Utc::now();
        let batch = store
            .create_reservations(store_id, &[ReservationRequest::new(item, 2)], None, 15, now)
            .await
            .unwrap();
        let id = batch.reservations[0].id;
        let original_expiry = batch.reservations[0].expires_at;

        let extended = store
            .extend_reservation(store_id, id, 10, now)
            .await
            .unwrap();
        assert!(extended.expires_at >= original_expiry);
        assert!(extended.extended_at.is_some());

        let err = store
            .extend_reservation(store_id, id, 10, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(domain::DomainError::AlreadyExtended { .. })
        ));
    }

    #[tokio::test]
    async fn extending_a_released_reservation_is_not_found() {
        let (store, store_id, item) = store_with_stock(5).await;
        let now = Utc::now();
        let batch = store
            .create_reservations(store_id, &[ReservationRequest::new(item, 2)], None, 15, now)
            .await
            .unwrap();
        let id = batch.reservations[0].id;
        store.release_reservation(store_id, id).await.unwrap();

        let err = store
            .extend_reservation(store_id, id, 5, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn sweep_expires_due_reservations_and_frees_stock() {
        let (store, store_id, item) = store_with_stock(5).await;
        let created_at = Utc::now();
        store
            .create_reservations(
                store_id,
                &[ReservationRequest::new(item, 4)],
                None,
                15,
                created_at,
            )
            .await
            .unwrap();

        // Still holding at fourteen minutes.
        let expired = store
            .expire_due_reservations(created_at + Duration::minutes(14))
            .await
            .unwrap();
        assert!(expired.is_empty());

        // Due at fifteen.
        let at_expiry = created_at + Duration::minutes(15);
        let expired = store.expire_due_reservations(at_expiry).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ReservationStatus::Expired);

        let availability = store.availability(store_id, item, at_expiry).await.unwrap();
        assert_eq!(availability.available_stock, 5);

        // A second sweep finds nothing.
        let expired = store.expire_due_reservations(at_expiry).await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn consumed_reservations_are_not_swept() {
        let (store, store_id, item) = store_with_stock(5).await;
        let cart = CartId::new();
        let created_at = Utc::now();
        let batch = store
            .create_reservations(
                store_id,
                &[ReservationRequest::new(item, 2)],
                Some(cart),
                15,
                created_at,
            )
            .await
            .unwrap();
        let reservation_id = batch.reservations[0].id;

        let mut draft = draft_for(item, 2);
        draft.cart_id = Some(cart);
        let committed = store
            .commit_order(store_id, draft, created_at + Duration::minutes(14))
            .await
            .unwrap();

        // The sweep lands after the TTL, but consumption already won.
        let expired = store
            .expire_due_reservations(created_at + Duration::minutes(16))
            .await
            .unwrap();
        assert!(expired.is_empty());

        let reservation = store
            .reservation(store_id, reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reservation.status,
            ReservationStatus::Consumed {
                order_id: committed.order.id
            }
        );
    }

    #[tokio::test]
    async fn commit_deducts_stock_and_numbers_the_order() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();

        let committed = store
            .commit_order(store_id, draft_for(item, 3), now)
            .await
            .unwrap();
        assert!(!committed.replayed);
        assert_eq!(committed.order.status, OrderStatus::Pending);
        let prefix = domain::order_number_prefix(now.date_naive());
        assert_eq!(committed.order.order_number, format!("{prefix}0001"));
        assert_eq!(committed.order.total.cents(), 3000);

        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 7);

        let second = store
            .commit_order(store_id, draft_for(item, 1), now)
            .await
            .unwrap();
        assert_eq!(second.order.order_number, format!("{prefix}0002"));
    }

    #[tokio::test]
    async fn commit_fails_whole_operation_on_insufficient_stock() {
        let (store, store_id, item) = store_with_stock(5).await;
        let scarce = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_id, scarce, 1))
            .await
            .unwrap();

        let mut draft = draft_for(item, 3);
        draft.items.push(OrderItem::new(
            scarce.product_id(),
            None,
            "Gadget",
            "SKU-002",
            2,
            Money::from_cents(500),
        ));

        let err = store
            .commit_order(store_id, draft, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock {
                item, requested: 2, available: 1
            } if item == scarce
        ));

        // No partial deduction.
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 5);
        let level = store.stock_level(store_id, scarce).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 1);
    }

    #[tokio::test]
    async fn commit_replays_under_the_same_idempotency_key() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();

        let mut draft = draft_for(item, 3);
        draft.idempotency_key = Some("retry-abc".to_string());

        let first = store
            .commit_order(store_id, draft.clone(), now)
            .await
            .unwrap();
        let second = store.commit_order(store_id, draft, now).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.order.id, first.order.id);
        assert_eq!(second.order.order_number, first.order.order_number);

        // Exactly one deduction.
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 7);
    }

    #[tokio::test]
    async fn commit_consumes_the_carts_reservations() {
        let (store, store_id, item) = store_with_stock(5).await;
        let cart = CartId::new();
        let now = Utc::now();

        let batch = store
            .create_reservations(
                store_id,
                &[ReservationRequest::new(item, 3)],
                Some(cart),
                15,
                now,
            )
            .await
            .unwrap();
        let reservation_id = batch.reservations[0].id;

        let mut draft = draft_for(item, 3);
        draft.cart_id = Some(cart);
        let committed = store.commit_order(store_id, draft, now).await.unwrap();

        let reservation = store
            .reservation(store_id, reservation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reservation.status,
            ReservationStatus::Consumed {
                order_id: committed.order.id
            }
        );

        // Total dropped by the order; the consumed hold no longer counts,
        // so available is total minus nothing.
        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.total_stock, 2);
        assert_eq!(availability.reserved_quantity, 0);
        assert_eq!(availability.available_stock, 2);
    }

    #[tokio::test]
    async fn cancellation_restores_each_line() {
        let (store, store_id, item) = store_with_stock(10).await;
        let other = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_id, other, 10))
            .await
            .unwrap();
        let now = Utc::now();

        let mut draft = draft_for(item, 2);
        draft.items.push(OrderItem::new(
            other.product_id(),
            other.variant_id(),
            "Gadget",
            "SKU-002",
            1,
            Money::from_cents(500),
        ));
        let committed = store.commit_order(store_id, draft, now).await.unwrap();
        let order_id = committed.order.id;

        store
            .update_order_status(store_id, order_id, OrderStatus::Paid, None, now)
            .await
            .unwrap();
        let cancelled = store
            .update_order_status(store_id, order_id, OrderStatus::Canceled, None, now)
            .await
            .unwrap();

        assert_eq!(cancelled.status, OrderStatus::Canceled);
        assert!(cancelled.cancelled_at.is_some());
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 10);
        let level = store.stock_level(store_id, other).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 10);
    }

    #[tokio::test]
    async fn refund_after_cancellation_does_not_restore_twice() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();
        let committed = store
            .commit_order(store_id, draft_for(item, 4), now)
            .await
            .unwrap();
        let order_id = committed.order.id;

        store
            .update_order_status(store_id, order_id, OrderStatus::Paid, None, now)
            .await
            .unwrap();
        store
            .update_order_status(store_id, order_id, OrderStatus::Canceled, None, now)
            .await
            .unwrap();
        store
            .update_order_status(store_id, order_id, OrderStatus::Refunded, None, now)
            .await
            .unwrap();

        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 10);
    }

    #[tokio::test]
    async fn refund_of_a_delivered_order_restores_stock() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();
        let committed = store
            .commit_order(store_id, draft_for(item, 4), now)
            .await
            .unwrap();
        let order_id = committed.order.id;

        for status in [
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Delivered,
        ] {
            store
                .update_order_status(store_id, order_id, status, None, now)
                .await
                .unwrap();
        }
        let refunded = store
            .update_order_status(store_id, order_id, OrderStatus::Refunded, None, now)
            .await
            .unwrap();
        assert!(refunded.delivered_at.is_some());

        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 10);
    }

    #[tokio::test]
    async fn reactivating_a_cancelled_order_rededucts() {
        let (store, store_id, item) = store_with_stock(5).await;
        let now = Utc::now();
        let committed = store
            .commit_order(store_id, draft_for(item, 4), now)
            .await
            .unwrap();
        let order_id = committed.order.id;

        store
            .update_order_status(store_id, order_id, OrderStatus::Canceled, None, now)
            .await
            .unwrap();
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 5);

        store
            .update_order_status(store_id, order_id, OrderStatus::Pending, None, now)
            .await
            .unwrap();
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 1);
    }

    #[tokio::test]
    async fn reactivation_fails_when_stock_is_gone() {
        let (store, store_id, item) = store_with_stock(4).await;
        let now = Utc::now();
        let committed = store
            .commit_order(store_id, draft_for(item, 4), now)
            .await
            .unwrap();
        let order_id = committed.order.id;

        store
            .update_order_status(store_id, order_id, OrderStatus::Canceled, None, now)
            .await
            .unwrap();
        // Someone else takes the restored stock.
        store
            .adjust_stock(
                store_id,
                item,
                -3,
                StockAdjustmentReason::Manual,
                None,
                None,
                now,
            )
            .await
            .unwrap();

        let err = store
            .update_order_status(store_id, order_id, OrderStatus::Pending, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));

        // The order stays cancelled.
        let order = store.order(store_id, order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_order_unchanged() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();
        let committed = store
            .commit_order(store_id, draft_for(item, 1), now)
            .await
            .unwrap();

        let err = store
            .update_order_status(store_id, committed.order.id, OrderStatus::Refunded, None, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(domain::DomainError::InvalidTransition { .. })
        ));

        let order = store
            .order(store_id, committed.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn pending_orders_are_hard_deleted_others_soft() {
        let (store, store_id, item) = store_with_stock(10).await;
        let now = Utc::now();

        let pending = store
            .commit_order(store_id, draft_for(item, 1), now)
            .await
            .unwrap();
        assert_eq!(
            store
                .delete_order(store_id, pending.order.id, now)
                .await
                .unwrap(),
            OrderRemoval::Hard
        );
        assert!(
            store
                .order(store_id, pending.order.id)
                .await
                .unwrap()
                .is_none()
        );

        let paid = store
            .commit_order(store_id, draft_for(item, 1), now)
            .await
            .unwrap();
        store
            .update_order_status(store_id, paid.order.id, OrderStatus::Paid, None, now)
            .await
            .unwrap();
        assert_eq!(
            store
                .delete_order(store_id, paid.order.id, now)
                .await
                .unwrap(),
            OrderRemoval::Soft
        );
        let order = store.order(store_id, paid.order.id).await.unwrap().unwrap();
        assert_eq!(order.deleted_at, Some(now));
    }

    #[tokio::test]
    async fn stores_are_isolated() {
        let store = InMemoryStockStore::new();
        let store_a = StoreId::new();
        let store_b = StoreId::new();
        let item = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_a, item, 5))
            .await
            .unwrap();

        let now = Utc::now();
        let batch = store
            .create_reservations(store_a, &[ReservationRequest::new(item, 2)], None, 15, now)
            .await
            .unwrap();
        let id = batch.reservations[0].id;

        // The other tenant cannot see or release the hold.
        assert!(store.reservation(store_b, id).await.unwrap().is_none());
        assert!(!store.release_reservation(store_b, id).await.unwrap());
        let availability = store.availability(store_b, item, now).await.unwrap();
        assert_eq!(availability.total_stock, 0);
    }

    #[tokio::test]
    async fn variant_stock_is_tracked_separately_from_product() {
        let store = InMemoryStockStore::new();
        let store_id = StoreId::new();
        let product = ProductId::new();
        let plain = ItemRef::product(product);
        let variant = ItemRef::variant(product, VariantId::new());
        store
            .upsert_stock_level(StockLevel::new(store_id, plain, 5))
            .await
            .unwrap();
        store
            .upsert_stock_level(StockLevel::new(store_id, variant, 2))
            .await
            .unwrap();
        let now = Utc::now();

        store
            .create_reservations(store_id, &[ReservationRequest::new(variant, 2)], None, 15, now)
            .await
            .unwrap();

        let availability = store.availability(store_id, plain, now).await.unwrap();
        assert_eq!(availability.available_stock, 5);
        let availability = store.availability(store_id, variant, now).await.unwrap();
        assert_eq!(availability.available_stock, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_reservations_never_oversell() {
        let store = InMemoryStockStore::new();
        let store_id = StoreId::new();
        let item = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_id, item, 5))
            .await
            .unwrap();
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_reservations(
                        store_id,
                        &[ReservationRequest::new(item, 3)],
                        None,
                        15,
                        now,
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut reserved = 0;
        for handle in handles {
            let batch = handle.await.unwrap();
            reserved += batch.reservations.iter().map(|r| r.quantity).sum::<i64>();
        }

        // Ten racing requests for 3 units each against 5 on hand: only one
        // can win; the rest must be rejected, never silently trimmed.
        assert_eq!(reserved, 3);
        let availability = store.availability(store_id, item, now).await.unwrap();
        assert_eq!(availability.reserved_quantity, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_commits_with_one_key_create_one_order() {
        let store = InMemoryStockStore::new();
        let store_id = StoreId::new();
        let item = product_item();
        store
            .upsert_stock_level(StockLevel::new(store_id, item, 100))
            .await
            .unwrap();
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let mut draft = draft_for(item, 1);
            draft.idempotency_key = Some("race-key".to_string());
            handles.push(tokio::spawn(async move {
                store.commit_order(store_id, draft, now).await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        let winners: Vec<_> = results.iter().filter(|c| !c.replayed).collect();
        assert_eq!(winners.len(), 1);
        let winner_id = winners[0].order.id;
        assert!(results.iter().all(|c| c.order.id == winner_id));

        // Exactly one deduction across all eight attempts.
        let level = store.stock_level(store_id, item).await.unwrap().unwrap();
        assert_eq!(level.total_quantity, 99);
    }
}
