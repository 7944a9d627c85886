//! Order commitment and lifecycle service.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, StoreId};
use domain::{Order, OrderDraft, OrderStatus};
use stock_store::{CommittedOrder, OrderRemoval, StockStore};

use crate::error::Result;
use crate::notify::NotificationService;

/// Commits orders and drives their status lifecycle on top of a
/// [`StockStore`].
///
/// The atomic parts (validation, numbering, deduction, reservation
/// consumption, restoration) live in the store; this service adds
/// idempotency-aware metrics and best-effort notifications.
pub struct OrderCommitService<S: StockStore> {
    store: S,
    notifier: Arc<dyn NotificationService>,
}

impl<S: StockStore> OrderCommitService<S> {
    /// Creates a new order service.
    pub fn new(store: S, notifier: Arc<dyn NotificationService>) -> Self {
        Self { store, notifier }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Commits a draft into an order. A retried commit under the same
    /// idempotency key returns the original order and sends nothing.
    #[tracing::instrument(skip(self, draft), fields(lines = draft.items.len()))]
    pub async fn commit(&self, store_id: StoreId, draft: OrderDraft) -> Result<CommittedOrder> {
        let committed = self.store.commit_order(store_id, draft, Utc::now()).await?;

        if committed.replayed {
            metrics::counter!("orders_replayed").increment(1);
            return Ok(committed);
        }

        metrics::counter!("orders_committed").increment(1);
        tracing::info!(
            order_number = %committed.order.order_number,
            total_cents = committed.order.total.cents(),
            "order committed"
        );

        // Best effort: the order is already durable, so a failed send must
        // not fail the commit.
        if let Err(error) = self.notifier.order_confirmed(&committed.order).await {
            tracing::warn!(%error, order_number = %committed.order.order_number,
                "order confirmation notification failed");
        }
        Ok(committed)
    }

    /// Reads one order with its items.
    pub async fn order(&self, store_id: StoreId, id: OrderId) -> Result<Option<Order>> {
        Ok(self.store.order(store_id, id).await?)
    }

    /// Finds the order committed under an idempotency key.
    pub async fn order_by_idempotency_key(
        &self,
        store_id: StoreId,
        key: &str,
    ) -> Result<Option<Order>> {
        Ok(self.store.order_by_idempotency_key(store_id, key).await?)
    }

    /// Applies a status transition, including whatever inventory
    /// restoration or re-deduction it demands.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        store_id: StoreId,
        id: OrderId,
        to: OrderStatus,
        actor: Option<&str>,
    ) -> Result<Order> {
        let previous = self
            .store
            .order(store_id, id)
            .await?
            .map(|o| o.status)
            .unwrap_or_default();
        let order = self
            .store
            .update_order_status(store_id, id, to, actor, Utc::now())
            .await?;

        metrics::counter!("order_status_changes", "to" => to.as_str()).increment(1);
        if order.status != previous
            && let Err(error) = self.notifier.order_status_changed(&order, previous).await
        {
            tracing::warn!(%error, order_number = %order.order_number,
                "order status notification failed");
        }
        Ok(order)
    }

    /// Cancels an order, restoring its inventory.
    pub async fn cancel(&self, store_id: StoreId, id: OrderId, actor: Option<&str>) -> Result<Order> {
        self.update_status(store_id, id, OrderStatus::Canceled, actor)
            .await
    }

    /// Refunds an order. Restores inventory unless a cancellation already
    /// did.
    pub async fn refund(&self, store_id: StoreId, id: OrderId, actor: Option<&str>) -> Result<Order> {
        self.update_status(store_id, id, OrderStatus::Refunded, actor)
            .await
    }

    /// Removes an order: a hard delete while it is still Pending or
    /// Canceled, a soft delete afterwards.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, store_id: StoreId, id: OrderId) -> Result<OrderRemoval> {
        let removal = self.store.delete_order(store_id, id, Utc::now()).await?;
        metrics::counter!("orders_deleted").increment(1);
        Ok(removal)
    }
}
