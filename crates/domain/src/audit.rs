//! Audit entries for reservation lifecycle events and stock adjustments.

use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, StoreId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::ItemRef;
use crate::reservation::Reservation;
use crate::stock::StockAdjustmentReason;

/// What happened, for the ops/admin trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ReservationCreated,
    ReservationReleased,
    ReservationExpired,
    ReservationExtended,
    ReservationConsumed,
    StockAdjusted,
}

impl AuditAction {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationCreated => "reservation_created",
            Self::ReservationReleased => "reservation_released",
            Self::ReservationExpired => "reservation_expired",
            Self::ReservationExtended => "reservation_extended",
            Self::ReservationConsumed => "reservation_consumed",
            Self::StockAdjusted => "stock_adjusted",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reservation_created" => Some(Self::ReservationCreated),
            "reservation_released" => Some(Self::ReservationReleased),
            "reservation_expired" => Some(Self::ReservationExpired),
            "reservation_extended" => Some(Self::ReservationExtended),
            "reservation_consumed" => Some(Self::ReservationConsumed),
            "stock_adjusted" => Some(Self::StockAdjusted),
            _ => None,
        }
    }
}

/// One audit row. Reservation events carry the reservation id and held
/// quantity; stock adjustments carry the delta and before/after values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub store_id: StoreId,
    pub action: AuditAction,
    pub item: Option<ItemRef>,
    pub reservation_id: Option<ReservationId>,
    pub order_id: Option<OrderId>,
    pub quantity_delta: Option<i64>,
    pub quantity_before: Option<i64>,
    pub quantity_after: Option<i64>,
    pub reason: Option<StockAdjustmentReason>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry for a reservation lifecycle event.
    pub fn for_reservation(
        action: AuditAction,
        reservation: &Reservation,
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store_id: reservation.store_id,
            action,
            item: Some(reservation.item),
            reservation_id: Some(reservation.id),
            order_id,
            quantity_delta: Some(reservation.quantity),
            quantity_before: None,
            quantity_after: None,
            reason: None,
            actor: None,
            created_at: now,
        }
    }

    /// Entry for a ledger adjustment with before/after values. Chain
    /// [`with_actor`](Self::with_actor) when an acting identity is known.
    #[allow(clippy::too_many_arguments)]
    pub fn for_stock_adjustment(
        store_id: StoreId,
        item: ItemRef,
        delta: i64,
        before: i64,
        after: i64,
        reason: StockAdjustmentReason,
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store_id,
            action: AuditAction::StockAdjusted,
            item: Some(item),
            reservation_id: None,
            order_id,
            quantity_delta: Some(delta),
            quantity_before: Some(before),
            quantity_after: Some(after),
            reason: Some(reason),
            actor: None,
            created_at: now,
        }
    }

    /// Attaches the acting identity.
    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn action_string_roundtrip() {
        for action in [
            AuditAction::ReservationCreated,
            AuditAction::ReservationReleased,
            AuditAction::ReservationExpired,
            AuditAction::ReservationExtended,
            AuditAction::ReservationConsumed,
            AuditAction::StockAdjusted,
        ] {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn reservation_entry_carries_quantity_and_ids() {
        let r = Reservation::new(
            StoreId::new(),
            ItemRef::product(ProductId::new()),
            4,
            None,
            15,
            Utc::now(),
        );
        let order = OrderId::new();
        let entry =
            AuditEntry::for_reservation(AuditAction::ReservationConsumed, &r, Some(order), Utc::now());
        assert_eq!(entry.reservation_id, Some(r.id));
        assert_eq!(entry.order_id, Some(order));
        assert_eq!(entry.quantity_delta, Some(4));
        assert_eq!(entry.store_id, r.store_id);
    }

    #[test]
    fn adjustment_entry_records_before_and_after() {
        let entry = AuditEntry::for_stock_adjustment(
            StoreId::new(),
            ItemRef::product(ProductId::new()),
            -2,
            10,
            8,
            StockAdjustmentReason::OrderPlaced,
            None,
            Utc::now(),
        )
        .with_actor(Some("ops@example.com"));
        assert_eq!(entry.quantity_before, Some(10));
        assert_eq!(entry.quantity_after, Some(8));
        assert_eq!(entry.reason, Some(StockAdjustmentReason::OrderPlaced));
        assert_eq!(entry.actor.as_deref(), Some("ops@example.com"));
    }
}
