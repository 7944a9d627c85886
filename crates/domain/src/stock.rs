//! Stock levels and availability algebra.

use common::StoreId;
use serde::{Deserialize, Serialize};

use crate::item::ItemRef;

/// Durable count of units on hand for one sellable item.
///
/// Invariant: `total_quantity` never goes negative. Reservations never
/// modify it; only a committed order, a cancellation/refund restoration,
/// or a manual adjustment does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub store_id: StoreId,
    pub item: ItemRef,
    pub total_quantity: i64,
    pub low_stock_threshold: i64,
}

impl StockLevel {
    /// Creates a stock level with the given on-hand quantity.
    pub fn new(store_id: StoreId, item: ItemRef, total_quantity: i64) -> Self {
        Self {
            store_id,
            item,
            total_quantity,
            low_stock_threshold: 0,
        }
    }

    /// Sets the low-stock warning threshold.
    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    /// True when on-hand quantity has fallen to or below the threshold.
    pub fn is_low_stock(&self) -> bool {
        self.total_quantity <= self.low_stock_threshold
    }
}

/// Read-only availability snapshot for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    /// Units physically on hand.
    pub total_stock: i64,
    /// Units held by active, unexpired reservations.
    pub reserved_quantity: i64,
    /// Units a new reservation may claim, clamped at zero.
    pub available_stock: i64,
}

impl StockAvailability {
    /// Computes availability: `max(0, total - reserved)`.
    pub fn compute(total_stock: i64, reserved_quantity: i64) -> Self {
        Self {
            total_stock,
            reserved_quantity,
            available_stock: (total_stock - reserved_quantity).max(0),
        }
    }
}

/// Why an inventory adjustment happened, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockAdjustmentReason {
    /// Manual correction, e.g. a warehouse recount.
    Manual,
    /// Deduction at order commit.
    OrderPlaced,
    /// Restoration when an order is cancelled.
    Cancellation,
    /// Restoration when an order is refunded.
    Refund,
    /// Re-deduction when a cancelled order is reactivated.
    OrderReactivated,
}

impl StockAdjustmentReason {
    /// Stable string form used in storage and audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::OrderPlaced => "order_placed",
            Self::Cancellation => "cancellation",
            Self::Refund => "refund",
            Self::OrderReactivated => "order_reactivated",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "order_placed" => Some(Self::OrderPlaced),
            "cancellation" => Some(Self::Cancellation),
            "refund" => Some(Self::Refund),
            "order_reactivated" => Some(Self::OrderReactivated),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockAdjustmentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
