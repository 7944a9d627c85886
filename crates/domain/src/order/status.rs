//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::stock::StockAdjustmentReason;

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──┬──► Paid ──► Processing ──► Shipped ──► Delivered
///           │     │            │            │            │
///           │     └────────────┴────────────┴────────────┴──► Refunded
///           ├──► PaymentFailed ──► (Pending | Paid)            ▲
///           └──► Canceled ──► Pending                          │
///                   └──────────────────────────────────────────┘
/// ```
/// A self-transition is always legal; it is used for metadata-only
/// updates such as attaching a tracking number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created, payment not yet settled.
    #[default]
    Pending,
    /// Payment attempt failed; the order may be retried or cancelled.
    PaymentFailed,
    /// Payment confirmed.
    Paid,
    /// Order is being fulfilled.
    Processing,
    /// Order handed to the carrier.
    Shipped,
    /// Order received by the customer.
    Delivered,
    /// Order cancelled; inventory restored.
    Canceled,
    /// Order refunded (terminal).
    Refunded,
}

impl OrderStatus {
    /// True when a transition from `self` to `to` is legal.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        use OrderStatus::*;

        if *self == to {
            return true;
        }
        match self {
            Pending => matches!(to, Paid | PaymentFailed | Processing | Canceled),
            PaymentFailed => matches!(to, Pending | Paid | Canceled),
            Paid => matches!(to, Processing | Shipped | Canceled | Refunded),
            Processing => matches!(to, Shipped | Delivered | Canceled | Refunded),
            Shipped => matches!(to, Delivered | Canceled | Refunded),
            Delivered => matches!(to, Refunded),
            Canceled => matches!(to, Pending | Refunded),
            Refunded => false,
        }
    }

    /// Validates a transition, returning the domain error that names both
    /// states when it is illegal.
    pub fn transition_to(&self, to: OrderStatus) -> Result<(), DomainError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition { from: *self, to })
        }
    }

    /// True when no transition to a different status is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Refunded)
    }

    /// True when the order may be removed from storage outright rather
    /// than soft-deleted.
    pub fn allows_hard_delete(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Canceled)
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "payment_failed" => Some(OrderStatus::PaymentFailed),
            "paid" => Some(OrderStatus::Paid),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "canceled" => Some(OrderStatus::Canceled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }

    /// Every status, for exhaustive table checks.
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::PaymentFailed,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
        OrderStatus::Refunded,
    ];
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a status change does to the stock ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// Ledger untouched.
    None,
    /// Each line's quantity is added back, tagged with the reason.
    Restore(StockAdjustmentReason),
    /// Each line's quantity is deducted again (cancelled order
    /// reactivated).
    Rededuct,
}

/// Decides the ledger effect of a legal transition.
///
/// Entering `Canceled` restores stock; entering `Refunded` restores only
/// from statuses where stock is still deducted, so a refund after a
/// cancellation does not restore twice. `Canceled -> Pending` re-deducts
/// so that a later re-cancel stays symmetric.
pub fn stock_effect(from: OrderStatus, to: OrderStatus) -> StockEffect {
    use OrderStatus::*;

    if from == to {
        return StockEffect::None;
    }
    match (from, to) {
        (_, Canceled) => StockEffect::Restore(StockAdjustmentReason::Cancellation),
        (Paid | Processing | Shipped | Delivered, Refunded) => {
            StockEffect::Restore(StockAdjustmentReason::Refund)
        }
        (Canceled, Pending) => StockEffect::Rededuct,
        _ => StockEffect::None,
    }
}
