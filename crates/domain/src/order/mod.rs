//! Orders: immutable line-item snapshots, drafts, numbering, and the
//! status state machine.

mod number;
mod status;

use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, ProductId, StoreId, VariantId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::item::ItemRef;

pub use number::{format_order_number, next_order_number, order_number_prefix};
pub use status::{OrderStatus, StockEffect, stock_effect};

/// Immutable snapshot of one ordered line, captured at commit time.
///
/// Product name, SKU, and image are denormalized so historical orders stay
/// accurate after catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl OrderItem {
    /// Creates a line item; the line total is quantity times unit price.
    pub fn new(
        product_id: ProductId,
        variant_id: Option<VariantId>,
        product_name: impl Into<String>,
        sku: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            variant_id,
            product_name: product_name.into(),
            sku: sku.into(),
            image_url: None,
            quantity,
            unit_price,
            line_total: unit_price.multiply(quantity),
        }
    }

    /// Sets the denormalized product image.
    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// The stock item this line deducts from.
    pub fn item(&self) -> ItemRef {
        ItemRef::from_parts(self.product_id, self.variant_id)
    }
}

/// Input to order commit: everything except what the transaction decides
/// (id, number, timestamps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: Option<String>,
    pub payment_method: String,
    pub items: Vec<OrderItem>,
    /// When set, active reservations of this cart are consumed by the
    /// commit.
    pub cart_id: Option<CartId>,
    /// Client-supplied token making a retried commit return the original
    /// order instead of creating a duplicate.
    pub idempotency_key: Option<String>,
}

impl OrderDraft {
    /// Rejects malformed drafts before any transaction opens.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::NoItems);
        }
        for item in &self.items {
            if item.quantity == 0 {
                return Err(DomainError::InvalidQuantity { quantity: 0 });
            }
            if item.unit_price.cents() < 0 {
                return Err(DomainError::InvalidPrice {
                    cents: item.unit_price.cents(),
                });
            }
        }
        Ok(())
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(|i| i.line_total).sum()
    }
}

/// A committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub store_id: StoreId,
    /// Unique per store, date-scoped sequence (`ORD-YYYYMMDD-NNNN`).
    pub order_number: String,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: Option<String>,
    pub payment_method: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Soft-delete marker; orders not eligible for hard removal keep their
    /// row and set this instead.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Materializes a draft into a pending order.
    pub fn from_draft(
        store_id: StoreId,
        order_number: String,
        draft: OrderDraft,
        now: DateTime<Utc>,
    ) -> Self {
        let subtotal = draft.subtotal();
        Self {
            id: OrderId::new(),
            store_id,
            order_number,
            status: OrderStatus::Pending,
            idempotency_key: draft.idempotency_key,
            customer_name: draft.customer_name,
            customer_email: draft.customer_email,
            shipping_address: draft.shipping_address,
            payment_method: draft.payment_method,
            items: draft.items,
            subtotal,
            total: subtotal,
            created_at: now,
            delivered_at: None,
            cancelled_at: None,
            deleted_at: None,
        }
    }

    /// Applies a validated status change, stamping delivery and
    /// cancellation timestamps on entry. Self-transitions leave
    /// timestamps alone.
    pub fn apply_status(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.status.transition_to(to)?;
        if self.status != to {
            match to {
                OrderStatus::Delivered => self.delivered_at = Some(now),
                OrderStatus::Canceled => self.cancelled_at = Some(now),
                _ => {}
            }
            self.status = to;
        }
        Ok(())
    }
}
