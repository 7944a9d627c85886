//! Reference to a sellable item: a product, or one of its variants.

use common::{ProductId, VariantId};
use serde::{Deserialize, Serialize};

/// Identifies the unit of stock a level, reservation, or order line refers
/// to. Stock is tracked per product, or per variant when the product has
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemRef {
    /// A product without variant granularity.
    Product { product_id: ProductId },
    /// A specific variant of a product.
    Variant {
        product_id: ProductId,
        variant_id: VariantId,
    },
}

impl ItemRef {
    /// Creates a product-level reference.
    pub fn product(product_id: ProductId) -> Self {
        Self::Product { product_id }
    }

    /// Creates a variant-level reference.
    pub fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self::Variant {
            product_id,
            variant_id,
        }
    }

    /// Builds a reference from a product id and an optional variant id.
    pub fn from_parts(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        match variant_id {
            Some(variant_id) => Self::variant(product_id, variant_id),
            None => Self::product(product_id),
        }
    }

    /// The product this reference belongs to.
    pub fn product_id(&self) -> ProductId {
        match self {
            Self::Product { product_id } | Self::Variant { product_id, .. } => *product_id,
        }
    }

    /// The variant, when this reference is variant-scoped.
    pub fn variant_id(&self) -> Option<VariantId> {
        match self {
            Self::Product { .. } => None,
            Self::Variant { variant_id, .. } => Some(*variant_id),
        }
    }
}

impl std::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product { product_id } => write!(f, "product {product_id}"),
            Self::Variant {
                product_id,
                variant_id,
            } => write!(f, "product {product_id} variant {variant_id}"),
        }
    }
}
