//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod reservations;
pub mod stock;

use common::{ProductId, VariantId};
use domain::ItemRef;
use serde::Deserialize;
use uuid::Uuid;

/// Item reference as it appears in request bodies and query strings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ItemParams {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}

impl ItemParams {
    pub fn item(&self) -> ItemRef {
        ItemRef::from_parts(
            ProductId::from_uuid(self.product_id),
            self.variant_id.map(VariantId::from_uuid),
        )
    }
}
