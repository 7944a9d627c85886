//! Typed UUID identifiers.
//!
//! Each identifier wraps a UUID so that a reservation id can never be
//! passed where an order id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Identifier of a tenant store. Reservations, orders, and audit
    /// entries are all scoped by store.
    StoreId
}

uuid_id! {
    /// Identifier of a product in the catalog.
    ProductId
}

uuid_id! {
    /// Identifier of a product variant.
    VariantId
}

uuid_id! {
    /// Identifier of a stock reservation (hold).
    ReservationId
}

uuid_id! {
    /// Identifier of an order.
    OrderId
}

uuid_id! {
    /// Identifier of a checkout cart, used to group the reservations
    /// belonging to one checkout attempt.
    CartId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(StoreId::new(), StoreId::new());
        assert_ne!(ReservationId::new(), ReservationId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(OrderId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn serialization_is_transparent() {
        let id = CartId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: CartId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
