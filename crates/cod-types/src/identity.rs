//! Identity types for the COD engine
//!
//! Every entity gets its own UUID newtype so a batch id can never be passed
//! where a shipment id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

// Operational entities
define_id_type!(ShipmentId, "shp", "Unique identifier for a shipment");
define_id_type!(BatchId, "batch", "Unique identifier for a COD collection batch");
define_id_type!(PayoutId, "payout", "Unique identifier for a seller payout");

// Counterparties
define_id_type!(CarrierId, "carrier", "Unique identifier for a shipping carrier");
define_id_type!(SellerId, "seller", "Unique identifier for a seller (the merchant's customer)");

// Accounting references
define_id_type!(DocumentId, "doc", "Unique identifier for a bill, invoice or credit note");
define_id_type!(PaymentId, "pay", "Unique identifier for a posted payment");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_prefix() {
        let id = ShipmentId::new();
        assert!(id.to_string().starts_with("shp_"));
    }

    #[test]
    fn test_parse_accepts_prefixed_and_bare() {
        let id = BatchId::new();
        assert_eq!(BatchId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(BatchId::parse(&id.0.to_string()).unwrap(), id);
        assert!(BatchId::parse("batch_not-a-uuid").is_err());
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(SellerId::new(), SellerId::new());
    }
}
