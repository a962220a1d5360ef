//! Common types used across the inventory core

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Absolute tolerance when comparing money totals (0.01)
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Returns true when two money amounts differ by less than [`MONEY_TOLERANCE`].
/// A full cent of difference is a mismatch.
pub fn money_matches(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < MONEY_TOLERANCE
}

/// A stored enum value that does not name any known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Polymorphic pointer to the record that caused a movement
/// (e.g. `order` / order id, `order_return` / return id)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub referenceable_type: String,
    pub referenceable_id: Uuid,
}

impl Reference {
    pub fn new(referenceable_type: impl Into<String>, referenceable_id: Uuid) -> Self {
        Self {
            referenceable_type: referenceable_type.into(),
            referenceable_id,
        }
    }

    pub fn order(order_id: Uuid) -> Self {
        Self::new("order", order_id)
    }

    pub fn order_return(order_return_id: Uuid) -> Self {
        Self::new("order_return", order_return_id)
    }
}

/// A product together with a quantity, used for batch movements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductQuantity {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

impl ProductQuantity {
    pub fn new(product_id: Uuid, quantity: Decimal) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}
