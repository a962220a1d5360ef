//! Stock movement, balance and daily summary models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UnknownVariant;

/// Direction of a stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementOperation {
    In,
    Out,
}

impl MovementOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementOperation::In => "in",
            MovementOperation::Out => "out",
        }
    }

    /// Apply the operation's sign to a (positive) quantity
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            MovementOperation::In => quantity,
            MovementOperation::Out => -quantity,
        }
    }
}

impl FromStr for MovementOperation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementOperation::In),
            "out" => Ok(MovementOperation::Out),
            other => Err(UnknownVariant::new("movement operation", other)),
        }
    }
}

impl fmt::Display for MovementOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why stock changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    /// Goods received from a supplier
    Purchase,
    /// Stock consumed by a completed customer order
    Order,
    /// Stock added back from a customer return
    ReturnSales,
    /// Returned or spoiled stock written off
    ReturnWaste,
    Waste,
    /// Correction after a physical count (either direction)
    StocktakingAdjustment,
}

impl MovementReason {
    pub const ALL: [MovementReason; 6] = [
        MovementReason::Purchase,
        MovementReason::Order,
        MovementReason::ReturnSales,
        MovementReason::ReturnWaste,
        MovementReason::Waste,
        MovementReason::StocktakingAdjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Purchase => "purchase",
            MovementReason::Order => "order",
            MovementReason::ReturnSales => "return_sales",
            MovementReason::ReturnWaste => "return_waste",
            MovementReason::Waste => "waste",
            MovementReason::StocktakingAdjustment => "stocktaking_adjustment",
        }
    }
}

impl FromStr for MovementReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementReason::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("movement reason", s))
    }
}

impl fmt::Display for MovementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    /// Insertion order, breaks ties between equal timestamps
    pub seq: i64,
    pub product_id: Uuid,
    pub operation: MovementOperation,
    pub quantity: Decimal,
    pub reason: MovementReason,
    pub referenceable_type: Option<String>,
    pub referenceable_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Quantity with the operation's sign applied
    pub fn signed_quantity(&self) -> Decimal {
        self.operation.signed(self.quantity)
    }
}

/// Current materialized stock for a product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryBalance {
    pub product_id: Uuid,
    /// May be negative when a product was oversold
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Fold a sequence of movements into the balance they imply
pub fn balance_from_movements<I>(movements: I) -> Decimal
where
    I: IntoIterator<Item = (MovementOperation, Decimal)>,
{
    movements
        .into_iter()
        .map(|(operation, quantity)| operation.signed(quantity))
        .sum()
}

/// Per-product, per-day rollup of ledger activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMovementSummary {
    pub product_id: Uuid,
    pub date: NaiveDate,
    /// Balance when the day was opened; written once
    pub start_quantity: Decimal,
    pub incoming_quantity: Decimal,
    pub sales_quantity: Decimal,
    pub return_sales_quantity: Decimal,
    pub return_waste_quantity: Decimal,
}

impl DailyMovementSummary {
    /// A freshly opened day with zeroed accumulators
    pub fn opened(product_id: Uuid, date: NaiveDate, start_quantity: Decimal) -> Self {
        Self {
            product_id,
            date,
            start_quantity,
            incoming_quantity: Decimal::ZERO,
            sales_quantity: Decimal::ZERO,
            return_sales_quantity: Decimal::ZERO,
            return_waste_quantity: Decimal::ZERO,
        }
    }

    pub fn end_quantity(&self) -> Decimal {
        self.start_quantity + self.incoming_quantity - self.sales_quantity
            + self.return_sales_quantity
            - self.return_waste_quantity
    }
}

/// A product whose balance fell below its configured minimum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowStockProduct {
    pub product_id: Uuid,
    pub name: String,
    pub unit: String,
    pub min_stock: Decimal,
    pub quantity: Decimal,
}
