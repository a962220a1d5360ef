//! Daily rollup rules
//!
//! Maps ledger movements onto the accumulator columns of a daily summary.
//! The lookup is keyed by `(reason, operation)` and every column carries the
//! sign of the operations mapped to it, so a fully aggregated summary's
//! `end_quantity` equals the closing balance of the day.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    balance_from_movements, DailyMovementSummary, MovementOperation, MovementReason,
};

/// Version of [`REASON_MAPPING`]; bump when an entry changes meaning
pub const REASON_MAPPING_VERSION: u32 = 1;

/// Accumulator column of a daily summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryColumn {
    Incoming,
    Sales,
    ReturnSales,
    ReturnWaste,
}

/// Exhaustive list of classifiable movements
pub const REASON_MAPPING: [(MovementReason, MovementOperation, SummaryColumn); 7] = [
    (MovementReason::Purchase, MovementOperation::In, SummaryColumn::Incoming),
    (MovementReason::StocktakingAdjustment, MovementOperation::In, SummaryColumn::Incoming),
    (MovementReason::Order, MovementOperation::Out, SummaryColumn::Sales),
    (MovementReason::ReturnSales, MovementOperation::In, SummaryColumn::ReturnSales),
    (MovementReason::ReturnWaste, MovementOperation::Out, SummaryColumn::ReturnWaste),
    (MovementReason::Waste, MovementOperation::Out, SummaryColumn::ReturnWaste),
    (MovementReason::StocktakingAdjustment, MovementOperation::Out, SummaryColumn::ReturnWaste),
];

/// A movement that no summary column accepts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no summary column for {reason}/{operation} movements (mapping v{version})")]
pub struct UnmappedMovement {
    pub reason: MovementReason,
    pub operation: MovementOperation,
    pub version: u32,
}

impl SummaryColumn {
    pub fn for_movement(
        reason: MovementReason,
        operation: MovementOperation,
    ) -> Result<Self, UnmappedMovement> {
        REASON_MAPPING
            .iter()
            .find(|(r, op, _)| *r == reason && *op == operation)
            .map(|(_, _, column)| *column)
            .ok_or(UnmappedMovement {
                reason,
                operation,
                version: REASON_MAPPING_VERSION,
            })
    }
}

/// Accumulated column totals for one product and day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAccumulators {
    pub incoming_quantity: Decimal,
    pub sales_quantity: Decimal,
    pub return_sales_quantity: Decimal,
    pub return_waste_quantity: Decimal,
}

impl DailyAccumulators {
    pub fn add(&mut self, column: SummaryColumn, quantity: Decimal) {
        match column {
            SummaryColumn::Incoming => self.incoming_quantity += quantity,
            SummaryColumn::Sales => self.sales_quantity += quantity,
            SummaryColumn::ReturnSales => self.return_sales_quantity += quantity,
            SummaryColumn::ReturnWaste => self.return_waste_quantity += quantity,
        }
    }

    /// Fold `(reason, operation, quantity)` totals into columns, failing on
    /// the first movement that has no column
    pub fn from_totals<I>(totals: I) -> Result<Self, UnmappedMovement>
    where
        I: IntoIterator<Item = (MovementReason, MovementOperation, Decimal)>,
    {
        let mut acc = Self::default();
        for (reason, operation, quantity) in totals {
            acc.add(SummaryColumn::for_movement(reason, operation)?, quantity);
        }
        Ok(acc)
    }

    /// Overwrite the accumulator columns of a summary, keeping its start quantity
    pub fn apply_to(&self, summary: &mut DailyMovementSummary) {
        summary.incoming_quantity = self.incoming_quantity;
        summary.sales_quantity = self.sales_quantity;
        summary.return_sales_quantity = self.return_sales_quantity;
        summary.return_waste_quantity = self.return_waste_quantity;
    }
}

/// Half-open UTC interval `[start, end)` covering a calendar day
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// A product's stock as `open_day` reads it
#[derive(Debug, Clone, PartialEq)]
pub struct OpeningPosition {
    pub product_id: Uuid,
    /// Current balance; `None` for products that never moved
    pub balance: Option<Decimal>,
    /// Ledger totals posted at or after the start of the day being opened
    pub moved_in: Decimal,
    pub moved_out: Decimal,
}

impl OpeningPosition {
    /// Signed ledger change since the start of the day
    pub fn moved_since_day_start(&self) -> Decimal {
        balance_from_movements([
            (MovementOperation::In, self.moved_in),
            (MovementOperation::Out, self.moved_out),
        ])
    }

    /// Balance as it stood at the start of the day
    pub fn start_of_day(&self) -> Option<Decimal> {
        self.balance.map(|balance| balance - self.moved_since_day_start())
    }

    /// The day already has ledger activity
    pub fn opened_late(&self) -> bool {
        !self.moved_in.is_zero() || !self.moved_out.is_zero()
    }
}

/// Rows `open_day` must create: one per product that has a balance and no
/// summary for the date yet, starting from the balance at the day's start
pub fn plan_open_day(
    date: NaiveDate,
    positions: &[OpeningPosition],
    already_opened: &HashSet<Uuid>,
) -> Vec<DailyMovementSummary> {
    positions
        .iter()
        .filter(|position| !already_opened.contains(&position.product_id))
        .filter_map(|position| {
            position
                .start_of_day()
                .map(|start| DailyMovementSummary::opened(position.product_id, date, start))
        })
        .collect()
}
