//! Daily movement summary service
//!
//! `open_day` captures each product's start-of-day balance exactly once. When
//! the day already has ledger activity, the movements posted since midnight
//! are taken back out of the current balance first. `aggregate` recomputes
//! the accumulator columns of a day from the ledger and upserts them, so it
//! can be re-run any number of times with the same result.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    day_bounds, plan_open_day, DailyAccumulators, DailyMovementSummary, MovementOperation,
    MovementReason, OpeningPosition,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;

/// Service for opening days and folding ledger activity into daily summaries
#[derive(Clone)]
pub struct DailySummaryService {
    db: PgPool,
}

/// Input for aggregating a set of products
#[derive(Debug, Deserialize)]
pub struct AggregateInput {
    /// Products to aggregate; every product moved that day when omitted
    #[serde(default)]
    pub product_ids: Option<Vec<Uuid>>,
}

/// Result of aggregating one product for one day
#[derive(Debug, Clone, Serialize)]
pub struct AggregateOutcome {
    #[serde(flatten)]
    pub summary: SummaryView,
    /// The day had not been opened; the row was created with a zero start quantity
    pub opened_by_fallback: bool,
}

/// Summary row with its derived closing quantity
#[derive(Debug, Clone, Serialize)]
pub struct SummaryView {
    #[serde(flatten)]
    pub summary: DailyMovementSummary,
    pub end_quantity: Decimal,
}

impl From<DailyMovementSummary> for SummaryView {
    fn from(summary: DailyMovementSummary) -> Self {
        let end_quantity = summary.end_quantity();
        Self {
            summary,
            end_quantity,
        }
    }
}

/// Row for summary queries
#[derive(Debug, FromRow)]
struct SummaryRow {
    product_id: Uuid,
    date: NaiveDate,
    start_quantity: Decimal,
    incoming_quantity: Decimal,
    sales_quantity: Decimal,
    return_sales_quantity: Decimal,
    return_waste_quantity: Decimal,
}

impl From<SummaryRow> for DailyMovementSummary {
    fn from(row: SummaryRow) -> Self {
        DailyMovementSummary {
            product_id: row.product_id,
            date: row.date,
            start_quantity: row.start_quantity,
            incoming_quantity: row.incoming_quantity,
            sales_quantity: row.sales_quantity,
            return_sales_quantity: row.return_sales_quantity,
            return_waste_quantity: row.return_waste_quantity,
        }
    }
}

/// Row for a product's balance and its ledger totals since a day started
#[derive(Debug, FromRow)]
struct OpeningRow {
    product_id: Uuid,
    balance: Option<Decimal>,
    moved_in: Decimal,
    moved_out: Decimal,
}

impl From<OpeningRow> for OpeningPosition {
    fn from(row: OpeningRow) -> Self {
        OpeningPosition {
            product_id: row.product_id,
            balance: row.balance,
            moved_in: row.moved_in,
            moved_out: row.moved_out,
        }
    }
}

/// Row for per-reason ledger totals
#[derive(Debug, FromRow)]
struct ReasonTotalRow {
    reason: String,
    operation: String,
    quantity: Decimal,
}

impl DailySummaryService {
    /// Create a new DailySummaryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a summary row for every product with a balance that has none
    /// for `date` yet. Returns the number of rows created.
    #[tracing::instrument(skip(self))]
    pub async fn open_day(&self, date: NaiveDate) -> AppResult<u64> {
        let (day_start, _) = day_bounds(date);
        let mut tx = self.db.begin().await?;

        // One statement, so balances and ledger totals come from one snapshot
        let positions: Vec<OpeningPosition> = sqlx::query_as::<_, OpeningRow>(
            r#"
            SELECT p.id AS product_id,
                   b.quantity AS balance,
                   COALESCE(SUM(m.quantity) FILTER (WHERE m.operation = 'in'), 0) AS moved_in,
                   COALESCE(SUM(m.quantity) FILTER (WHERE m.operation = 'out'), 0) AS moved_out
            FROM products p
            LEFT JOIN inventory_balances b ON b.product_id = p.id
            LEFT JOIN inventory_movements m ON m.product_id = p.id AND m.created_at >= $1
            GROUP BY p.id, b.quantity
            "#,
        )
        .bind(day_start)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(OpeningPosition::from)
        .collect();

        let already_opened: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
            "SELECT product_id FROM inventory_daily_summaries WHERE date = $1",
        )
        .bind(date)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let late = positions
            .iter()
            .filter(|p| !already_opened.contains(&p.product_id) && p.opened_late())
            .count();
        if late > 0 {
            tracing::warn!(
                %date,
                products = late,
                "Opening a day that already has movements; start_quantity rewound to the start of the day"
            );
        }

        let mut created = 0;
        for summary in plan_open_day(date, &positions, &already_opened) {
            // A concurrent open_day may have inserted the row since we looked
            let result = sqlx::query(
                r#"
                INSERT INTO inventory_daily_summaries (
                    product_id, date, start_quantity, incoming_quantity, sales_quantity,
                    return_sales_quantity, return_waste_quantity
                )
                VALUES ($1, $2, $3, 0, 0, 0, 0)
                ON CONFLICT (product_id, date) DO NOTHING
                "#,
            )
            .bind(summary.product_id)
            .bind(summary.date)
            .bind(summary.start_quantity)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected();
        }

        tx.commit().await?;

        tracing::info!(%date, created, "Opened inventory day");
        Ok(created)
    }

    /// Recompute the accumulator columns of `date` for each product from the ledger
    #[tracing::instrument(skip(self, product_ids), fields(products = product_ids.len()))]
    pub async fn aggregate(
        &self,
        product_ids: &[Uuid],
        date: NaiveDate,
    ) -> AppResult<Vec<AggregateOutcome>> {
        let mut outcomes = Vec::with_capacity(product_ids.len());
        for &product_id in product_ids {
            outcomes.push(self.aggregate_product(product_id, date).await?);
        }
        Ok(outcomes)
    }

    /// Aggregate every product that has ledger entries on `date`
    pub async fn aggregate_moved(&self, date: NaiveDate) -> AppResult<Vec<AggregateOutcome>> {
        let product_ids = self.products_moved_on(date).await?;
        self.aggregate(&product_ids, date).await
    }

    async fn aggregate_product(&self, product_id: Uuid, date: NaiveDate) -> AppResult<AggregateOutcome> {
        let (day_start, day_end) = day_bounds(date);
        let mut tx = self.db.begin().await?;

        // Claim the summary row first so overlapping aggregations of the same
        // product and day run one after the other; xmax = 0 only for fresh inserts
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO inventory_daily_summaries (
                product_id, date, start_quantity, incoming_quantity, sales_quantity,
                return_sales_quantity, return_waste_quantity
            )
            VALUES ($1, $2, 0, 0, 0, 0, 0)
            ON CONFLICT (product_id, date) DO UPDATE
            SET updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(product_id)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, ReasonTotalRow>(
            r#"
            SELECT reason, operation, SUM(quantity) AS quantity
            FROM inventory_movements
            WHERE product_id = $1 AND created_at >= $2 AND created_at < $3
            GROUP BY reason, operation
            "#,
        )
        .bind(product_id)
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&mut *tx)
        .await?;

        let mut totals = Vec::with_capacity(rows.len());
        for row in rows {
            let reason: MovementReason = row.reason.parse()?;
            let operation: MovementOperation = row.operation.parse()?;
            totals.push((reason, operation, row.quantity));
        }
        let accumulators = DailyAccumulators::from_totals(totals)?;

        let start_quantity = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE inventory_daily_summaries
            SET incoming_quantity = $3,
                sales_quantity = $4,
                return_sales_quantity = $5,
                return_waste_quantity = $6,
                updated_at = NOW()
            WHERE product_id = $1 AND date = $2
            RETURNING start_quantity
            "#,
        )
        .bind(product_id)
        .bind(date)
        .bind(accumulators.incoming_quantity)
        .bind(accumulators.sales_quantity)
        .bind(accumulators.return_sales_quantity)
        .bind(accumulators.return_waste_quantity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if inserted {
            tracing::warn!(
                %product_id,
                %date,
                "Aggregated a day that was never opened; start_quantity defaulted to 0"
            );
        }

        let mut summary = DailyMovementSummary::opened(product_id, date, start_quantity);
        accumulators.apply_to(&mut summary);

        Ok(AggregateOutcome {
            summary: summary.into(),
            opened_by_fallback: inserted,
        })
    }

    /// Products with at least one ledger entry on `date`
    pub async fn products_moved_on(&self, date: NaiveDate) -> AppResult<Vec<Uuid>> {
        let (day_start, day_end) = day_bounds(date);
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT product_id
            FROM inventory_movements
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY product_id
            "#,
        )
        .bind(day_start)
        .bind(day_end)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// All summary rows for a date
    pub async fn summaries(&self, date: NaiveDate) -> AppResult<Vec<SummaryView>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT product_id, date, start_quantity, incoming_quantity, sales_quantity,
                   return_sales_quantity, return_waste_quantity
            FROM inventory_daily_summaries
            WHERE date = $1
            ORDER BY product_id
            "#,
        )
        .bind(date)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SummaryView::from(DailyMovementSummary::from(row)))
            .collect())
    }
}
