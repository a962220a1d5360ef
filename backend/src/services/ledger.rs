//! Movement ledger service
//!
//! The ledger is append-only: every stock change is one `inventory_movements`
//! row, and the product's `inventory_balances` row is moved by the same signed
//! quantity inside the same transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    day_bounds, validate_movement, InventoryBalance, LowStockProduct, Movement, MovementOperation,
    MovementReason, ProductQuantity, Reference,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Ledger service for posting movements and reading balances
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

/// A movement to be appended to the ledger
#[derive(Debug, Clone, Deserialize)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub operation: MovementOperation,
    pub quantity: Decimal,
    pub reason: MovementReason,
    #[serde(default)]
    pub reference: Option<Reference>,
}

/// Input for posting one movement per product with a single reason
#[derive(Debug, Clone, Deserialize)]
pub struct BatchMovementInput {
    pub operation: MovementOperation,
    pub reason: MovementReason,
    pub items: Vec<ProductQuantity>,
    #[serde(default)]
    pub reference: Option<Reference>,
}

/// A ledger entry together with the balance it produced
#[derive(Debug, Clone, Serialize)]
pub struct PostedMovement {
    #[serde(flatten)]
    pub movement: Movement,
    pub balance_after: Decimal,
}

/// Query parameters for movement history
#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Row for movement queries
#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    seq: i64,
    product_id: Uuid,
    operation: String,
    quantity: Decimal,
    reason: String,
    referenceable_type: Option<String>,
    referenceable_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Movement {
            id: row.id,
            seq: row.seq,
            product_id: row.product_id,
            operation: row.operation.parse()?,
            quantity: row.quantity,
            reason: row.reason.parse()?,
            referenceable_type: row.referenceable_type,
            referenceable_id: row.referenceable_id,
            created_at: row.created_at,
        })
    }
}

/// Row for balance queries
#[derive(Debug, FromRow)]
struct BalanceRow {
    product_id: Uuid,
    quantity: Decimal,
    updated_at: DateTime<Utc>,
}

/// Row for low stock query
#[derive(Debug, FromRow)]
struct LowStockRow {
    product_id: Uuid,
    name: String,
    unit: String,
    min_stock: Decimal,
    quantity: Decimal,
}

/// Append one movement and move the balance, inside the caller's transaction.
///
/// The balance upsert holds the row lock on `inventory_balances` until the
/// caller commits, so concurrent posts for one product apply one after the
/// other. Negative balances are allowed.
pub async fn post_movement(conn: &mut PgConnection, movement: &NewMovement) -> AppResult<PostedMovement> {
    validate_movement(
        movement.product_id,
        movement.operation,
        movement.reason,
        movement.quantity,
    )?;

    let (referenceable_type, referenceable_id) = match &movement.reference {
        Some(reference) => (
            Some(reference.referenceable_type.as_str()),
            Some(reference.referenceable_id),
        ),
        None => (None, None),
    };

    let row = sqlx::query_as::<_, MovementRow>(
        r#"
        INSERT INTO inventory_movements (
            product_id, operation, quantity, reason, referenceable_type, referenceable_id
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, seq, product_id, operation, quantity, reason,
                  referenceable_type, referenceable_id, created_at
        "#,
    )
    .bind(movement.product_id)
    .bind(movement.operation.as_str())
    .bind(movement.quantity)
    .bind(movement.reason.as_str())
    .bind(referenceable_type)
    .bind(referenceable_id)
    .fetch_one(&mut *conn)
    .await?;

    let balance_after = sqlx::query_scalar::<_, Decimal>(
        r#"
        INSERT INTO inventory_balances (product_id, quantity, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (product_id) DO UPDATE
        SET quantity = inventory_balances.quantity + EXCLUDED.quantity,
            updated_at = NOW()
        RETURNING quantity
        "#,
    )
    .bind(movement.product_id)
    .bind(movement.operation.signed(movement.quantity))
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        product_id = %movement.product_id,
        operation = %movement.operation,
        reason = %movement.reason,
        quantity = %movement.quantity,
        balance_after = %balance_after,
        "Posted stock movement"
    );

    Ok(PostedMovement {
        movement: row.try_into()?,
        balance_after,
    })
}

/// Post one movement per entry with a single operation and reason.
///
/// Entries are not filtered: a zero quantity fails the whole batch, so
/// callers must drop lines they do not want posted. All entries are
/// validated before anything is written.
pub async fn post_movements(
    conn: &mut PgConnection,
    operation: MovementOperation,
    reason: MovementReason,
    items: &[ProductQuantity],
    reference: Option<&Reference>,
) -> AppResult<Vec<PostedMovement>> {
    for item in items {
        validate_movement(item.product_id, operation, reason, item.quantity)?;
    }

    let mut posted = Vec::with_capacity(items.len());
    for item in items {
        let movement = NewMovement {
            product_id: item.product_id,
            operation,
            quantity: item.quantity,
            reason,
            reference: reference.cloned(),
        };
        posted.push(post_movement(&mut *conn, &movement).await?);
    }
    Ok(posted)
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Post a single movement in its own transaction
    #[tracing::instrument(skip(self, movement), fields(product_id = %movement.product_id))]
    pub async fn post(&self, movement: NewMovement) -> AppResult<PostedMovement> {
        let mut tx = self.db.begin().await?;
        let posted = post_movement(&mut *tx, &movement).await?;
        tx.commit().await?;
        Ok(posted)
    }

    /// Post a batch of movements in one transaction
    #[tracing::instrument(skip(self, input), fields(reason = %input.reason, count = input.items.len()))]
    pub async fn post_batch(&self, input: BatchMovementInput) -> AppResult<Vec<PostedMovement>> {
        let mut tx = self.db.begin().await?;
        let posted = post_movements(
            &mut *tx,
            input.operation,
            input.reason,
            &input.items,
            input.reference.as_ref(),
        )
        .await?;
        tx.commit().await?;
        Ok(posted)
    }

    /// Get the current balance of a product
    pub async fn balance(&self, product_id: Uuid) -> AppResult<InventoryBalance> {
        let row = sqlx::query_as::<_, BalanceRow>(
            "SELECT product_id, quantity, updated_at FROM inventory_balances WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Inventory balance for product {}", product_id)))?;

        Ok(InventoryBalance {
            product_id: row.product_id,
            quantity: row.quantity,
            updated_at: row.updated_at,
        })
    }

    /// Get the movement history of a product in ledger order
    pub async fn movements(&self, product_id: Uuid, query: MovementQuery) -> AppResult<Vec<Movement>> {
        let from = query.from.map(|date| day_bounds(date).0);
        let until = query.to.map(|date| day_bounds(date).1);

        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, seq, product_id, operation, quantity, reason,
                   referenceable_type, referenceable_id, created_at
            FROM inventory_movements
            WHERE product_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at, seq
            "#,
        )
        .bind(product_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Movement::try_from).collect()
    }

    /// List products whose balance is below their minimum stock
    pub async fn low_stock(&self) -> AppResult<Vec<LowStockProduct>> {
        let rows = sqlx::query_as::<_, LowStockRow>(
            r#"
            SELECT p.id AS product_id, p.name, p.unit, p.min_stock, b.quantity
            FROM products p
            JOIN inventory_balances b ON b.product_id = p.id
            WHERE b.quantity < p.min_stock
            ORDER BY b.quantity - p.min_stock, p.name
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LowStockProduct {
                product_id: r.product_id,
                name: r.name,
                unit: r.unit,
                min_stock: r.min_stock,
                quantity: r.quantity,
            })
            .collect())
    }
}
