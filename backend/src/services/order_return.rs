//! Order return reconciliation service
//!
//! A return is validated against the order's full return history, persisted
//! with its items and refunds, optionally reverses stock through the ledger,
//! and recomputes the order's return status. All of it happens in a single
//! transaction holding a row lock on the order, so two concurrent returns for
//! the same order run one after the other and cannot jointly over-return.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{
    available_for_return, returned_quantities, validate_return_request, MovementOperation,
    MovementReason, OrderItem, OrderReturn, OrderReturnDetails, OrderReturnItem, OrderStatus,
    ProductQuantity, Reference, Refund, ReturnRequest, ReturnStatus, ReturnValidationError,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::ledger::{post_movements, PostedMovement};
use crate::services::notification::{DomainEvent, EventPublisher};

/// Service for processing customer returns against orders
#[derive(Clone)]
pub struct OrderReturnService {
    db: PgPool,
    notifier: Arc<dyn EventPublisher>,
}

/// A committed return together with its effects
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedReturn {
    #[serde(flatten)]
    pub details: OrderReturnDetails,
    pub return_status: ReturnStatus,
    pub movements: Vec<PostedMovement>,
}

/// Row for order item queries
#[derive(Debug, FromRow)]
pub(crate) struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    quantity: Decimal,
    price: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            price: row.price,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderReturnRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    shift_id: Option<Uuid>,
    total_refund: Decimal,
    reason: String,
    reverse_stock: bool,
    created_at: DateTime<Utc>,
}

impl From<OrderReturnRow> for OrderReturn {
    fn from(row: OrderReturnRow) -> Self {
        OrderReturn {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            shift_id: row.shift_id,
            total_refund: row.total_refund,
            reason: row.reason,
            reverse_stock: row.reverse_stock,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrderReturnItemRow {
    id: Uuid,
    order_return_id: Uuid,
    order_item_id: Uuid,
    quantity: Decimal,
    refund_amount: Decimal,
}

impl From<OrderReturnItemRow> for OrderReturnItem {
    fn from(row: OrderReturnItemRow) -> Self {
        OrderReturnItem {
            id: row.id,
            order_return_id: row.order_return_id,
            order_item_id: row.order_item_id,
            quantity: row.quantity,
            refund_amount: row.refund_amount,
        }
    }
}

#[derive(Debug, FromRow)]
struct RefundRow {
    id: Uuid,
    order_return_id: Uuid,
    amount: Decimal,
    method: String,
}

impl TryFrom<RefundRow> for Refund {
    type Error = AppError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Refund {
            id: row.id,
            order_return_id: row.order_return_id,
            amount: row.amount,
            method: row.method.parse()?,
        })
    }
}

/// Load the lines of an order
pub(crate) async fn load_order_items(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r#"
        SELECT id, order_id, product_id, quantity, price
        FROM order_items
        WHERE order_id = $1
        ORDER BY id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(OrderItem::from).collect())
}

/// Quantities already returned per order item, across every return of the order
async fn load_returned_quantities(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> AppResult<HashMap<Uuid, Decimal>> {
    let rows = sqlx::query_as::<_, (Uuid, Decimal)>(
        r#"
        SELECT ori.order_item_id, ori.quantity
        FROM order_return_items ori
        JOIN order_returns r ON r.id = ori.order_return_id
        WHERE r.order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(returned_quantities(rows))
}

impl OrderReturnService {
    /// Create a new OrderReturnService instance
    pub fn new(db: PgPool, notifier: Arc<dyn EventPublisher>) -> Self {
        Self { db, notifier }
    }

    /// Validate and record a return in one transaction.
    ///
    /// Any failure rolls back everything: no return, items, refunds or ledger
    /// movements survive a failed attempt.
    #[tracing::instrument(skip(self, request), fields(items = request.items.len(), reverse_stock = request.reverse_stock))]
    pub async fn process_return(&self, order_id: Uuid, request: &ReturnRequest) -> AppResult<ProcessedReturn> {
        request.validate()?;

        let mut tx = self.db.begin().await?;

        // Serializes concurrent returns for this order until commit
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?;

        if status.parse::<OrderStatus>()? == OrderStatus::Cancelled {
            return Err(AppError::InvalidStateTransition(format!(
                "Order {} is cancelled and cannot be returned",
                order_id
            )));
        }

        let order_items = load_order_items(&mut *tx, order_id).await?;
        let already_returned = load_returned_quantities(&mut *tx, order_id).await?;

        let plan = validate_return_request(
            order_id,
            &order_items,
            &already_returned,
            &request.items,
            &request.refunds,
        )?;

        let order_return: OrderReturn = sqlx::query_as::<_, OrderReturnRow>(
            r#"
            INSERT INTO order_returns (order_id, user_id, shift_id, total_refund, reason, reverse_stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, order_id, user_id, shift_id, total_refund, reason, reverse_stock, created_at
            "#,
        )
        .bind(order_id)
        .bind(request.user_id)
        .bind(request.shift_id)
        .bind(plan.total_refund)
        .bind(&request.reason)
        .bind(request.reverse_stock)
        .fetch_one(&mut *tx)
        .await?
        .into();

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let row = sqlx::query_as::<_, OrderReturnItemRow>(
                r#"
                INSERT INTO order_return_items (order_return_id, order_item_id, quantity, refund_amount)
                VALUES ($1, $2, $3, $4)
                RETURNING id, order_return_id, order_item_id, quantity, refund_amount
                "#,
            )
            .bind(order_return.id)
            .bind(line.order_item_id)
            .bind(line.quantity)
            .bind(line.refund_amount)
            .fetch_one(&mut *tx)
            .await?;
            items.push(OrderReturnItem::from(row));
        }

        let mut refunds = Vec::with_capacity(request.refunds.len());
        for entry in &request.refunds {
            let row = sqlx::query_as::<_, RefundRow>(
                r#"
                INSERT INTO refunds (order_return_id, amount, method)
                VALUES ($1, $2, $3)
                RETURNING id, order_return_id, amount, method
                "#,
            )
            .bind(order_return.id)
            .bind(entry.amount)
            .bind(entry.method.as_str())
            .fetch_one(&mut *tx)
            .await?;
            refunds.push(Refund::try_from(row)?);
        }

        let movements = if request.reverse_stock {
            let restock = restock_quantities(order_id, &order_items, &items)?;
            post_movements(
                &mut *tx,
                MovementOperation::In,
                MovementReason::ReturnSales,
                &restock,
                Some(&Reference::order_return(order_return.id)),
            )
            .await?
        } else {
            Vec::new()
        };

        let return_status = recompute_return_status(&mut *tx, order_id).await?;

        tx.commit().await?;

        tracing::info!(
            %order_id,
            order_return_id = %order_return.id,
            total_refund = %plan.total_refund,
            return_status = %return_status,
            "Processed order return"
        );

        self.notifier.publish(DomainEvent::ReturnProcessed {
            order_return_id: order_return.id,
            order_id,
            total_refund: plan.total_refund,
            total_quantity: plan.total_quantity,
            return_status,
            reverse_stock: request.reverse_stock,
        });

        Ok(ProcessedReturn {
            details: OrderReturnDetails {
                order_return,
                items,
                refunds,
            },
            return_status,
            movements,
        })
    }

    /// Quantity of an order item that can still be returned.
    ///
    /// Uses the same history and rule as `process_return` validation.
    pub async fn available_quantity_for_return(&self, order_id: Uuid, order_item_id: Uuid) -> AppResult<Decimal> {
        let mut conn = self.db.acquire().await?;

        let order_exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
            .bind(order_id)
            .fetch_one(&mut *conn)
            .await?;
        if !order_exists {
            return Err(AppError::NotFound(format!("Order {}", order_id)));
        }

        let order_items = load_order_items(&mut *conn, order_id).await?;
        let item = order_items
            .iter()
            .find(|item| item.id == order_item_id)
            .ok_or(ReturnValidationError::UnknownOrderItem {
                order_id,
                order_item_id,
            })?;
        let already_returned = load_returned_quantities(&mut *conn, order_id).await?;

        Ok(available_for_return(item, &already_returned))
    }

    /// All returns of an order with their items and refunds, oldest first
    pub async fn returns_for_order(&self, order_id: Uuid) -> AppResult<Vec<OrderReturnDetails>> {
        let returns = sqlx::query_as::<_, OrderReturnRow>(
            r#"
            SELECT id, order_id, user_id, shift_id, total_refund, reason, reverse_stock, created_at
            FROM order_returns
            WHERE order_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        let items = sqlx::query_as::<_, OrderReturnItemRow>(
            r#"
            SELECT ori.id, ori.order_return_id, ori.order_item_id, ori.quantity, ori.refund_amount
            FROM order_return_items ori
            JOIN order_returns r ON r.id = ori.order_return_id
            WHERE r.order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        let refunds = sqlx::query_as::<_, RefundRow>(
            r#"
            SELECT f.id, f.order_return_id, f.amount, f.method
            FROM refunds f
            JOIN order_returns r ON r.id = f.order_return_id
            WHERE r.order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        let mut items_by_return: HashMap<Uuid, Vec<OrderReturnItem>> = HashMap::new();
        for row in items {
            items_by_return
                .entry(row.order_return_id)
                .or_default()
                .push(row.into());
        }

        let mut refunds_by_return: HashMap<Uuid, Vec<Refund>> = HashMap::new();
        for row in refunds {
            refunds_by_return
                .entry(row.order_return_id)
                .or_default()
                .push(Refund::try_from(row)?);
        }

        Ok(returns
            .into_iter()
            .map(|row| {
                let id = row.id;
                OrderReturnDetails {
                    order_return: row.into(),
                    items: items_by_return.remove(&id).unwrap_or_default(),
                    refunds: refunds_by_return.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }
}

/// Products and returned quantities to put back on stock, one entry per
/// returned line
fn restock_quantities(
    order_id: Uuid,
    order_items: &[OrderItem],
    returned: &[OrderReturnItem],
) -> Result<Vec<ProductQuantity>, ReturnValidationError> {
    returned
        .iter()
        .map(|line| {
            order_items
                .iter()
                .find(|item| item.id == line.order_item_id)
                .map(|item| ProductQuantity::new(item.product_id, line.quantity))
                .ok_or(ReturnValidationError::UnknownOrderItem {
                    order_id,
                    order_item_id: line.order_item_id,
                })
        })
        .collect()
}

/// Recompute the order's return status from every return ever recorded for it
async fn recompute_return_status(conn: &mut PgConnection, order_id: Uuid) -> AppResult<ReturnStatus> {
    let (total_ordered, total_returned) = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT
            COALESCE((SELECT SUM(quantity) FROM order_items WHERE order_id = $1), 0),
            COALESCE((
                SELECT SUM(ori.quantity)
                FROM order_return_items ori
                JOIN order_returns r ON r.id = ori.order_return_id
                WHERE r.order_id = $1
            ), 0)
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;

    let status = ReturnStatus::from_quantities(total_ordered, total_returned);

    sqlx::query("UPDATE orders SET return_status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status.as_str())
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

    Ok(status)
}
