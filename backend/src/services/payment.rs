//! Order payment and completion service
//!
//! Payment status is never incremented: after new payments are stored the
//! order's `paid` column and `payment_status` are recomputed from the sum of
//! every payment recorded for it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{
    nonzero_payments, MovementOperation, MovementReason, Order, OrderItem, OrderStatus,
    OrderTotals, OrderType, PaymentStatus, ProductQuantity, Reference, TenderedPayment,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::ledger::post_movements;
use crate::services::notification::{DomainEvent, EventPublisher};
use crate::services::order_return::load_order_items;

/// Service applying payments to orders and completing them
#[derive(Clone)]
pub struct OrderPaymentService {
    db: PgPool,
    notifier: Arc<dyn EventPublisher>,
}

/// Input for applying payments
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyPaymentsInput {
    #[serde(default)]
    pub shift_id: Option<Uuid>,
    pub payments: Vec<TenderedPayment>,
}

/// Input for completing an order
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteOrderInput {
    #[serde(default)]
    pub shift_id: Option<Uuid>,
    /// Replaces the order's stored discount when present
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub payments: Vec<TenderedPayment>,
}

/// Row for order queries
#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    order_type: String,
    status: String,
    payment_status: String,
    return_status: String,
    table_id: Option<Uuid>,
    shift_id: Option<Uuid>,
    sub_total: Decimal,
    discount: Decimal,
    total: Decimal,
    paid: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            order_type: row.order_type.parse()?,
            status: row.status.parse()?,
            payment_status: row.payment_status.parse()?,
            return_status: row.return_status.parse()?,
            table_id: row.table_id,
            shift_id: row.shift_id,
            sub_total: row.sub_total,
            discount: row.discount,
            total: row.total,
            paid: row.paid,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, order_type, status, payment_status, return_status, table_id, shift_id, \
     sub_total, discount, total, paid, created_at, updated_at";

/// Load and lock an order for the rest of the transaction
async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Order> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
    sqlx::query_as::<_, OrderRow>(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {}", order_id)))?
        .try_into()
}

/// Store nonzero tenders and recompute the order's paid amount and status
async fn record_payments(
    conn: &mut PgConnection,
    order: &Order,
    tendered: &[TenderedPayment],
    shift_id: Option<Uuid>,
) -> AppResult<Order> {
    let payments = nonzero_payments(tendered)?;

    for payment in &payments {
        sqlx::query(
            r#"
            INSERT INTO payments (order_id, shift_id, method, amount)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.id)
        .bind(shift_id)
        .bind(payment.method.as_str())
        .bind(payment.amount)
        .execute(&mut *conn)
        .await?;
    }

    let paid = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE order_id = $1",
    )
    .bind(order.id)
    .fetch_one(&mut *conn)
    .await?;

    let payment_status = PaymentStatus::from_totals(paid, order.total);

    let sql = format!(
        "UPDATE orders SET paid = $1, payment_status = $2, updated_at = NOW() WHERE id = $3 RETURNING {}",
        ORDER_COLUMNS
    );
    sqlx::query_as::<_, OrderRow>(&sql)
        .bind(paid)
        .bind(payment_status.as_str())
        .bind(order.id)
        .fetch_one(&mut *conn)
        .await?
        .try_into()
}

/// Quantities sold per product, same-product lines summed and zero lines dropped
pub fn sold_quantities(items: &[OrderItem]) -> Vec<ProductQuantity> {
    let mut totals: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for item in items {
        *totals.entry(item.product_id).or_insert(Decimal::ZERO) += item.quantity;
    }
    totals
        .into_iter()
        .filter(|(_, quantity)| *quantity > Decimal::ZERO)
        .map(|(product_id, quantity)| ProductQuantity::new(product_id, quantity))
        .collect()
}

impl OrderPaymentService {
    /// Create a new OrderPaymentService instance
    pub fn new(db: PgPool, notifier: Arc<dyn EventPublisher>) -> Self {
        Self { db, notifier }
    }

    /// Record tendered payments and recompute the payment status
    #[tracing::instrument(skip(self, input), fields(tenders = input.payments.len()))]
    pub async fn apply_payments(&self, order_id: Uuid, input: &ApplyPaymentsInput) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;

        let order = lock_order(&mut *tx, order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(AppError::InvalidStateTransition(format!(
                "Order {} is cancelled and cannot take payments",
                order_id
            )));
        }

        let order = record_payments(&mut *tx, &order, &input.payments, input.shift_id).await?;

        tx.commit().await?;

        tracing::info!(
            %order_id,
            paid = %order.paid,
            total = %order.total,
            payment_status = %order.payment_status,
            "Applied payments"
        );

        self.notifier.publish(DomainEvent::PaymentsApplied {
            order_id,
            paid: order.paid,
            total: order.total,
            payment_status: order.payment_status,
        });

        Ok(order)
    }

    /// Finalize totals, take payments, deduct stock, free the table and mark
    /// the order completed, all in one transaction
    #[tracing::instrument(skip(self, input), fields(tenders = input.payments.len()))]
    pub async fn complete_order(&self, order_id: Uuid, input: &CompleteOrderInput) -> AppResult<Order> {
        if let Some(discount) = input.discount {
            if discount < Decimal::ZERO {
                return Err(AppError::Validation {
                    field: "discount".to_string(),
                    message: "Discount cannot be negative".to_string(),
                });
            }
        }

        let mut tx = self.db.begin().await?;

        let order = lock_order(&mut *tx, order_id).await?;
        if order.status != OrderStatus::Processing {
            return Err(AppError::InvalidStateTransition(format!(
                "Order {} is {} and cannot be completed",
                order_id, order.status
            )));
        }

        let items = load_order_items(&mut *tx, order_id).await?;
        let totals = OrderTotals::from_items(&items, input.discount.unwrap_or(order.discount));

        let sql = format!(
            "UPDATE orders SET sub_total = $1, discount = $2, total = $3, updated_at = NOW() WHERE id = $4 RETURNING {}",
            ORDER_COLUMNS
        );
        let order: Order = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(totals.sub_total)
            .bind(totals.discount)
            .bind(totals.total)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?
            .try_into()?;

        let order = record_payments(&mut *tx, &order, &input.payments, input.shift_id).await?;

        let sold = sold_quantities(&items);
        post_movements(
            &mut *tx,
            MovementOperation::Out,
            MovementReason::Order,
            &sold,
            Some(&Reference::order(order_id)),
        )
        .await?;

        if order.order_type == OrderType::DineIn {
            if let Some(table_id) = order.table_id {
                sqlx::query("UPDATE dining_tables SET status = 'available', updated_at = NOW() WHERE id = $1")
                    .bind(table_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let sql = format!(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            ORDER_COLUMNS
        );
        let order: Order = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(OrderStatus::Completed.as_str())
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?
            .try_into()?;

        tx.commit().await?;

        tracing::info!(
            %order_id,
            total = %order.total,
            paid = %order.paid,
            products = sold.len(),
            "Completed order"
        );

        self.notifier.publish(DomainEvent::OrderCompleted {
            order_id,
            total: order.total,
            paid: order.paid,
            payment_status: order.payment_status,
            table_id: order.table_id,
        });

        Ok(order)
    }
}
