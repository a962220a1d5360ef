//! Validation rules for the inventory accounting core
//!
//! Every rule here is a pure function over already-loaded history, so the
//! server and the return-entry UI compute exactly the same answers.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    MovementOperation, MovementReason, OrderItem, PaymentMethod, RefundEntry, ReturnItemRequest,
    TenderedPayment,
};
use crate::rollup::{SummaryColumn, UnmappedMovement};
use crate::types::money_matches;

// ============================================================================
// Errors
// ============================================================================

/// Reasons a return request is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReturnValidationError {
    #[error("order item {order_item_id} does not belong to order {order_id}")]
    UnknownOrderItem { order_id: Uuid, order_item_id: Uuid },

    #[error("return quantity for order item {order_item_id} must be greater than zero, got {quantity}")]
    NonPositiveQuantity { order_item_id: Uuid, quantity: Decimal },

    #[error("refund amount for order item {order_item_id} cannot be negative, got {refund_amount}")]
    NegativeRefund { order_item_id: Uuid, refund_amount: Decimal },

    #[error("cannot return {requested} of order item {order_item_id}: only {available} available")]
    OverReturn {
        order_item_id: Uuid,
        available: Decimal,
        requested: Decimal,
    },

    #[error("refund distribution totals {distributed} but returned items refund {expected}")]
    RefundMismatch { expected: Decimal, distributed: Decimal },

    #[error("refund entry {index} ({method}) must be greater than zero, got {amount}")]
    NonPositiveRefundEntry {
        index: usize,
        method: PaymentMethod,
        amount: Decimal,
    },
}

/// Reasons a ledger movement is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MovementError {
    #[error("movement quantity for product {product_id} must be greater than zero, got {quantity}")]
    InvalidQuantity { product_id: Uuid, quantity: Decimal },

    #[error(transparent)]
    Unmapped(#[from] UnmappedMovement),
}

/// Reasons a set of tendered payments is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentValidationError {
    #[error("payment amount for {method} cannot be negative, got {amount}")]
    NegativeAmount { method: PaymentMethod, amount: Decimal },
}

// ============================================================================
// Ledger Validations
// ============================================================================

/// Validate a movement before it is written to the ledger.
///
/// The quantity must be strictly positive and the (reason, operation) pair
/// must be classifiable by the daily rollup.
pub fn validate_movement(
    product_id: Uuid,
    operation: MovementOperation,
    reason: MovementReason,
    quantity: Decimal,
) -> Result<SummaryColumn, MovementError> {
    if quantity <= Decimal::ZERO {
        return Err(MovementError::InvalidQuantity {
            product_id,
            quantity,
        });
    }
    Ok(SummaryColumn::for_movement(reason, operation)?)
}

// ============================================================================
// Return Validations
// ============================================================================

/// Outcome of a successful return validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnPlan {
    /// Sum of the requested refund amounts
    pub total_refund: Decimal,
    /// Sum of the requested quantities
    pub total_quantity: Decimal,
}

/// Sum returned quantities per order item from `(order_item_id, quantity)` rows
pub fn returned_quantities<I>(rows: I) -> HashMap<Uuid, Decimal>
where
    I: IntoIterator<Item = (Uuid, Decimal)>,
{
    let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
    for (order_item_id, quantity) in rows {
        *totals.entry(order_item_id).or_insert(Decimal::ZERO) += quantity;
    }
    totals
}

/// Quantity of an order item that can still be returned
pub fn available_for_return(item: &OrderItem, already_returned: &HashMap<Uuid, Decimal>) -> Decimal {
    let returned = already_returned
        .get(&item.id)
        .copied()
        .unwrap_or(Decimal::ZERO);
    item.quantity - returned
}

/// Validate requested return lines against the order and its prior returns.
///
/// Lines naming the same order item are checked cumulatively, so splitting a
/// request into several lines cannot return more than is available.
pub fn validate_return_items(
    order_id: Uuid,
    order_items: &[OrderItem],
    already_returned: &HashMap<Uuid, Decimal>,
    requested: &[ReturnItemRequest],
) -> Result<ReturnPlan, ReturnValidationError> {
    let mut requested_so_far: HashMap<Uuid, Decimal> = HashMap::new();
    let mut total_refund = Decimal::ZERO;
    let mut total_quantity = Decimal::ZERO;

    for line in requested {
        let item = order_items
            .iter()
            .find(|item| item.id == line.order_item_id)
            .ok_or(ReturnValidationError::UnknownOrderItem {
                order_id,
                order_item_id: line.order_item_id,
            })?;

        if line.quantity <= Decimal::ZERO {
            return Err(ReturnValidationError::NonPositiveQuantity {
                order_item_id: item.id,
                quantity: line.quantity,
            });
        }

        if line.refund_amount < Decimal::ZERO {
            return Err(ReturnValidationError::NegativeRefund {
                order_item_id: item.id,
                refund_amount: line.refund_amount,
            });
        }

        let earlier_in_request = requested_so_far.entry(item.id).or_insert(Decimal::ZERO);
        let available = available_for_return(item, already_returned) - *earlier_in_request;
        if line.quantity > available {
            return Err(ReturnValidationError::OverReturn {
                order_item_id: item.id,
                available,
                requested: line.quantity,
            });
        }
        *earlier_in_request += line.quantity;

        total_refund += line.refund_amount;
        total_quantity += line.quantity;
    }

    Ok(ReturnPlan {
        total_refund,
        total_quantity,
    })
}

/// Validate that the refund distribution pays out exactly the items' refund
pub fn validate_refund_distribution(
    total_refund: Decimal,
    refunds: &[RefundEntry],
) -> Result<(), ReturnValidationError> {
    let distributed: Decimal = refunds.iter().map(|entry| entry.amount).sum();
    if !money_matches(distributed, total_refund) {
        return Err(ReturnValidationError::RefundMismatch {
            expected: total_refund,
            distributed,
        });
    }

    if let Some((index, entry)) = refunds
        .iter()
        .enumerate()
        .find(|(_, entry)| entry.amount <= Decimal::ZERO)
    {
        return Err(ReturnValidationError::NonPositiveRefundEntry {
            index,
            method: entry.method,
            amount: entry.amount,
        });
    }

    Ok(())
}

/// Run every return check in order and produce the plan to persist
pub fn validate_return_request(
    order_id: Uuid,
    order_items: &[OrderItem],
    already_returned: &HashMap<Uuid, Decimal>,
    items: &[ReturnItemRequest],
    refunds: &[RefundEntry],
) -> Result<ReturnPlan, ReturnValidationError> {
    let plan = validate_return_items(order_id, order_items, already_returned, items)?;
    validate_refund_distribution(plan.total_refund, refunds)?;
    Ok(plan)
}

// ============================================================================
// Payment Validations
// ============================================================================

/// Drop zero-amount tenders and reject negative ones
pub fn nonzero_payments(
    tendered: &[TenderedPayment],
) -> Result<Vec<TenderedPayment>, PaymentValidationError> {
    if let Some(bad) = tendered.iter().find(|p| p.amount < Decimal::ZERO) {
        return Err(PaymentValidationError::NegativeAmount {
            method: bad.method,
            amount: bad.amount,
        });
    }
    Ok(tendered
        .iter()
        .copied()
        .filter(|p| p.amount > Decimal::ZERO)
        .collect())
}
