//! Order return, return item and refund models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::PaymentMethod;

/// A single return transaction against an order; never edited after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReturn {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub shift_id: Option<Uuid>,
    pub total_refund: Decimal,
    pub reason: String,
    pub reverse_stock: bool,
    pub created_at: DateTime<Utc>,
}

/// Quantity of one order item brought back in a return
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReturnItem {
    pub id: Uuid,
    pub order_return_id: Uuid,
    pub order_item_id: Uuid,
    pub quantity: Decimal,
    pub refund_amount: Decimal,
}

/// Money handed back with one payment method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub order_return_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

/// A return with everything it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReturnDetails {
    #[serde(flatten)]
    pub order_return: OrderReturn,
    pub items: Vec<OrderReturnItem>,
    pub refunds: Vec<Refund>,
}

/// Requested quantity and refund for one order item
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReturnItemRequest {
    pub order_item_id: Uuid,
    pub quantity: Decimal,
    pub refund_amount: Decimal,
}

/// One line of the refund distribution
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefundEntry {
    pub method: PaymentMethod,
    pub amount: Decimal,
}

/// Everything needed to process a return
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReturnRequest {
    pub user_id: Uuid,
    pub shift_id: Option<Uuid>,
    #[validate(length(min = 1, max = 500, message = "reason must be 1-500 characters"))]
    pub reason: String,
    #[validate(length(min = 1, message = "at least one item must be returned"))]
    pub items: Vec<ReturnItemRequest>,
    #[serde(default)]
    pub refunds: Vec<RefundEntry>,
    #[serde(default)]
    pub reverse_stock: bool,
}
