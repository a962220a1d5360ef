//! WebAssembly module for the POS return-entry screen
//!
//! Provides client-side previews using the same rules as the server:
//! - Quantity still returnable per order item
//! - Return and refund distribution validation
//! - Return status and payment status previews
//!
//! Decimals cross the boundary as strings and structured values as JSON.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// One prior return line as loaded by the UI
#[derive(Debug, Deserialize)]
struct ReturnedLine {
    order_item_id: Uuid,
    quantity: Decimal,
}

/// Lines and refunds being entered
#[derive(Debug, Deserialize)]
struct ReturnDraft {
    items: Vec<ReturnItemRequest>,
    #[serde(default)]
    refunds: Vec<RefundEntry>,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|e| format!("Invalid {}: {}", field, e))
}

fn parse_json<'a, T: Deserialize<'a>>(what: &str, value: &'a str) -> Result<T, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid {} JSON: {}", what, e))
}

fn history(history_json: &str) -> Result<std::collections::HashMap<Uuid, Decimal>, String> {
    let lines: Vec<ReturnedLine> = parse_json("return history", history_json)?;
    Ok(returned_quantities(
        lines.into_iter().map(|l| (l.order_item_id, l.quantity)),
    ))
}

fn available_quantity(item_json: &str, history_json: &str) -> Result<Decimal, String> {
    let item: OrderItem = parse_json("order item", item_json)?;
    Ok(available_for_return(&item, &history(history_json)?))
}

fn check_return(
    order_id: &str,
    items_json: &str,
    history_json: &str,
    draft_json: &str,
) -> Result<serde_json::Value, String> {
    let order_id = Uuid::from_str(order_id).map_err(|e| format!("Invalid order id: {}", e))?;
    let order_items: Vec<OrderItem> = parse_json("order items", items_json)?;
    let draft: ReturnDraft = parse_json("return", draft_json)?;

    let plan = validate_return_request(
        order_id,
        &order_items,
        &history(history_json)?,
        &draft.items,
        &draft.refunds,
    )
    .map_err(|e| e.to_string())?;

    Ok(json!({
        "total_refund": plan.total_refund,
        "total_quantity": plan.total_quantity,
    }))
}

fn refund_distribution(total_refund: &str, refunds_json: &str) -> Result<(), String> {
    let total = parse_decimal("total refund", total_refund)?;
    let refunds: Vec<RefundEntry> = parse_json("refunds", refunds_json)?;
    validate_refund_distribution(total, &refunds).map_err(|e| e.to_string())
}

fn return_status(total_ordered: &str, total_returned: &str) -> Result<ReturnStatus, String> {
    Ok(ReturnStatus::from_quantities(
        parse_decimal("ordered quantity", total_ordered)?,
        parse_decimal("returned quantity", total_returned)?,
    ))
}

fn payment_status(paid: &str, total: &str) -> Result<PaymentStatus, String> {
    Ok(PaymentStatus::from_totals(
        parse_decimal("paid amount", paid)?,
        parse_decimal("order total", total)?,
    ))
}

/// Quantity of an order item that can still be returned
#[wasm_bindgen]
pub fn available_for_return_quantity(item_json: &str, history_json: &str) -> Result<String, JsValue> {
    available_quantity(item_json, history_json)
        .map(|q| q.to_string())
        .map_err(|e| JsValue::from_str(&e))
}

/// Validate a draft return; returns `{total_refund, total_quantity}` as JSON
#[wasm_bindgen]
pub fn validate_return_draft(
    order_id: &str,
    items_json: &str,
    history_json: &str,
    draft_json: &str,
) -> Result<String, JsValue> {
    check_return(order_id, items_json, history_json, draft_json)
        .map(|plan| plan.to_string())
        .map_err(|e| JsValue::from_str(&e))
}

/// Check that a refund distribution pays out exactly the total refund
#[wasm_bindgen]
pub fn check_refund_distribution(total_refund: &str, refunds_json: &str) -> Result<(), JsValue> {
    refund_distribution(total_refund, refunds_json).map_err(|e| JsValue::from_str(&e))
}

/// Return status an order would have after the given returned quantity
#[wasm_bindgen]
pub fn preview_return_status(total_ordered: &str, total_returned: &str) -> Result<String, JsValue> {
    return_status(total_ordered, total_returned)
        .map(|s| s.as_str().to_string())
        .map_err(|e| JsValue::from_str(&e))
}

/// Payment status an order would have after the given paid amount
#[wasm_bindgen]
pub fn preview_payment_status(paid: &str, total: &str) -> Result<String, JsValue> {
    payment_status(paid, total)
        .map(|s| s.as_str().to_string())
        .map_err(|e| JsValue::from_str(&e))
}
