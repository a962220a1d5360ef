//! HTTP handlers for order returns, payments and completion

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use shared::{Order, OrderReturnDetails, ReturnRequest};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::order_return::ProcessedReturn;
use crate::services::payment::{ApplyPaymentsInput, CompleteOrderInput};
use crate::services::{retry_on_conflict, OrderPaymentService, OrderReturnService};
use crate::AppState;

#[derive(Serialize)]
pub struct AvailableQuantityResponse {
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub available: Decimal,
}

/// Process a customer return
pub async fn process_return(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ReturnRequest>,
) -> AppResult<(StatusCode, Json<ProcessedReturn>)> {
    let service = OrderReturnService::new(state.db, state.notifier);
    let (service, request) = (&service, &request);
    let processed = retry_on_conflict(state.config.inventory.conflict_retries, "process_return", move || {
        service.process_return(order_id, request)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(processed)))
}

/// List the returns of an order
pub async fn list_returns(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Vec<OrderReturnDetails>>> {
    let service = OrderReturnService::new(state.db, state.notifier);
    let returns = service.returns_for_order(order_id).await?;
    Ok(Json(returns))
}

/// Quantity of an order item that can still be returned
pub async fn get_available_quantity(
    State(state): State<AppState>,
    Path((order_id, order_item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<AvailableQuantityResponse>> {
    let service = OrderReturnService::new(state.db, state.notifier);
    let available = service
        .available_quantity_for_return(order_id, order_item_id)
        .await?;
    Ok(Json(AvailableQuantityResponse {
        order_id,
        order_item_id,
        available,
    }))
}

/// Apply tendered payments to an order
pub async fn apply_payments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(input): Json<ApplyPaymentsInput>,
) -> AppResult<Json<Order>> {
    let service = OrderPaymentService::new(state.db, state.notifier);
    let (service, input) = (&service, &input);
    let order = retry_on_conflict(state.config.inventory.conflict_retries, "apply_payments", move || {
        service.apply_payments(order_id, input)
    })
    .await?;
    Ok(Json(order))
}

/// Complete an order
pub async fn complete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(input): Json<CompleteOrderInput>,
) -> AppResult<Json<Order>> {
    let service = OrderPaymentService::new(state.db, state.notifier);
    let (service, input) = (&service, &input);
    let order = retry_on_conflict(state.config.inventory.conflict_retries, "complete_order", move || {
        service.complete_order(order_id, input)
    })
    .await?;
    Ok(Json(order))
}
