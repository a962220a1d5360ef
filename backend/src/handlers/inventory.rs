//! HTTP handlers for ledger and daily summary endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use shared::{InventoryBalance, LowStockProduct, Movement};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::daily_summary::{AggregateInput, AggregateOutcome, SummaryView};
use crate::services::ledger::{BatchMovementInput, MovementQuery, NewMovement, PostedMovement};
use crate::services::{retry_on_conflict, DailySummaryService, LedgerService};
use crate::AppState;

#[derive(Serialize)]
pub struct OpenDayResponse {
    pub date: NaiveDate,
    pub created: u64,
}

/// Post a single movement
pub async fn post_movement(
    State(state): State<AppState>,
    Json(input): Json<NewMovement>,
) -> AppResult<(StatusCode, Json<PostedMovement>)> {
    let service = LedgerService::new(state.db);
    let (service, input) = (&service, &input);
    let posted = retry_on_conflict(state.config.inventory.conflict_retries, "post_movement", move || {
        service.post(input.clone())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(posted)))
}

/// Post one movement per product with a single reason
pub async fn post_movement_batch(
    State(state): State<AppState>,
    Json(input): Json<BatchMovementInput>,
) -> AppResult<(StatusCode, Json<Vec<PostedMovement>>)> {
    let service = LedgerService::new(state.db);
    let (service, input) = (&service, &input);
    let posted = retry_on_conflict(state.config.inventory.conflict_retries, "post_movement_batch", move || {
        service.post_batch(input.clone())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(posted)))
}

/// Get the current balance of a product
pub async fn get_balance(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<InventoryBalance>> {
    let service = LedgerService::new(state.db);
    let balance = service.balance(product_id).await?;
    Ok(Json(balance))
}

/// Get the movement history of a product
pub async fn list_movements(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<MovementQuery>,
) -> AppResult<Json<Vec<Movement>>> {
    let service = LedgerService::new(state.db);
    let movements = service.movements(product_id, query).await?;
    Ok(Json(movements))
}

/// List products below their minimum stock
pub async fn list_low_stock(State(state): State<AppState>) -> AppResult<Json<Vec<LowStockProduct>>> {
    let service = LedgerService::new(state.db);
    let products = service.low_stock().await?;
    Ok(Json(products))
}

/// Capture start-of-day balances
pub async fn open_day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> AppResult<Json<OpenDayResponse>> {
    let service = DailySummaryService::new(state.db);
    let created = service.open_day(date).await?;
    Ok(Json(OpenDayResponse { date, created }))
}

/// Recompute a day's summary columns from the ledger
pub async fn aggregate_day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
    input: Option<Json<AggregateInput>>,
) -> AppResult<Json<Vec<AggregateOutcome>>> {
    let service = DailySummaryService::new(state.db);
    let outcomes = match input.and_then(|Json(input)| input.product_ids) {
        Some(product_ids) => service.aggregate(&product_ids, date).await?,
        None => service.aggregate_moved(date).await?,
    };
    Ok(Json(outcomes))
}

/// List a day's summaries
pub async fn list_summaries(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> AppResult<Json<Vec<SummaryView>>> {
    let service = DailySummaryService::new(state.db);
    let summaries = service.summaries(date).await?;
    Ok(Json(summaries))
}
