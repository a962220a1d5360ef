//! Route definitions for the POS inventory core

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/inventory", inventory_routes())
        .nest("/orders", order_routes())
}

/// Ledger and daily summary routes
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/movements", post(handlers::post_movement))
        .route("/movements/batch", post(handlers::post_movement_batch))
        .route("/products/:product_id/balance", get(handlers::get_balance))
        .route("/products/:product_id/movements", get(handlers::list_movements))
        .route("/low-stock", get(handlers::list_low_stock))
        .route("/days/:date/open", post(handlers::open_day))
        .route("/days/:date/aggregate", post(handlers::aggregate_day))
        .route("/days/:date/summaries", get(handlers::list_summaries))
}

/// Return, payment and completion routes
fn order_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:order_id/returns",
            get(handlers::list_returns).post(handlers::process_return),
        )
        .route(
            "/:order_id/items/:order_item_id/available",
            get(handlers::get_available_quantity),
        )
        .route("/:order_id/payments", post(handlers::apply_payments))
        .route("/:order_id/complete", post(handlers::complete_order))
}
