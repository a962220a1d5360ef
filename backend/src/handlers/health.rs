//! Health check handlers
//!
//! Reports `degraded` with a 503 while the database cannot be reached.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub webhook: bool,
}

impl HealthResponse {
    /// Build the report from the database round-trip result
    pub fn from_checks(database_reachable: bool, webhook: bool) -> Self {
        let (status, database) = if database_reachable {
            ("healthy", "connected")
        } else {
            ("degraded", "disconnected")
        };

        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            webhook,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if self.status == "healthy" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_reachable = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("Health check could not reach the database: {}", e);
            false
        }
    };

    let health = HealthResponse::from_checks(
        database_reachable,
        state.config.notifications.webhook_url.is_some(),
    );
    (health.status_code(), Json(health))
}
