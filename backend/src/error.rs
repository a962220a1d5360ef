//! Error handling for the POS inventory core
//!
//! Validation failures carry the offending values so the calling layer can
//! build a precise message; database failures are split into retryable
//! concurrency conflicts and fatal persistence errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use shared::{
    MovementError, PaymentValidationError, ReturnValidationError, UnknownVariant, UnmappedMovement,
};
use thiserror::Error;

/// SQLSTATE codes that mean "another transaction got there first"
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error(transparent)]
    ReturnValidation(#[from] ReturnValidationError),

    #[error(transparent)]
    Movement(#[from] MovementError),

    #[error(transparent)]
    PaymentValidation(#[from] PaymentValidationError),

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error(transparent)]
    UnmappedMovement(#[from] UnmappedMovement),

    #[error("Stored record is unreadable: {0}")]
    CorruptRecord(#[from] UnknownVariant),

    // Database errors
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    // Internal errors
    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code();
            if matches!(
                code.as_deref(),
                Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE)
            ) {
                return AppError::ConcurrencyConflict(db_err.message().to_string());
            }
        }
        AppError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        match errors.field_errors().into_iter().next() {
            Some((field, field_errors)) => AppError::Validation {
                field: field.to_string(),
                message: field_errors
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field)),
            },
            None => AppError::ValidationError(errors.to_string()),
        }
    }
}

impl AppError {
    /// Whether re-running the whole operation from scratch may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }

    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ReturnValidation(e) => match e {
                ReturnValidationError::UnknownOrderItem { .. } => "UNKNOWN_ORDER_ITEM",
                ReturnValidationError::NonPositiveQuantity { .. } => "NON_POSITIVE_QUANTITY",
                ReturnValidationError::NegativeRefund { .. } => "NEGATIVE_REFUND",
                ReturnValidationError::OverReturn { .. } => "OVER_RETURN",
                ReturnValidationError::RefundMismatch { .. } => "REFUND_MISMATCH",
                ReturnValidationError::NonPositiveRefundEntry { .. } => "NON_POSITIVE_REFUND_ENTRY",
            },
            AppError::Movement(MovementError::InvalidQuantity { .. }) => "INVALID_QUANTITY",
            AppError::Movement(MovementError::Unmapped(_)) | AppError::UnmappedMovement(_) => {
                "UNMAPPED_MOVEMENT"
            }
            AppError::PaymentValidation(_) => "NEGATIVE_PAYMENT",
            AppError::Validation { .. } | AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::CorruptRecord(_) => "CORRUPT_RECORD",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ReturnValidation(_)
            | AppError::Movement(_)
            | AppError::PaymentValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Validation { .. } | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition(_) | AppError::ConcurrencyConflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::UnmappedMovement(_)
            | AppError::CorruptRecord(_)
            | AppError::DatabaseError(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Offending values for validation failures
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ReturnValidation(e) => Some(match e {
                ReturnValidationError::UnknownOrderItem {
                    order_id,
                    order_item_id,
                } => json!({ "order_id": order_id, "order_item_id": order_item_id }),
                ReturnValidationError::NonPositiveQuantity {
                    order_item_id,
                    quantity,
                } => json!({ "order_item_id": order_item_id, "quantity": quantity }),
                ReturnValidationError::NegativeRefund {
                    order_item_id,
                    refund_amount,
                } => json!({ "order_item_id": order_item_id, "refund_amount": refund_amount }),
                ReturnValidationError::OverReturn {
                    order_item_id,
                    available,
                    requested,
                } => json!({
                    "order_item_id": order_item_id,
                    "available": available,
                    "requested": requested,
                }),
                ReturnValidationError::RefundMismatch {
                    expected,
                    distributed,
                } => json!({ "expected": expected, "distributed": distributed }),
                ReturnValidationError::NonPositiveRefundEntry {
                    index,
                    method,
                    amount,
                } => json!({ "index": index, "method": method, "amount": amount }),
            }),
            AppError::Movement(MovementError::InvalidQuantity {
                product_id,
                quantity,
            }) => Some(json!({ "product_id": product_id, "quantity": quantity })),
            AppError::Movement(MovementError::Unmapped(e)) | AppError::UnmappedMovement(e) => {
                Some(json!({
                    "reason": e.reason,
                    "operation": e.operation,
                    "mapping_version": e.version,
                }))
            }
            AppError::PaymentValidation(PaymentValidationError::NegativeAmount { method, amount }) => {
                Some(json!({ "method": method, "amount": amount }))
            }
            _ => None,
        }
    }

    /// Message safe to show to API callers
    fn public_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AppError> for ErrorDetail {
    fn from(err: &AppError) -> Self {
        let field = match err {
            AppError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        ErrorDetail {
            code: err.code().to_string(),
            message: err.public_message(),
            field,
            details: err.details(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_detail = ErrorDetail::from(&self);

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!(code = error_detail.code.as_str(), "Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
