//! Error types for expense-service.

use axum::response::{IntoResponse, Response};
use service_core::error::AppError;
use thiserror::Error;
use validator::ValidationErrors;

/// Typed failure conditions surfaced by the matching and approval cores.
/// Each maps onto one `service_core::error::AppError` for HTTP responses.
#[derive(Debug, Error)]
pub enum ExpenseError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Validation failed: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Decision against a request or entry that is no longer pending.
    /// A concurrency conflict: callers refresh and retry, never ignore.
    #[error("Stale request: {0}")]
    StaleRequest(String),

    #[error("No approval policy matches this expense")]
    NoMatchingPolicy,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl From<sqlx::Error> for ExpenseError {
    fn from(err: sqlx::Error) -> Self {
        ExpenseError::Database(anyhow::Error::new(err))
    }
}

impl From<ExpenseError> for AppError {
    fn from(err: ExpenseError) -> Self {
        match err {
            ExpenseError::Validation(e) => AppError::ValidationError(e),
            ExpenseError::Invalid(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ExpenseError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ExpenseError::Unauthorized(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            ExpenseError::StaleRequest(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ExpenseError::NoMatchingPolicy => {
                AppError::BadRequest(anyhow::anyhow!("no approval policy matches this expense"))
            }
            ExpenseError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

impl IntoResponse for ExpenseError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}
