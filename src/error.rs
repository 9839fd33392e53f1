use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by a ledger provider adapter.
///
/// Everything except `InvalidInput` is transient from the pipeline's point of
/// view: the processor retries it with backoff, the reconciler and the stream
/// listener retry it on their next tick.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid provider input: {0}")]
    InvalidInput(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Provider request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transaction rejected by the ledger: {0}")]
    Rejected(String),

    #[error("Unexpected provider response: {0}")]
    Decode(String),

    #[error("{0} payment adapter is not implemented yet")]
    NotImplemented(&'static str),

    #[error("Transaction not confirmed yet")]
    NotConfirmed,
}

impl ProviderError {
    /// The ledger has no record of the transaction (yet). Horizon lags
    /// submission by a few ledgers, so this is not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::NotFound(_) | ProviderError::Http { status: 404, .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ProviderError::InvalidInput(_))
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                message,
                None,
            ),
            AppError::Provider(ProviderError::InvalidInput(message)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                message,
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Conflict(message) => (StatusCode::CONFLICT, "CONFLICT", message, None),
            AppError::Provider(ProviderError::NotImplemented(provider)) => (
                StatusCode::NOT_IMPLEMENTED,
                "PROVIDER_NOT_IMPLEMENTED",
                format!("{} payment adapter is not implemented yet", provider),
                Some(serde_json::json!({ "provider": provider })),
            ),
            AppError::Provider(ProviderError::Unavailable(message)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_UNAVAILABLE",
                message,
                None,
            ),
            AppError::Provider(ProviderError::Http { status, message }) => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_REQUEST_FAILED",
                message,
                Some(serde_json::json!({ "upstream_status": status })),
            ),
            AppError::Provider(error) => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                error.to_string(),
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Validation(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ProviderError::Decode(error.to_string())
        } else {
            ProviderError::Unavailable(format!("HTTP request error: {}", error))
        }
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for provider adapters
pub type ProviderResult<T> = Result<T, ProviderError>;
