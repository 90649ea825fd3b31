//! Application-wide error types and their HTTP mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("NGO project {0} is not mapped to a ledger submission")]
    LedgerMappingMissing(i64),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidState(_)
            | Self::Duplicate(_)
            | Self::LedgerMappingMissing(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Ledger(LedgerError::Timeout { .. } | LedgerError::Indeterminate { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            Self::Ledger(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to API callers. Server-side failures are logged
    /// in full and replaced by a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Ledger(e) => e.public_message(),
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Config(_)
            | Self::Internal(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Unreadable or incomplete JSON bodies are the caller's fault.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        }
        (
            status,
            Json(json!({
                "success": false,
                "message": self.public_message(),
            })),
        )
            .into_response()
    }
}
