use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("admin account is inactive")]
    AuthorizationDenied,

    #[error("insufficient traffic to {action} (balance {balance} bytes)")]
    QuotaExceeded { action: &'static str, balance: i64 },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthorizationDenied | AppError::QuotaExceeded { .. } => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message returned to the caller.
    pub fn message(&self) -> String {
        match self {
            AppError::AuthorizationDenied => {
                "Your admin account is inactive. Contact support.".to_string()
            }
            AppError::QuotaExceeded { action, balance } => format!(
                "Insufficient traffic to {} this user, your limit: {:.1} GB",
                action,
                *balance as f64 / GIB
            ),
            AppError::Conflict(msg)
            | AppError::NotFound(msg)
            | AppError::Upstream(msg)
            | AppError::InvalidInput(msg) => msg.clone(),
            AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::AuthorizationDenied => "admin_inactive",
            AppError::QuotaExceeded { .. } => "insufficient_traffic",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::Upstream(_) => "upstream_failed",
            AppError::InvalidInput(_) => "invalid_request",
            AppError::Database(_) | AppError::Internal(_) => "internal_server_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(e) => tracing::error!("Database error: {}", e),
            AppError::Internal(e) => tracing::error!("Internal error: {:#}", e),
            _ => {}
        }

        let body = Json(json!({
            "success": false,
            "message": self.message(),
            "code": self.code(),
        }));

        (self.status(), body).into_response()
    }
}
