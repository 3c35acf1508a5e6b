//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`rf_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on library calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: rf_core::Error,
}

impl AppError {
    pub fn new(inner: rf_core::Error) -> Self {
        Self { inner }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match &self.inner {
            rf_core::Error::NotFound { .. } => "not_found",
            rf_core::Error::Unauthorized(_) => "unauthorized",
            rf_core::Error::Forbidden(_) => "forbidden",
            rf_core::Error::Validation(_) => "validation_error",
            rf_core::Error::Conflict(_) => "conflict",
            rf_core::Error::Database { .. } => "database_error",
            rf_core::Error::Io { .. } => "io_error",
            rf_core::Error::Upstream { .. } => "upstream_error",
            rf_core::Error::Storage(_) => "storage_error",
            rf_core::Error::Stage { .. } => "stage_error",
            rf_core::Error::Internal(_) => "internal_error",
        }
    }
}

impl From<rf_core::Error> for AppError {
    fn from(e: rf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
