//! JSON error responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::JobError;

/// Seconds a rejected client should wait before resubmitting.
const BUSY_RETRY_AFTER_SECS: u64 = 30;

/// An error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Maps a job error. With `hide_foreign` set, records owned by someone
    /// else are reported as missing.
    pub fn from_job(err: JobError, hide_foreign: bool) -> Self {
        match err {
            JobError::InvalidInput(message) => Self::bad_request(message),
            JobError::Busy => Self {
                retry_after: Some(BUSY_RETRY_AFTER_SECS),
                ..Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            },
            JobError::NotFound => Self::not_found(),
            JobError::AccessDenied if hide_foreign => Self::not_found(),
            JobError::AccessDenied => Self::new(StatusCode::FORBIDDEN, "access denied"),
            JobError::StillProcessing(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            JobError::SchedulingFailed { .. } => {
                tracing::error!(error = %err, "Analysis scheduling failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            JobError::Database(_) | JobError::Io { .. } => {
                tracing::error!(error = %err, "Request failed");
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
