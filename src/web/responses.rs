//! HTTP response types and utilities
//!
//! JSON endpoints and every error share the [`ApiResponse`] envelope. Image
//! bytes are returned raw by the image handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

use crate::errors::{AppError, FetchError};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error_with_details(message: String, details: HashMap<String, String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Status code for an application error
pub fn status_for(error: &AppError) -> StatusCode {
    match error {
        AppError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        AppError::Fetch(FetchError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        AppError::Fetch(_) => StatusCode::BAD_GATEWAY,
        AppError::Transform(_)
        | AppError::Storage(_)
        | AppError::Configuration { .. }
        | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> impl IntoResponse {
    let status = status_for(&error);
    let (message, details) = match &error {
        AppError::InvalidRequest { field, message } => (
            format!("Invalid request parameter '{field}'"),
            Some(HashMap::from([(field.clone(), message.clone())])),
        ),
        AppError::Fetch(fetch_error) => (
            format!("Failed to retrieve source image: {fetch_error}"),
            None,
        ),
        AppError::Transform(_) | AppError::Storage(_) | AppError::Configuration { .. } => {
            error!("Unexpected error reached the web layer: {}", error);
            ("Image processing failed".to_string(), None)
        }
        AppError::Internal { message } => {
            error!("Internal error: {}", message);
            ("Internal server error".to_string(), None)
        }
    };

    let response = match details {
        Some(details) => ApiResponse::<()>::error_with_details(message, details),
        None => ApiResponse::<()>::error(message),
    };

    (status, Json(response))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        handle_error(self).into_response()
    }
}

/// Success response helper
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}
