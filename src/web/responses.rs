//! HTTP response types for the job listener

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::errors::AppError;
use crate::job_scheduling::JobSchedulingError;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Map an error to its HTTP status and message
pub fn handle_error(error: AppError) -> Response {
    let status = match &error {
        AppError::Scheduling(JobSchedulingError::InvalidJob { .. }) => StatusCode::BAD_REQUEST,
        AppError::Scheduling(JobSchedulingError::QueueFull { .. }) => StatusCode::TOO_MANY_REQUESTS,
        AppError::Scheduling(JobSchedulingError::CoordinatorClosed) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AppError::Access(_) | AppError::Definition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Http(_) => StatusCode::BAD_GATEWAY,
        AppError::Configuration { .. } | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ApiResponse::error(error.to_string()))).into_response()
}
