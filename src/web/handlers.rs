//! Job listener HTTP handlers

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tracing::warn;

use super::responses::{ApiResponse, handle_error};
use crate::errors::AppError;
use crate::job_scheduling::CoordinatorHandle;

/// Accept a job dictionary and hand it to the coordinator
pub async fn submit_job(
    State(handle): State<CoordinatorHandle>,
    Json(raw): Json<Map<String, Value>>,
) -> Response {
    match handle.submit_request(raw) {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(json!({ "job_id": job_id }))),
        )
            .into_response(),
        Err(e) => {
            warn!("Rejected submitted job: {}", e);
            handle_error(AppError::from(e))
        }
    }
}

/// Coordinator health and pool occupancy
pub async fn health_check(State(handle): State<CoordinatorHandle>) -> impl IntoResponse {
    let health = handle.health_check();
    let status = if health.is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::success(health)))
}

/// Full coordinator statistics including per-worker status
pub async fn coordinator_stats(State(handle): State<CoordinatorHandle>) -> impl IntoResponse {
    Json(ApiResponse::success(handle.stats()))
}
