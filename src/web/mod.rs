//! Job listener
//!
//! A small HTTP surface that accepts on-demand jobs and reports coordinator
//! health. Every request is handled by forwarding to the [`CoordinatorHandle`].

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ListenerConfig;
use crate::job_scheduling::CoordinatorHandle;

pub mod handlers;
pub mod responses;

pub use responses::ApiResponse;

pub fn router(handle: CoordinatorHandle) -> Router {
    Router::new()
        .route("/jobs", post(handlers::submit_job))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::coordinator_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Serve the listener until cancelled
pub async fn serve(
    config: &ListenerConfig,
    handle: CoordinatorHandle,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Job listener on http://{}", listener.local_addr()?);

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await?;

    info!("Job listener stopped");
    Ok(())
}
