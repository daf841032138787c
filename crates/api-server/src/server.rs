//! Router assembly and the HTTP listener.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::rest::{
    handle_bulk_enroll, handle_enroll, handle_exit, handle_run, handle_tracking_click,
    handle_tracking_open, handle_tracking_reply, health_check, AppState,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sequences/:id/enrollments", post(handle_enroll))
        .route(
            "/v1/sequences/:id/enrollments/bulk",
            post(handle_bulk_enroll),
        )
        .route("/v1/sequences/:id/exits", post(handle_exit))
        .route("/v1/scheduler/run", post(handle_run))
        .route("/v1/tracking/opens", post(handle_tracking_open))
        .route("/v1/tracking/clicks", post(handle_tracking_click))
        .route("/v1/tracking/replies", post(handle_tracking_reply))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
