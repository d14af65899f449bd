//! API module for Dockside
//!
//! Provides REST API endpoints for:
//! - Image and container listing
//! - Container start, stop, remove and usage stats
//! - Provisioning the Anaconda container
//! - Interactive consoles over WebSocket
//! - Health checks and metrics

mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use error::ApiError;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // API v1 routes
        .nest("/api/v1", api_v1_routes());

    if state.config.metrics.enabled {
        router = router.route(&state.config.metrics.path, get(crate::metrics::metrics_handler));
    }

    router.with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new().nest("/docker", docker_routes())
}

/// Docker management routes
fn docker_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/images", post(handlers::images::list_images))
        .route("/containers", post(handlers::containers::list_containers))
        .route(
            "/containers/create_anaconda_container",
            post(handlers::containers::create_anaconda_container),
        )
        .route("/containers/:id/stats", post(handlers::containers::container_stats))
        .route("/containers/:id/start", post(handlers::containers::start_container))
        .route("/containers/:id/stop", post(handlers::containers::stop_container))
        .route("/containers/:id/remove", post(handlers::containers::remove_container))
        .route("/containers/:id/console", get(handlers::console::console))
}
