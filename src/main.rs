//! Dockside - single-host Docker management service
//!
//! Connects to the local Docker Engine and serves the lifecycle, stats, provisioning and console
//! endpoints over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dockside::api::create_router;
use dockside::config::AppConfig;
use dockside::engine::{ContainerEngine, DockerEngine};
use dockside::logging::init_logging;
use dockside::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, config.log_dir.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Dockside"
    );

    if config.metrics.enabled {
        dockside::metrics::init_metrics()?;
        info!(path = %config.metrics.path, "Prometheus metrics initialized");
    }

    // The engine connection is the only fatal dependency
    let engine = DockerEngine::connect(&config.engine)
        .await
        .context("Failed to connect to the Docker engine")?;
    match engine.version().await {
        Ok(version) => info!(engine_version = %version, "Docker engine ready"),
        Err(e) => warn!(error = %e, "Could not read Docker engine version"),
    }
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine);

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState::new(config.clone(), engine, shutdown.clone()));

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening on");

    // Start server with graceful shutdown; open consoles are told to close first
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                active_sessions = state.tty.active_sessions(),
                "Shutting down..."
            );
            shutdown.cancel();
        })
        .await?;

    info!("Dockside stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
