//! Dockside library
//!
//! Single-host Docker management: container lifecycle, usage sampling, provisioning of the GPU
//! Anaconda workspace and interactive consoles over WebSocket.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

pub mod api;
pub mod config;
pub mod container;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod tty;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub containers: container::ContainerManager,
    pub tty: Arc<tty::TtyBridge>,
    /// Cancelled once the server starts shutting down; ends open consoles
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl AppState {
    /// Wire every component to one shared engine handle
    pub fn new(
        config: config::AppConfig,
        engine: Arc<dyn engine::ContainerEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        let containers = container::ContainerManager::new(engine.clone(), config.anaconda.clone());
        let tty = Arc::new(tty::TtyBridge::new(engine, config.tty.clone()));

        Self {
            config,
            containers,
            tty,
            shutdown,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
