//! Interactive console over WebSocket

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::tty::TtyBridge;
use crate::AppState;

/// Upgrade to a WebSocket and bridge it to a shell in the container
///
/// A blank id is rejected before the upgrade. Setup failures after the upgrade are reported on
/// the socket itself.
pub async fn console(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let container_id = TtyBridge::validate_target(&id)?.to_string();

    let bridge = state.tty.clone();
    let shutdown = state.shutdown.clone();

    Ok(ws
        .on_failed_upgrade(|e| warn!(error = %e, "Console upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sender, receiver) = socket.split();
            match bridge.serve(&container_id, sender, receiver, shutdown).await {
                Ok(end) => debug!(container_id = %container_id, end = ?end, "Console relay finished"),
                Err(e) => debug!(container_id = %container_id, error = %e, "Console not opened"),
            }
        }))
}
