//! Image handlers

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::api::ApiError;
use crate::models::ImageSummary;
use crate::AppState;

pub async fn list_images(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ImageSummary>>, ApiError> {
    Ok(Json(state.containers.list_images().await?))
}
