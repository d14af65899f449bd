//! Container lifecycle handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Form, Json,
};
use tracing::info;

use crate::api::ApiError;
use crate::container::{ports, PortRole};
use crate::models::{
    ContainerStatsSnapshot, ContainerSummary, CreateAnacondaRequest, CreatedContainer,
};
use crate::AppState;

/// List every container, stopped ones included
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContainerSummary>>, ApiError> {
    Ok(Json(state.containers.list_containers().await?))
}

/// One CPU/memory sample
pub async fn container_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ContainerStatsSnapshot>, ApiError> {
    Ok(Json(state.containers.container_stats(&id).await?))
}

pub async fn start_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.containers.start_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.containers.stop_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Force-remove a container together with its anonymous volumes
pub async fn remove_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.containers.remove_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Provision the Anaconda container on the requested host ports
pub async fn create_anaconda_container(
    State(state): State<Arc<AppState>>,
    Form(request): Form<CreateAnacondaRequest>,
) -> Result<(StatusCode, Json<CreatedContainer>), ApiError> {
    let jupyter_port = ports::parse_port(PortRole::Jupyter, &request.jupyter_port)?;
    let ssh_port = ports::parse_port(PortRole::Ssh, &request.ssh_port)?;

    let created = state
        .containers
        .create_anaconda_container(jupyter_port, ssh_port)
        .await?;

    info!(
        container_id = %created.id,
        jupyter_port,
        ssh_port,
        "Anaconda container provisioned"
    );

    Ok((StatusCode::CREATED, Json(created)))
}
