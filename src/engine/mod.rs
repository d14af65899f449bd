//! Container engine adapter
//!
//! [`ContainerEngine`] is the seam between Dockside and the container engine's control API.
//! One implementation, [`DockerEngine`], talks to the Docker Engine API through bollard; it is
//! constructed once at startup and shared (`Arc<dyn ContainerEngine>`) by every component.

mod docker;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::models::{ContainerSummary, ImageSummary, StatsSample};

pub use docker::DockerEngine;

/// Errors reported by the container engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine's own not-found message, unchanged
    #[error("{0}")]
    NotFound(String),

    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode engine response: {0}")]
    Decode(String),

    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("engine transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Host port published for a container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_ip: String,
    pub host_port: u16,
}

impl PortBinding {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            protocol: "tcp".to_string(),
            host_ip: "0.0.0.0".to_string(),
            host_port,
        }
    }

    /// Engine key, e.g. `8888/tcp`
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Host directory bind-mounted into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    pub mounts: Vec<BindMount>,
    /// OCI runtime name, e.g. `nvidia`
    pub runtime: Option<String>,
}

/// Engine acknowledgement of a created container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainerRef {
    pub id: String,
    pub warnings: Vec<String>,
}

/// Command run through exec with a pseudo-terminal and all stdio attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
}

pub type ExecOutput = BoxStream<'static, Result<Vec<u8>, EngineError>>;
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Duplex byte stream of an attached exec. Dropping it releases the attachment.
pub struct ExecAttachment {
    pub output: ExecOutput,
    pub input: ExecInput,
}

impl std::fmt::Debug for ExecAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecAttachment").finish_non_exhaustive()
    }
}

/// Control-API operations used by Dockside
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check the engine is reachable
    async fn ping(&self) -> Result<(), EngineError>;

    /// Engine server version string
    async fn version(&self) -> Result<String, EngineError>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError>;

    /// `all = true` includes stopped containers
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError>;

    /// One non-streaming stats payload carrying current and previous CPU counters
    async fn stats_snapshot(&self, id: &str) -> Result<StatsSample, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str) -> Result<(), EngineError>;

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), EngineError>;

    async fn create_container(&self, spec: &ContainerSpec)
        -> Result<CreatedContainerRef, EngineError>;

    /// Returns the exec id
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec)
        -> Result<String, EngineError>;

    async fn attach_exec(&self, exec_id: &str) -> Result<ExecAttachment, EngineError>;
}
