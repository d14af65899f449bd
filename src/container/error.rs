//! Errors raised by container operations

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Which host port of the Anaconda container a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Jupyter,
    Ssh,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Jupyter => f.write_str("Jupyter"),
            PortRole::Ssh => f.write_str("SSH"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container id is required")]
    MissingContainerId,

    #[error("Invalid {role} port: {value:?}")]
    InvalidPort { role: PortRole, value: String },

    #[error("Jupyter and SSH ports must differ (both are {0})")]
    DuplicatePorts(u16),

    #[error("{role} port {port} is not available")]
    PortUnavailable { role: PortRole, port: u16 },

    #[error("failed to prepare workspace {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to {operation}{}: {source}", target_suffix(.target))]
    Engine {
        operation: &'static str,
        target: Option<String>,
        source: EngineError,
    },
}

fn target_suffix(target: &Option<String>) -> String {
    target
        .as_deref()
        .map(|t| format!(" {}", t))
        .unwrap_or_default()
}

impl ContainerError {
    /// Wrap an engine error for `operation` on an optional target id
    pub(crate) fn engine(
        operation: &'static str,
        target: Option<&str>,
    ) -> impl FnOnce(EngineError) -> ContainerError {
        let target = target.map(str::to_string);
        move |source| ContainerError::Engine {
            operation,
            target,
            source,
        }
    }

    /// True for caller mistakes that never reached the engine
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ContainerError::MissingContainerId
                | ContainerError::InvalidPort { .. }
                | ContainerError::DuplicatePorts(_)
        )
    }
}
