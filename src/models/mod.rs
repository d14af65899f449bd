//! Data models for Dockside
//!
//! Engine-agnostic projections of engine state plus request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Engine Projections
// ============================================================================

/// Image as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,

    /// Repository tags, empty for dangling images
    #[serde(default)]
    pub tags: Vec<String>,

    /// Size in bytes
    pub size: i64,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Container as reported by the engine, in any lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,

    #[serde(default)]
    pub names: Vec<String>,

    pub image: String,

    pub command: String,

    /// Machine state, e.g. "running", "exited", "created"
    pub state: String,

    /// Human-readable status line, e.g. "Up 3 minutes"
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub ports: Vec<PortSummary>,
}

/// One published or exposed container port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSummary {
    #[serde(default)]
    pub ip: Option<String>,
    pub private_port: u16,
    #[serde(default)]
    pub public_port: Option<u16>,
    pub protocol: String,
}

// ============================================================================
// Stats Models
// ============================================================================

/// Cumulative CPU counters at one sampling instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    /// Total CPU time consumed by the container
    pub total_usage: u64,
    /// Host-wide CPU time
    pub system_usage: u64,
}

/// Raw single-shot stats payload: both counter readings come from the same engine response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSample {
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,

    /// Number of per-core usage entries in the current reading
    pub per_core_count: u32,

    /// Online CPUs as reported by the engine, used when per-core entries are absent
    pub online_cpus: Option<u32>,

    pub memory_usage: u64,
    pub memory_limit: u64,
}

/// Derived resource-usage snapshot for a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatsSnapshot {
    pub id: String,

    /// Percent of one core, scaled by core count (0..=100 * cores)
    pub cpu_usage: f64,

    /// Bytes
    pub memory_usage: u64,

    /// Bytes
    pub memory_limit: u64,
}

// ============================================================================
// Container Creation Models
// ============================================================================

/// Form fields for the Anaconda container endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnacondaRequest {
    #[serde(default)]
    pub jupyter_port: String,
    #[serde(default)]
    pub ssh_port: String,
}

/// Result of a successful create-and-start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedContainer {
    pub id: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============================================================================
// Health Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: u64,
    #[serde(default)]
    pub engine_version: Option<String>,
    pub engine_api_version: String,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

// ============================================================================
// Error Models
// ============================================================================

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
