//! Configuration module for Dockside
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with DOCKSIDE_ prefix)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the JSON log file; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Container engine connection
    #[serde(default)]
    pub engine: EngineConfig,

    /// Anaconda development container template
    #[serde(default)]
    pub anaconda: AnacondaConfig,

    /// Interactive console sessions
    #[serde(default)]
    pub tty: TtyConfig,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Docker Engine API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Socket path, named pipe, or `tcp://`/`http://` URL. Local defaults when unset.
    #[serde(default)]
    pub address: Option<String>,

    /// Engine API version the client is pinned to, e.g. "1.41"
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Connection timeout handed to the client
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Upper bound on every individual engine call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Grace period before the engine kills a stopping container
    #[serde(default)]
    pub stop_timeout_seconds: Option<i64>,
}

/// Template for the GPU-backed Anaconda container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnacondaConfig {
    #[serde(default = "default_anaconda_image")]
    pub image: String,

    /// Container runtime providing GPU access
    #[serde(default = "default_runtime")]
    pub runtime: Option<String>,

    /// Host directory bind-mounted into the container
    #[serde(default = "default_workspace_host_dir")]
    pub workspace_host_dir: PathBuf,

    /// Mount target inside the container, also the notebook root
    #[serde(default = "default_workspace_container_dir")]
    pub workspace_container_dir: String,

    /// Pre-hashed notebook password (`sha1:salt:digest`)
    #[serde(default = "default_notebook_password_hash")]
    pub notebook_password_hash: String,

    /// Create the host workspace directory before creating the container
    #[serde(default = "default_true")]
    pub create_workspace_dir: bool,

    /// Force-remove a container that was created but failed to start
    #[serde(default = "default_true")]
    pub remove_on_start_failure: bool,
}

/// Interactive console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtyConfig {
    /// Command started inside the container
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,

    /// TERM exported to the shell
    #[serde(default = "default_term")]
    pub term: Option<String>,

    /// Maximum bytes forwarded per outbound message
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Close the session when the client sends nothing for this long (0 disables)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,

    /// Upper bound on a single write to either side
    #[serde(default = "default_write_timeout")]
    pub write_timeout_seconds: u64,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_version() -> String {
    "1.41".to_string()
}

fn default_connect_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    60
}

fn default_anaconda_image() -> String {
    "yanfei/anaconda3:latest".to_string()
}

fn default_runtime() -> Option<String> {
    Some("nvidia".to_string())
}

fn default_workspace_host_dir() -> PathBuf {
    PathBuf::from("/opt/notebook/workspace")
}

fn default_workspace_container_dir() -> String {
    "/workspace".to_string()
}

fn default_notebook_password_hash() -> String {
    "sha1:77b5117ca0a9:f62234b17bee56b22db9d5d2b307b7c42573569f".to_string()
}

fn default_shell() -> Vec<String> {
    vec!["/bin/bash".to_string()]
}

fn default_term() -> Option<String> {
    Some("xterm-256color".to_string())
}

fn default_chunk_size() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_write_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: None,
            api_version: default_api_version(),
            connect_timeout_seconds: default_connect_timeout(),
            request_timeout_seconds: default_request_timeout(),
            stop_timeout_seconds: None,
        }
    }
}

impl Default for AnacondaConfig {
    fn default() -> Self {
        Self {
            image: default_anaconda_image(),
            runtime: default_runtime(),
            workspace_host_dir: default_workspace_host_dir(),
            workspace_container_dir: default_workspace_container_dir(),
            notebook_password_hash: default_notebook_password_hash(),
            create_workspace_dir: true,
            remove_on_start_failure: true,
        }
    }
}

impl Default for TtyConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            term: default_term(),
            chunk_size: default_chunk_size(),
            idle_timeout_seconds: default_idle_timeout(),
            write_timeout_seconds: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: None,
            engine: EngineConfig::default(),
            anaconda: AnacondaConfig::default(),
            tty: TtyConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse `api_version` into (major, minor)
    pub fn parsed_api_version(&self) -> Result<(usize, usize)> {
        let (major, minor) = self
            .api_version
            .trim()
            .trim_start_matches('v')
            .split_once('.')
            .with_context(|| format!("Invalid engine API version: {}", self.api_version))?;

        let major = major
            .parse()
            .with_context(|| format!("Invalid engine API major version: {}", major))?;
        let minor = minor
            .parse()
            .with_context(|| format!("Invalid engine API minor version: {}", minor))?;

        Ok((major, minor))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl TtyConfig {
    /// `None` when idle detection is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_seconds > 0).then(|| Duration::from_secs(self.idle_timeout_seconds))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        Self::load_from(
            config::Config::builder()
                .add_source(config::File::with_name("config/dockside").required(false))
                .add_source(config::File::with_name("/etc/dockside/config").required(false)),
        )
    }

    /// Layer defaults under the given sources, with DOCKSIDE__ environment variables on top
    fn load_from(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(builder.build().context("Failed to read configuration files")?)
            // Override with environment variables (DOCKSIDE_ prefix)
            .add_source(
                config::Environment::with_prefix("DOCKSIDE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        self.engine.parsed_api_version()?;

        if self.engine.request_timeout_seconds == 0 {
            anyhow::bail!("Engine request timeout cannot be 0");
        }

        if self.tty.chunk_size == 0 {
            anyhow::bail!("TTY chunk size cannot be 0");
        }

        if self.tty.shell.is_empty() {
            anyhow::bail!("TTY shell command cannot be empty");
        }

        if self.tty.write_timeout_seconds == 0 {
            anyhow::bail!("TTY write timeout cannot be 0");
        }

        if !self.anaconda.workspace_container_dir.starts_with('/') {
            anyhow::bail!("Workspace container dir must be an absolute path");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine.api_version, "1.41");
        assert_eq!(config.tty.chunk_size, 1024);
        assert_eq!(config.anaconda.runtime.as_deref(), Some("nvidia"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tty.shell.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.request_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_version_parsing() {
        let mut engine = EngineConfig::default();
        assert_eq!(engine.parsed_api_version().unwrap(), (1, 41));

        engine.api_version = "v1.43".to_string();
        assert_eq!(engine.parsed_api_version().unwrap(), (1, 43));

        engine.api_version = "latest".to_string();
        assert!(engine.parsed_api_version().is_err());
    }

    #[test]
    fn test_idle_timeout_disabled() {
        let tty = TtyConfig {
            idle_timeout_seconds: 0,
            ..TtyConfig::default()
        };
        assert!(tty.idle_timeout().is_none());
        assert_eq!(TtyConfig::default().idle_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockside.toml");
        std::fs::write(
            &path,
            r#"
port = 9090

[engine]
api_version = "1.43"

[tty]
chunk_size = 4096
"#,
        )
        .unwrap();

        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_path()).required(true));
        let config = AppConfig::load_from(builder).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.engine.api_version, "1.43");
        assert_eq!(config.tty.chunk_size, 4096);
        // Untouched sections keep their defaults
        assert_eq!(config.anaconda.image, "yanfei/anaconda3:latest");
    }
}
