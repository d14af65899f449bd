//! Docker Engine API implementation backed by bollard

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::ListImagesOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::{ClientVersion, Docker};
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::models::{ContainerSummary, CpuCounters, ImageSummary, PortSummary, StatsSample};

use super::{
    ContainerEngine, ContainerSpec, CreatedContainerRef, EngineError, ExecAttachment, ExecSpec,
};

#[cfg(unix)]
const DEFAULT_LOCAL_ADDRESS: &str = "/var/run/docker.sock";
#[cfg(windows)]
const DEFAULT_LOCAL_ADDRESS: &str = "//./pipe/docker_engine";

/// Shared Docker client pinned to one API version
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    request_timeout: Duration,
    stop_timeout: Option<i64>,
}

impl DockerEngine {
    /// Connect to the engine and verify it answers a ping
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let (major_version, minor_version) = config.parsed_api_version()?;
        let client_version = ClientVersion {
            major_version,
            minor_version,
        };

        let address = config
            .address
            .clone()
            .or_else(|| std::env::var("DOCKER_HOST").ok())
            .unwrap_or_else(|| DEFAULT_LOCAL_ADDRESS.to_string());

        let docker = if address.starts_with("tcp://") || address.starts_with("http://") {
            Docker::connect_with_http(&address, config.connect_timeout_seconds, &client_version)
        } else {
            Docker::connect_with_local(
                address.trim_start_matches("unix://"),
                config.connect_timeout_seconds,
                &client_version,
            )
        }
        .with_context(|| format!("Failed to create Docker client for {}", address))?;

        let engine = Self {
            docker,
            request_timeout: config.request_timeout(),
            stop_timeout: config.stop_timeout_seconds,
        };

        engine
            .ping()
            .await
            .with_context(|| format!("Docker engine at {} is not reachable", address))?;

        info!(
            address = %address,
            api_version = %config.api_version,
            "Connected to Docker engine"
        );

        Ok(engine)
    }

    /// Run one engine call under the request timeout and record its outcome
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, bollard::errors::Error>>,
    {
        self.bounded_for(operation, self.request_timeout, call).await
    }

    async fn bounded_for<T, F>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: F,
    ) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, bollard::errors::Error>>,
    {
        let started = Instant::now();

        let result = match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::Timeout {
                operation,
                after: limit,
            }),
        };

        crate::metrics::record_engine_call(
            operation,
            started.elapsed().as_secs_f64(),
            result.is_ok(),
        );

        if let Err(ref e) = result {
            debug!(operation, error = %e, "Engine call failed");
        }

        result
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;

        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => EngineError::NotFound(message),
            Error::DockerResponseServerError {
                status_code,
                message,
            } => EngineError::Api {
                status: status_code,
                message,
            },
            Error::JsonDataError { message, .. } => EngineError::Decode(message),
            Error::JsonSerdeError { err } => EngineError::Decode(err.to_string()),
            other => EngineError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.bounded("ping", self.docker.ping()).await.map(|_| ())
    }

    async fn version(&self) -> Result<String, EngineError> {
        let version = self.bounded("version", self.docker.version()).await?;
        Ok(version.version.unwrap_or_default())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        let images = self
            .bounded(
                "list_images",
                self.docker
                    .list_images(Some(ListImagesOptions::<String>::default())),
            )
            .await?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                tags: image.repo_tags,
                size: image.size,
                created: chrono::DateTime::from_timestamp(image.created, 0),
            })
            .collect())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, EngineError> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let containers = self
            .bounded("list_containers", self.docker.list_containers(Some(options)))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                command: c.command.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortSummary {
                        ip: p.ip,
                        private_port: p.private_port,
                        public_port: p.public_port,
                        protocol: p
                            .typ
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "tcp".to_string()),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn stats_snapshot(&self, id: &str) -> Result<StatsSample, EngineError> {
        // one_shot stays false so the engine fills in the previous CPU reading
        let mut stream = Box::pin(self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        ));

        let stats = self
            .bounded("stats", async { stream.next().await.transpose() })
            .await?
            .ok_or_else(|| EngineError::Decode(format!("no stats returned for {}", id)))?;

        Ok(sample_from_stats(&stats))
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.bounded(
            "start_container",
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let options = self.stop_timeout.map(|t| StopContainerOptions { t });
        self.bounded_for(
            "stop_container",
            stop_call_timeout(self.request_timeout, self.stop_timeout),
            self.docker.stop_container(id, options),
        )
        .await
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            v: remove_volumes,
            force,
            ..Default::default()
        };
        self.bounded(
            "remove_container",
            self.docker.remove_container(id, Some(options)),
        )
        .await
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<CreatedContainerRef, EngineError> {
        let response = self
            .bounded(
                "create_container",
                self.docker.create_container(
                    None::<CreateContainerOptions<String>>,
                    container_config(spec),
                ),
            )
            .await?;

        Ok(CreatedContainerRef {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        let options = CreateExecOptions {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            cmd: Some(spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            ..Default::default()
        };

        let created = self
            .bounded("create_exec", self.docker.create_exec(container_id, options))
            .await?;

        Ok(created.id)
    }

    async fn attach_exec(&self, exec_id: &str) -> Result<ExecAttachment, EngineError> {
        let options = StartExecOptions {
            detach: false,
            tty: true,
            ..Default::default()
        };

        match self
            .bounded("attach_exec", self.docker.start_exec(exec_id, Some(options)))
            .await?
        {
            StartExecResults::Attached { output, input } => Ok(ExecAttachment {
                output: output
                    .map(|chunk| chunk.map(log_bytes).map_err(EngineError::from))
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => Err(EngineError::Transport(format!(
                "exec {} started detached, no stream to attach",
                exec_id
            ))),
        }
    }
}

/// The engine waits out the grace period before killing, so the call gets that on top
fn stop_call_timeout(request_timeout: Duration, grace_seconds: Option<i64>) -> Duration {
    let grace = grace_seconds
        .and_then(|secs| u64::try_from(secs).ok())
        .map(Duration::from_secs)
        .unwrap_or_default();
    request_timeout + grace
}

/// Bytes of a stream frame; with a TTY the engine sends one raw stream
fn log_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message.to_vec(),
    }
}

fn sample_from_stats(stats: &Stats) -> StatsSample {
    StatsSample {
        cpu: CpuCounters {
            total_usage: stats.cpu_stats.cpu_usage.total_usage,
            system_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        },
        precpu: CpuCounters {
            total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
        },
        per_core_count: stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(|cores| cores.len() as u32)
            .unwrap_or(0),
        online_cpus: stats.cpu_stats.online_cpus.map(|n| n as u32),
        memory_usage: stats.memory_stats.usage.unwrap_or(0),
        memory_limit: stats.memory_stats.limit.unwrap_or(0),
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .port_bindings
        .iter()
        .map(|binding| (binding.container_key(), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
        .port_bindings
        .iter()
        .map(|binding| {
            (
                binding.container_key(),
                Some(vec![bollard::models::PortBinding {
                    host_ip: Some(binding.host_ip.clone()),
                    host_port: Some(binding.host_port.to_string()),
                }]),
            )
        })
        .collect();

    let mounts = spec
        .mounts
        .iter()
        .map(|mount| Mount {
            source: Some(mount.source.clone()),
            target: Some(mount.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            mounts: Some(mounts),
            runtime: spec.runtime.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BindMount, PortBinding};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_not_found_keeps_engine_message() {
        let err = EngineError::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: deadbeef".to_string(),
        });
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No such container: deadbeef");
    }

    #[test]
    fn test_server_error_mapping() {
        let err = EngineError::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "container is running".to_string(),
        });
        assert!(matches!(err, EngineError::Api { status: 409, .. }));
    }

    #[test]
    fn test_stop_call_outlasts_grace_period() {
        let request = Duration::from_secs(60);
        assert_eq!(stop_call_timeout(request, None), request);
        assert_eq!(stop_call_timeout(request, Some(120)), Duration::from_secs(180));
        // Negative grace adds nothing
        assert_eq!(stop_call_timeout(request, Some(-1)), request);
    }

    #[test]
    fn test_container_config_from_spec() {
        let spec = ContainerSpec {
            image: "example:latest".to_string(),
            cmd: vec!["sleep".to_string(), "infinity".to_string()],
            env: vec![],
            port_bindings: vec![PortBinding::tcp(8888, 18888), PortBinding::tcp(22, 2222)],
            mounts: vec![BindMount {
                source: "/srv/work".to_string(),
                target: "/workspace".to_string(),
            }],
            runtime: Some("nvidia".to_string()),
        };

        let config = container_config(&spec);
        assert_eq!(config.image.as_deref(), Some("example:latest"));
        assert!(config.env.is_none());

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("8888/tcp"));
        assert!(exposed.contains_key("22/tcp"));

        let host_config = config.host_config.unwrap();
        assert_eq!(host_config.runtime.as_deref(), Some("nvidia"));

        let bindings = host_config.port_bindings.unwrap();
        let jupyter = bindings["8888/tcp"].as_ref().unwrap();
        assert_eq!(jupyter[0].host_port.as_deref(), Some("18888"));
        assert_eq!(jupyter[0].host_ip.as_deref(), Some("0.0.0.0"));

        let mounts = host_config.mounts.unwrap();
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[0].source.as_deref(), Some("/srv/work"));
        assert_eq!(mounts[0].target.as_deref(), Some("/workspace"));
    }
}
