//! Container lifecycle management

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::AnacondaConfig;
use crate::engine::{BindMount, ContainerEngine, ContainerSpec, PortBinding};
use crate::models::{ContainerStatsSnapshot, ContainerSummary, CreatedContainer, ImageSummary};

use super::error::{ContainerError, PortRole};
use super::{ports, stats};

/// Port the notebook server listens on inside the container
const NOTEBOOK_PORT: u16 = 8888;

/// Port sshd listens on inside the container
const SSH_PORT: u16 = 22;

/// Stateless lifecycle operations over a shared engine connection
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    anaconda: AnacondaConfig,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, anaconda: AnacondaConfig) -> Self {
        Self { engine, anaconda }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// All images, unfiltered
    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, ContainerError> {
        self.engine
            .list_images()
            .await
            .map_err(ContainerError::engine("list images", None))
    }

    /// All containers, stopped ones included
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ContainerError> {
        self.engine
            .list_containers(true)
            .await
            .map_err(ContainerError::engine("list containers", None))
    }

    /// Sample resource usage once
    pub async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, ContainerError> {
        let id = require_id(id)?;

        let sample = self
            .engine
            .stats_snapshot(id)
            .await
            .map_err(ContainerError::engine("get stats for container", Some(id)))?;

        let snapshot = stats::snapshot(id, &sample);
        crate::metrics::record_container_stats(snapshot.cpu_usage, snapshot.memory_usage);

        Ok(snapshot)
    }

    pub async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        let id = require_id(id)?;
        self.engine
            .start_container(id)
            .await
            .map_err(ContainerError::engine("start container", Some(id)))?;
        info!(container_id = %id, "Container started");
        Ok(())
    }

    pub async fn stop_container(&self, id: &str) -> Result<(), ContainerError> {
        let id = require_id(id)?;
        self.engine
            .stop_container(id)
            .await
            .map_err(ContainerError::engine("stop container", Some(id)))?;
        info!(container_id = %id, "Container stopped");
        Ok(())
    }

    /// Force-remove a container together with its anonymous volumes
    pub async fn remove_container(&self, id: &str) -> Result<(), ContainerError> {
        let id = require_id(id)?;
        self.engine
            .remove_container(id, true, true)
            .await
            .map_err(ContainerError::engine("remove container", Some(id)))?;
        info!(container_id = %id, "Container removed");
        Ok(())
    }

    /// Create and start the GPU-backed Anaconda container publishing the given host ports
    ///
    /// Nothing reaches the engine unless both ports pass the availability probe.
    pub async fn create_anaconda_container(
        &self,
        jupyter_port: u16,
        ssh_port: u16,
    ) -> Result<CreatedContainer, ContainerError> {
        if jupyter_port == ssh_port {
            return Err(ContainerError::DuplicatePorts(jupyter_port));
        }

        ports::ensure_available(&[(PortRole::Jupyter, jupyter_port), (PortRole::Ssh, ssh_port)])?;

        if self.anaconda.create_workspace_dir {
            let path = &self.anaconda.workspace_host_dir;
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|source| ContainerError::Workspace {
                    path: path.clone(),
                    source,
                })?;
        }

        let spec = self.anaconda_spec(jupyter_port, ssh_port);
        let created = self
            .engine
            .create_container(&spec)
            .await
            .map_err(ContainerError::engine("create container", None))?;

        for warning in &created.warnings {
            warn!(container_id = %created.id, warning = %warning, "Engine warning on create");
        }

        if let Err(e) = self.engine.start_container(&created.id).await {
            error!(container_id = %created.id, error = %e, "Anaconda container failed to start");
            self.discard_unstarted(&created.id).await;
            return Err(ContainerError::engine("start container", Some(&created.id))(e));
        }

        info!(
            container_id = %created.id,
            jupyter_port,
            ssh_port,
            "Anaconda container started"
        );

        Ok(CreatedContainer {
            id: created.id,
            warnings: created.warnings,
        })
    }

    /// Roll back a created-but-unstarted container when configured to
    async fn discard_unstarted(&self, id: &str) {
        if !self.anaconda.remove_on_start_failure {
            return;
        }

        match self.engine.remove_container(id, true, true).await {
            Ok(()) => info!(container_id = %id, "Removed container that failed to start"),
            Err(e) => warn!(
                container_id = %id,
                error = %e,
                "Could not remove container that failed to start"
            ),
        }
    }

    fn anaconda_spec(&self, jupyter_port: u16, ssh_port: u16) -> ContainerSpec {
        let workspace = &self.anaconda.workspace_container_dir;
        let startup = format!(
            "/usr/sbin/sshd && mkdir -p {workspace} && jupyter notebook \
             --NotebookApp.password='{password}' --notebook-dir={workspace} \
             --ip=0.0.0.0 --port={port} --no-browser --allow-root",
            workspace = workspace,
            password = self.anaconda.notebook_password_hash,
            port = NOTEBOOK_PORT,
        );

        ContainerSpec {
            image: self.anaconda.image.clone(),
            cmd: vec!["/bin/bash".to_string(), "-c".to_string(), startup],
            env: vec![],
            port_bindings: vec![
                PortBinding::tcp(NOTEBOOK_PORT, jupyter_port),
                PortBinding::tcp(SSH_PORT, ssh_port),
            ],
            mounts: vec![BindMount {
                source: self.anaconda.workspace_host_dir.to_string_lossy().to_string(),
                target: workspace.clone(),
            }],
            runtime: self.anaconda.runtime.clone(),
        }
    }
}

fn require_id(id: &str) -> Result<&str, ContainerError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ContainerError::MissingContainerId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CreatedContainerRef, EngineError, MockContainerEngine};
    use crate::models::{CpuCounters, StatsSample};
    use pretty_assertions::assert_eq;
    use std::net::{Ipv4Addr, TcpListener};

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn anaconda_config(workspace: &std::path::Path) -> AnacondaConfig {
        AnacondaConfig {
            workspace_host_dir: workspace.join("notebooks"),
            ..AnacondaConfig::default()
        }
    }

    fn manager(engine: MockContainerEngine, workspace: &std::path::Path) -> ContainerManager {
        ContainerManager::new(Arc::new(engine), anaconda_config(workspace))
    }

    fn not_found(id: &str) -> EngineError {
        EngineError::NotFound(format!("No such container: {}", id))
    }

    #[tokio::test]
    async fn test_list_containers_requests_all() {
        let mut engine = MockContainerEngine::new();
        engine
            .expect_list_containers()
            .withf(|all| *all)
            .times(1)
            .returning(|_| {
                Ok(vec![ContainerSummary {
                    id: "stopped1".into(),
                    names: vec!["/old".into()],
                    image: "busybox".into(),
                    command: "sh".into(),
                    state: "exited".into(),
                    status: "Exited (0) 1 hour ago".into(),
                    ports: vec![],
                }])
            });

        let dir = tempfile::tempdir().unwrap();
        let containers = manager(engine, dir.path()).list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].state, "exited");
    }

    #[tokio::test]
    async fn test_unknown_id_reports_engine_not_found() {
        let mut engine = MockContainerEngine::new();
        engine
            .expect_start_container()
            .returning(|id| Err(not_found(id)));
        engine
            .expect_stop_container()
            .returning(|id| Err(not_found(id)));
        engine
            .expect_remove_container()
            .returning(|id, _, _| Err(not_found(id)));
        engine
            .expect_stats_snapshot()
            .returning(|id| Err(not_found(id)));
        engine.expect_create_container().never();

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(engine, dir.path());

        let err = manager.start_container("ghost").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to start container ghost: No such container: ghost"
        );
        assert!(manager.stop_container("ghost").await.is_err());
        assert!(manager.remove_container("ghost").await.is_err());

        let err = manager.container_stats("ghost").await.unwrap_err();
        assert!(matches!(
            err,
            ContainerError::Engine { ref source, .. } if source.is_not_found()
        ));
    }

    #[tokio::test]
    async fn test_blank_id_never_reaches_engine() {
        let engine = MockContainerEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(engine, dir.path());

        assert!(matches!(
            manager.start_container("  ").await,
            Err(ContainerError::MissingContainerId)
        ));
        assert!(matches!(
            manager.container_stats("").await,
            Err(ContainerError::MissingContainerId)
        ));
    }

    #[tokio::test]
    async fn test_remove_forces_and_drops_volumes() {
        let mut engine = MockContainerEngine::new();
        engine
            .expect_remove_container()
            .withf(|id, force, volumes| id == "c1" && *force && *volumes)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        manager(engine, dir.path())
            .remove_container("c1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stats_snapshot_derivation() {
        let mut engine = MockContainerEngine::new();
        engine
            .expect_stats_snapshot()
            .withf(|id| id == "c1")
            .returning(|_| {
                Ok(StatsSample {
                    cpu: CpuCounters {
                        total_usage: 300,
                        system_usage: 2000,
                    },
                    precpu: CpuCounters {
                        total_usage: 100,
                        system_usage: 1000,
                    },
                    per_core_count: 2,
                    online_cpus: Some(2),
                    memory_usage: 1 << 20,
                    memory_limit: 1 << 30,
                })
            });

        let dir = tempfile::tempdir().unwrap();
        let snap = manager(engine, dir.path())
            .container_stats("c1")
            .await
            .unwrap();
        assert_eq!(snap.id, "c1");
        assert!((snap.cpu_usage - 40.0).abs() < 1e-9);
        assert_eq!(snap.memory_usage, 1 << 20);
        assert_eq!(snap.memory_limit, 1 << 30);
    }

    #[tokio::test]
    async fn test_prebound_port_blocks_creation() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let taken = listener.local_addr().unwrap().port();

        let mut engine = MockContainerEngine::new();
        engine.expect_create_container().never();
        engine.expect_start_container().never();

        let dir = tempfile::tempdir().unwrap();
        let manager = manager(engine, dir.path());

        let err = manager
            .create_anaconda_container(taken, free_port())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Jupyter port {} is not available", taken));

        let err = manager
            .create_anaconda_container(free_port(), taken)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), format!("SSH port {} is not available", taken));

        // Rejected before the workspace is touched
        assert!(!dir.path().join("notebooks").exists());
    }

    #[tokio::test]
    async fn test_duplicate_ports_rejected() {
        let mut engine = MockContainerEngine::new();
        engine.expect_create_container().never();

        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let err = manager(engine, dir.path())
            .create_anaconda_container(port, port)
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::DuplicatePorts(p) if p == port));
    }

    #[tokio::test]
    async fn test_create_publishes_requested_ports() {
        let (jupyter, ssh) = two_free_ports();

        let dir = tempfile::tempdir().unwrap();
        let host_dir = dir.path().join("notebooks");
        let expected_source = host_dir.to_string_lossy().to_string();

        let mut engine = MockContainerEngine::new();
        engine
            .expect_create_container()
            .withf(move |spec| {
                spec.image == "yanfei/anaconda3:latest"
                    && spec.runtime.as_deref() == Some("nvidia")
                    && spec.port_bindings
                        == vec![PortBinding::tcp(8888, jupyter), PortBinding::tcp(22, ssh)]
                    && spec.mounts
                        == vec![BindMount {
                            source: expected_source.clone(),
                            target: "/workspace".to_string(),
                        }]
                    && spec.cmd[..2] == ["/bin/bash".to_string(), "-c".to_string()]
                    && spec.cmd[2].contains("--ip=0.0.0.0 --port=8888")
                    && spec.cmd[2].starts_with("/usr/sbin/sshd && ")
            })
            .times(1)
            .returning(|_| {
                Ok(CreatedContainerRef {
                    id: "new1".into(),
                    warnings: vec![],
                })
            });
        engine
            .expect_start_container()
            .withf(|id| id == "new1")
            .times(1)
            .returning(|_| Ok(()));

        let created = manager(engine, dir.path())
            .create_anaconda_container(jupyter, ssh)
            .await
            .unwrap();

        assert_eq!(created.id, "new1");
        assert!(host_dir.is_dir());
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back() {
        let (jupyter, ssh) = two_free_ports();
        let mut engine = MockContainerEngine::new();
        engine.expect_create_container().returning(|_| {
            Ok(CreatedContainerRef {
                id: "new1".into(),
                warnings: vec![],
            })
        });
        engine.expect_start_container().returning(|_| {
            Err(EngineError::Api {
                status: 500,
                message: "could not select device driver \"nvidia\"".into(),
            })
        });
        engine
            .expect_remove_container()
            .withf(|id, force, volumes| id == "new1" && *force && *volumes)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        let err = manager(engine, dir.path())
            .create_anaconda_container(jupyter, ssh)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to start container new1:"));
    }

    #[tokio::test]
    async fn test_start_failure_kept_when_rollback_disabled() {
        let (jupyter, ssh) = two_free_ports();
        let mut engine = MockContainerEngine::new();
        engine.expect_create_container().returning(|_| {
            Ok(CreatedContainerRef {
                id: "new1".into(),
                warnings: vec![],
            })
        });
        engine
            .expect_start_container()
            .returning(|_| Err(EngineError::Transport("broken pipe".into())));
        engine.expect_remove_container().never();

        let dir = tempfile::tempdir().unwrap();
        let config = AnacondaConfig {
            remove_on_start_failure: false,
            ..anaconda_config(dir.path())
        };
        let manager = ContainerManager::new(Arc::new(engine), config);

        assert!(manager
            .create_anaconda_container(jupyter, ssh)
            .await
            .is_err());
    }

    /// Two distinct ports, both free once the probing listeners are dropped
    fn two_free_ports() -> (u16, u16) {
        let first = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let second = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        (
            first.local_addr().unwrap().port(),
            second.local_addr().unwrap().port(),
        )
    }

    /// Runs against a local Docker daemon: `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_docker_prebound_port_creates_nothing() {
        let engine = crate::engine::DockerEngine::connect(&crate::config::EngineConfig::default())
            .await
            .unwrap();
        let manager = ContainerManager::new(Arc::new(engine), AnacondaConfig::default());

        let _listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 9999)).unwrap();
        let before = manager.list_containers().await.unwrap().len();

        let err = manager.create_anaconda_container(9999, 9998).await.unwrap_err();
        assert_eq!(err.to_string(), "Jupyter port 9999 is not available");

        let after = manager.list_containers().await.unwrap().len();
        assert_eq!(before, after);
    }
}
