//! Container runtime abstraction and its Docker implementation
//!
//! The executor only talks to `ContainerRuntime`, so tests can drive it with a
//! fake runtime and the production build uses the Docker engine API.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use thiserror::Error;
use tracing::debug;

use super::config::ContainerSpec;

/// Seconds the Docker client waits for a single API request
const DOCKER_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}

/// Minimal container lifecycle used by the sandbox executor
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Follow the combined output until the container exits
    async fn collect_output(&self, id: &str) -> Result<String, RuntimeError>;

    /// Exit code of a stopped container
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Force-remove a container; removing an already removed container succeeds
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Docker engine backed runtime
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon at `socket`, or the local default socket
    pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, DOCKER_REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        user: spec.user.clone(),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(spec.network_disabled),
        host_config: Some(HostConfig {
            binds: Some(spec.binds.clone()),
            tmpfs: Some(spec.tmpfs.clone()),
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_swap_bytes),
            pids_limit: Some(spec.pids_limit),
            network_mode: Some("none".to_string()),
            cap_drop: Some(spec.cap_drop.clone()),
            security_opt: Some(spec.security_opt.clone()),
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await?;

        for warning in &response.warnings {
            debug!(container = %spec.name, "Docker warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn collect_output(&self, id: &str) -> Result<String, RuntimeError> {
        let options = Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        });

        let mut output = String::new();
        let mut stream = self.docker.logs(id, options);
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(output)
    }

    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut stream = self.docker.wait_container(id, options);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits are reported as an error by the wait endpoint
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(RuntimeError::Other(format!(
                "wait stream for container {} ended without status",
                id
            ))),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(id, options).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
