//! Docker backend implementation.
//!
//! Talks to the local Docker daemon through bollard. Containers are created
//! without auto-remove: the engine always issues an explicit forced removal,
//! which avoids racing the daemon's own cleanup when reading the exit status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptions, KillContainerOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::future;
use futures_util::stream::StreamExt;
use tracing::{debug, instrument, warn};

use super::{EnvironmentSpec, IsolationBackend, OutputChunk, OutputStream};

/// CFS scheduling period in microseconds.
const CPU_PERIOD_US: i64 = 100_000;

/// `nobody:nogroup`; programs never run as uid 0 inside the container.
const SANDBOX_USER: &str = "65534:65534";

/// Backend that runs each execution in a throwaway Docker container.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        Ok(())
    }
}

/// Container configuration for one environment.
fn container_body(spec: &EnvironmentSpec) -> ContainerCreateBody {
    let memory = spec.limits.memory_bytes();
    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        working_dir: Some(spec.workdir.to_string()),
        user: Some(SANDBOX_USER.to_string()),
        // Toolchain caches land in the container's writable /tmp.
        env: Some(vec!["HOME=/tmp".to_string()]),
        tty: Some(false),
        open_stdin: Some(false),
        attach_stdin: Some(false),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                spec.host_dir.display(),
                spec.workdir
            )]),
            auto_remove: Some(false),
            network_mode: Some("none".to_string()),
            memory: Some(memory),
            memory_swap: Some(memory),
            cpu_period: Some(CPU_PERIOD_US),
            cpu_quota: Some(spec.limits.cpu_quota(CPU_PERIOD_US)),
            pids_limit: Some(spec.limits.pids_limit),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether the daemon answered with one of `codes`.
fn is_status(err: &BollardError, codes: &[u16]) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if codes.contains(status_code)
    )
}

#[async_trait]
impl IsolationBackend for DockerBackend {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &EnvironmentSpec) -> Result<String> {
        let options = Some(CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let created = self
            .docker
            .create_container(options, container_body(spec))
            .await
            .with_context(|| format!("Failed to create container from image {}", spec.image))?;

        for warning in &created.warnings {
            warn!(container = %created.id, warning = %warning, "Docker warning on create");
        }
        debug!(container = %created.id, "Created container");
        Ok(created.id)
    }

    async fn attach(&self, id: &str) -> Result<OutputStream> {
        let options = AttachContainerOptionsBuilder::default()
            .stream(true)
            .stdout(true)
            .stderr(true)
            .build();

        let attached = self
            .docker
            .attach_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to attach to container {id}"))?;

        let output = attached.output.filter_map(|item| {
            future::ready(match item {
                Ok(LogOutput::StdOut { message }) => Some(Ok(OutputChunk::Stdout(message.to_vec()))),
                Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message.to_vec()))),
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::new(e).context("Container output stream failed"))),
            })
        });
        Ok(output.boxed())
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .with_context(|| format!("Failed to start container {id}"))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut stream = self.docker.wait_container(id, None::<WaitContainerOptions>);
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error; it is a normal result here.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e).with_context(|| format!("Failed to wait for container {id}")),
            None => anyhow::bail!("Wait stream for container {id} ended without a status"),
        }
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let options = KillContainerOptionsBuilder::default().signal("SIGKILL").build();

        match self.docker.kill_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already exited or already gone.
            Err(e) if is_status(&e, &[404, 409]) => {
                debug!(container = %id, "Container not running at kill time");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to kill container {id}")),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 404: already gone; 409: removal already in progress.
            Err(e) if is_status(&e, &[404, 409]) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove container {id}")),
        }
    }
}
