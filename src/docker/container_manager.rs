// ABOUTME: Docker daemon access via Bollard for machine containers
// Implements the exec API, machine lookup and the lifecycle event feed on top of one client

use super::exec_runner::{ExecBackend, ExecOutput};
use super::machine_launcher::{MachineEvent, MachineEventType, MachineInfo, MachineRegistry};
use crate::config::DockerConfig;
use bollard::container::{InspectContainerOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

const SOCKET_TIMEOUT_SECS: u64 = 120;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Docker connection error: {0}")]
    Connection(#[from] bollard::errors::Error),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Container operation failed: {0}")]
    OperationFailed(String),
}

impl ContainerError {
    fn from_lookup(name: &str, err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ContainerError::NotFound(name.to_string()),
            other => ContainerError::Connection(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerManager {
    docker: Docker,
    dev_label: String,
}

impl ContainerManager {
    /// Connect to the daemon and check it answers
    pub async fn new(config: &DockerConfig, dev_label: impl Into<String>) -> Result<Self, ContainerError> {
        let docker = Self::connect_to_docker(config.host.as_deref())?;

        docker.ping().await?;

        info!("Successfully connected to Docker daemon");
        Ok(Self {
            docker,
            dev_label: dev_label.into(),
        })
    }

    fn connect_to_docker(host: Option<&str>) -> Result<Docker, ContainerError> {
        if let Some(host) = host {
            info!("Using Docker host from config: {}", host);
            if let Some(path) = host.strip_prefix("unix://") {
                return Ok(Docker::connect_with_socket(
                    path,
                    SOCKET_TIMEOUT_SECS,
                    API_DEFAULT_VERSION,
                )?);
            }
            return Err(ContainerError::InvalidConfig(format!(
                "unsupported Docker host {host}, expected unix://<socket>"
            )));
        }

        if let Ok(docker_host) = std::env::var("DOCKER_HOST") {
            info!("Using DOCKER_HOST: {}", docker_host);
            return Ok(Docker::connect_with_local_defaults()?);
        }

        for socket_path in Self::docker_socket_paths() {
            if !std::path::Path::new(&socket_path).exists() {
                continue;
            }
            info!("Found Docker socket at: {}", socket_path);
            match Docker::connect_with_socket(&socket_path, SOCKET_TIMEOUT_SECS, API_DEFAULT_VERSION) {
                Ok(docker) => return Ok(docker),
                Err(e) => warn!("Failed to connect to Docker socket {}: {}", socket_path, e),
            }
        }

        warn!("No Docker socket found, trying default connection");
        Ok(Docker::connect_with_local_defaults()?)
    }

    fn docker_socket_paths() -> Vec<String> {
        let mut paths = Vec::new();

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                // Docker Desktop, then Colima
                paths.push(format!("{home}/.docker/run/docker.sock"));
                paths.push(format!("{home}/.colima/default/docker.sock"));
            }
        }

        paths.push("/var/run/docker.sock".to_string());

        // Rootless Docker
        if let Ok(xdg_runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            paths.push(format!("{xdg_runtime_dir}/docker.sock"));
        }

        paths
    }

    /// Container lifecycle events translated into machine events.
    ///
    /// Transport errors on the event feed are logged and end the stream.
    pub fn machine_events(&self) -> BoxStream<'static, MachineEvent> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let dev_label = self.dev_label.clone();
        self.docker
            .events(Some(options))
            .take_while(|result| {
                if let Err(e) = result {
                    warn!("Docker event feed failed: {}", e);
                }
                futures_util::future::ready(result.is_ok())
            })
            .filter_map(move |result| {
                let event = result.ok().and_then(|message| machine_event(&message, &dev_label));
                futures_util::future::ready(event)
            })
            .boxed()
    }
}

fn is_dev(labels: Option<&HashMap<String, String>>, dev_label: &str) -> bool {
    labels
        .and_then(|labels| labels.get(dev_label))
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn event_type(action: &str) -> MachineEventType {
    match action {
        "start" => MachineEventType::Running,
        "die" | "stop" | "kill" => MachineEventType::Stopped,
        "destroy" => MachineEventType::Destroyed,
        _ => MachineEventType::Other,
    }
}

/// Translate a Docker container event; events without an actor id are dropped
pub fn machine_event(message: &EventMessage, dev_label: &str) -> Option<MachineEvent> {
    let actor = message.actor.as_ref()?;
    let container_id = actor.id.clone()?;
    let attributes = actor.attributes.as_ref();

    let machine_id = attributes
        .and_then(|attrs| attrs.get("name"))
        .cloned()
        .unwrap_or_else(|| container_id.clone());

    Some(MachineEvent {
        machine_id,
        event_type: event_type(message.action.as_deref().unwrap_or_default()),
        is_dev: is_dev(attributes, dev_label),
        container_id,
    })
}

fn output_bytes(output: LogOutput) -> Vec<u8> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => message.to_vec(),
    }
}

impl ExecBackend for ContainerManager {
    fn create_exec<'a>(
        &'a self,
        container_id: &'a str,
        attach_output: bool,
        argv: Vec<String>,
    ) -> BoxFuture<'a, Result<String, ContainerError>> {
        Box::pin(async move {
            let options = CreateExecOptions {
                attach_stdout: Some(attach_output),
                attach_stderr: Some(attach_output),
                cmd: Some(argv),
                ..Default::default()
            };
            let created = self
                .docker
                .create_exec(container_id, options)
                .await
                .map_err(|e| ContainerError::from_lookup(container_id, e))?;
            debug!("Created exec {} in container {}", created.id, container_id);
            Ok(created.id)
        })
    }

    fn start_exec<'a>(
        &'a self,
        exec_id: &'a str,
        detach: bool,
    ) -> BoxFuture<'a, Result<ExecOutput, ContainerError>> {
        Box::pin(async move {
            let options = StartExecOptions {
                detach,
                ..Default::default()
            };
            match self.docker.start_exec(exec_id, Some(options)).await? {
                StartExecResults::Detached => Ok(ExecOutput::Detached),
                StartExecResults::Attached { output, .. } => Ok(ExecOutput::Attached(
                    output
                        .map(|chunk| chunk.map(output_bytes).map_err(ContainerError::from))
                        .boxed(),
                )),
            }
        })
    }
}

impl MachineRegistry for ContainerManager {
    fn machine<'a>(&'a self, machine_id: &'a str) -> BoxFuture<'a, Result<MachineInfo, ContainerError>> {
        Box::pin(async move {
            let container = self
                .docker
                .inspect_container(machine_id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| ContainerError::from_lookup(machine_id, e))?;

            let container_id = container.id.ok_or_else(|| {
                ContainerError::OperationFailed(format!("container {machine_id} has no id"))
            })?;
            let labels = container.config.as_ref().and_then(|c| c.labels.as_ref());

            Ok(MachineInfo {
                machine_id: machine_id.to_string(),
                container_id,
                is_dev: is_dev(labels, &self.dev_label),
            })
        })
    }
}
