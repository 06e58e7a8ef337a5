use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::exec::StartExecResults;
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig, NetworkCreateRequest};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, InspectNetworkOptions,
    StartContainerOptions,
};
use futures_util::StreamExt;
use tracing::debug;

use super::runtime::{ContainerPresence, ContainerRuntime, ContainerSpec, ExecOutput};
use crate::errors::RuntimeError;

/// `ContainerRuntime` backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn status_code(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn classify(
    error: BollardError,
    kind: &'static str,
    operation: &'static str,
    target: &str,
) -> RuntimeError {
    match status_code(&error) {
        Some(404) => RuntimeError::NotFound {
            kind,
            name: target.to_string(),
        },
        Some(409) => RuntimeError::Conflict {
            kind,
            name: target.to_string(),
        },
        _ => RuntimeError::Api {
            operation,
            target: target.to_string(),
            message: error.to_string(),
        },
    }
}

/// Inspect result with a missing object mapped to `None`.
fn found<T>(
    result: Result<T, BollardError>,
    kind: &'static str,
    operation: &'static str,
    target: &str,
) -> Result<Option<T>, RuntimeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let err = classify(e, kind, operation, target);
            if err.is_not_found() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let result = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await;
        Ok(found(result, "network", "inspect_network", name)?.is_some())
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| classify(e, "network", "create_network", name))?;
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerPresence, RuntimeError> {
        let result = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await;
        let Some(info) = found(result, "container", "inspect_container", name)? else {
            return Ok(ContainerPresence::Absent);
        };
        let running = info.state.and_then(|s| s.running).unwrap_or(false);
        Ok(if running {
            ContainerPresence::Running
        } else {
            ContainerPresence::Stopped
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.binds.clone()),
                network_mode: Some(spec.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                body,
            )
            .await
            .map_err(|e| classify(e, "container", "create_container", &spec.name))?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already started
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(classify(e, "container", "start_container", name)),
        }
    }

    async fn exec(&self, name: &str, command: &str, cwd: &str) -> Result<ExecOutput, RuntimeError> {
        let created = self
            .docker
            .create_exec(
                name,
                ExecConfig {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    working_dir: Some(cwd.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| classify(e, "container", "create_exec", name))?;

        let mut output = ExecOutput::default();
        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| classify(e, "container", "start_exec", name))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(frame) = stream.next().await {
                    match frame.map_err(|e| classify(e, "container", "exec_output", name))? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdErr { message } => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
            StartExecResults::Detached => {
                debug!(container = name, "exec started detached; no output captured");
            }
        }

        let inspected = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| classify(e, "container", "inspect_exec", name))?;
        output.exit_code = inspected.exit_code;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: "x".to_string(),
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(server_error(404), "container", "inspect_container", "editor-a");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_conflict() {
        let err = classify(server_error(409), "network", "create_network", "nativex-net");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_missing_object_is_not_an_error() {
        let missing: Result<(), _> = Err(server_error(404));
        assert_eq!(found(missing, "network", "inspect_network", "nativex-net").unwrap(), None);

        let present: Result<u8, BollardError> = Ok(7);
        assert_eq!(found(present, "network", "inspect_network", "nativex-net").unwrap(), Some(7));

        let broken: Result<(), _> = Err(server_error(500));
        assert!(matches!(
            found(broken, "container", "inspect_container", "editor-a"),
            Err(RuntimeError::Api { .. })
        ));
    }

    #[test]
    fn test_classify_other_is_api_error() {
        let err = classify(server_error(500), "container", "start_container", "editor-a");
        match err {
            RuntimeError::Api { operation, target, .. } => {
                assert_eq!(operation, "start_container");
                assert_eq!(target, "editor-a");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }
}
