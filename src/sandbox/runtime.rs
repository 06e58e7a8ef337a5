use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::RuntimeError;

/// What an inspection found for a named container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPresence {
    Running,
    Stopped,
    Absent,
}

/// Everything needed to create one sandbox container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `host:container` bind mounts.
    pub binds: Vec<String>,
    pub network: String,
    pub labels: HashMap<String, String>,
}

/// Captured output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
}

/// Abstraction over the container engine.
/// Real implementation: `DockerRuntime`. Test double: `testing::FakeRuntime`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Fails with `RuntimeError::Conflict` when the network already exists.
    async fn create_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Not-found is reported as `ContainerPresence::Absent`, never as an error.
    async fn inspect_container(&self, name: &str) -> Result<ContainerPresence, RuntimeError>;

    /// Fails with `RuntimeError::Conflict` when the name is taken.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Starting an already running container is not an error.
    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run `sh -c <command>` in `cwd` inside the container and wait for it.
    async fn exec(&self, name: &str, command: &str, cwd: &str) -> Result<ExecOutput, RuntimeError>;
}
