//! Applying resolved actions to a project's sandbox.
//!
//! File writes always land in the host-side project directory, which is
//! bind-mounted into the container. Where commands run depends on the sink:
//! `SandboxSink` execs inside the container, `LocalSink` spawns on the host.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::SandboxSettings;
use crate::errors::SinkError;
use crate::project::ProjectId;
use crate::sandbox::ContainerRuntime;

/// Output of a successfully completed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout, or stderr when the command printed nothing to stdout.
    pub fn summary(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Write `content` to `path` (relative to the project root), replacing any
    /// existing file.
    async fn write_file(&self, project: &ProjectId, path: &str, content: &str)
    -> Result<(), SinkError>;

    /// Run `command` through `sh -c`. `cwd` is relative to the project root.
    async fn run_command(
        &self,
        project: &ProjectId,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SinkError>;
}

/// Resolve `relative` under `root`, rejecting absolute paths and any `..`.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, SinkError> {
    let rel = Path::new(relative);
    if relative.trim().is_empty() {
        return Err(SinkError::InvalidPath(relative.to_string()));
    }

    let mut joined = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SinkError::InvalidPath(relative.to_string()));
            }
        }
    }

    if joined == root {
        return Err(SinkError::InvalidPath(relative.to_string()));
    }
    Ok(joined)
}

async fn write_under(root: &Path, relative: &str, content: &str) -> Result<PathBuf, SinkError> {
    let path = safe_join(root, relative)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

fn check_exit(
    command: &str,
    exit_code: Option<i64>,
    stdout: String,
    stderr: String,
) -> Result<CommandOutput, SinkError> {
    match exit_code {
        Some(0) | None => Ok(CommandOutput { stdout, stderr }),
        Some(code) => Err(SinkError::CommandFailed {
            command: command.to_string(),
            exit_code: code,
            stderr: if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            },
        }),
    }
}

/// Writes through the bind mount and runs commands inside the project's container.
///
/// A command that exceeds the timeout is reported as `CommandTimedOut`, but
/// the exec itself is not killed and keeps running inside the container.
pub struct SandboxSink {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxSettings,
    command_timeout: Duration,
}

impl SandboxSink {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        settings: SandboxSettings,
        command_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            settings,
            command_timeout,
        }
    }

    fn container_cwd(&self, cwd: Option<&str>) -> Result<String, SinkError> {
        let root = Path::new(&self.settings.mount_target);
        let dir = match cwd {
            Some(rel) => safe_join(root, rel)?,
            None => root.to_path_buf(),
        };
        Ok(dir.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl ActionSink for SandboxSink {
    async fn write_file(
        &self,
        project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), SinkError> {
        let root = self.settings.projects_root.join(project.as_str());
        let written = write_under(&root, path, content).await?;
        debug!(project = %project, path = %written.display(), bytes = content.len(), "wrote file");
        Ok(())
    }

    async fn run_command(
        &self,
        project: &ProjectId,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SinkError> {
        let container = format!("{}{}", self.settings.container_prefix, project);
        let cwd = self.container_cwd(cwd)?;
        debug!(container = %container, command, cwd = %cwd, "exec in container");

        let output = timeout(
            self.command_timeout,
            self.runtime.exec(&container, command, &cwd),
        )
        .await
        .map_err(|_| SinkError::CommandTimedOut {
            command: command.to_string(),
            secs: self.command_timeout.as_secs(),
        })??;

        check_exit(command, output.exit_code, output.stdout, output.stderr)
    }
}

/// Runs everything on the host, inside the project directory.
pub struct LocalSink {
    projects_root: PathBuf,
    command_timeout: Duration,
}

impl LocalSink {
    pub fn new(projects_root: PathBuf, command_timeout: Duration) -> Self {
        Self {
            projects_root,
            command_timeout,
        }
    }
}

#[async_trait]
impl ActionSink for LocalSink {
    async fn write_file(
        &self,
        project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), SinkError> {
        let root = self.projects_root.join(project.as_str());
        write_under(&root, path, content).await?;
        Ok(())
    }

    async fn run_command(
        &self,
        project: &ProjectId,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SinkError> {
        let root = self.projects_root.join(project.as_str());
        let dir = match cwd {
            Some(rel) => safe_join(&root, rel)?,
            None => root,
        };

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SinkError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let output = match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| SinkError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(SinkError::CommandTimedOut {
                    command: command.to_string(),
                    secs: self.command_timeout.as_secs(),
                });
            }
        };

        check_exit(
            command,
            Some(output.status.code().map(i64::from).unwrap_or(-1)),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        )
    }
}
