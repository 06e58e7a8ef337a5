use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::routing::{project_url, routing_labels};
use super::runtime::{ContainerPresence, ContainerRuntime, ContainerSpec};
use crate::config::SandboxSettings;
use crate::errors::SandboxError;
use crate::project::ProjectId;

/// A started environment and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub url: String,
    pub container: String,
    /// The container did not exist before this call.
    pub created: bool,
}

/// Keeps exactly one running, network-attached, mounted container per project.
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxSettings,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn container_name(&self, project: &ProjectId) -> String {
        format!("{}{}", self.settings.container_prefix, project)
    }

    /// Host-side directory bind-mounted into the project's container.
    pub fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.settings.projects_root.join(project.as_str())
    }

    /// Create the shared network unless it exists. Losing a creation race to
    /// another caller counts as success.
    pub async fn ensure_network(&self) -> Result<(), SandboxError> {
        let name = &self.settings.network;
        if self.runtime.network_exists(name).await? {
            return Ok(());
        }

        info!(network = %name, "creating sandbox network");
        match self.runtime.create_network(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!(network = %name, "network created concurrently");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the project's host directory, world-writable so the container's
    /// user can write into it whatever its UID.
    pub async fn ensure_project_dir(&self, project: &ProjectId) -> Result<PathBuf, SandboxError> {
        let dir = self.project_dir(project);
        let to_err = |source| SandboxError::ProjectDir {
            path: dir.clone(),
            source,
        };

        if tokio::fs::try_exists(&dir).await.map_err(to_err)? {
            return Ok(dir);
        }

        tokio::fs::create_dir_all(&dir).await.map_err(to_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o777))
                .await
                .map_err(to_err)?;
        }
        debug!(project = %project, dir = %dir.display(), "created project directory");
        Ok(dir)
    }

    /// Make sure the project's container exists and runs.
    ///
    /// Running containers are returned as-is, stopped ones are started in place
    /// (never recreated, so their mounted state survives) and absent ones are
    /// created with mount, network and routing labels, then started.
    pub async fn start_environment(&self, project: &ProjectId) -> Result<Environment, SandboxError> {
        self.ensure_network().await?;
        let dir = self.ensure_project_dir(project).await?;

        let name = self.container_name(project);
        let url = project_url(project, &self.settings);

        let mut created = false;
        match self.runtime.inspect_container(&name).await? {
            ContainerPresence::Running => {
                debug!(container = %name, "container already running");
            }
            ContainerPresence::Stopped => {
                info!(container = %name, "starting stopped container");
                self.runtime.start_container(&name).await?;
            }
            ContainerPresence::Absent => {
                let spec = ContainerSpec {
                    name: name.clone(),
                    image: self.settings.image.clone(),
                    binds: vec![format!("{}:{}", dir.display(), self.settings.mount_target)],
                    network: self.settings.network.clone(),
                    labels: routing_labels(project, &self.settings),
                };

                info!(container = %name, image = %spec.image, "creating container");
                match self.runtime.create_container(&spec).await {
                    Ok(()) => created = true,
                    Err(e) if e.is_conflict() => {
                        warn!(container = %name, "container created concurrently; starting it");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.runtime.start_container(&name).await?;
            }
        }

        Ok(Environment {
            url,
            container: name,
            created,
        })
    }

    /// Poll for the init marker until it appears or `timeout` elapses.
    ///
    /// Returns `false` on timeout; never errors. Filesystem errors while
    /// checking count as "not there yet".
    pub async fn wait_for_init(
        &self,
        project: &ProjectId,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool {
        let marker = self.project_dir(project).join(&self.settings.init_marker);
        debug!(marker = %marker.display(), "waiting for init marker");

        let poll = async {
            let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
                    return;
                }
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(()) => {
                info!(project = %project, "project initialized");
                true
            }
            Err(_) => {
                warn!(project = %project, timeout_secs = timeout.as_secs(), "timed out waiting for project init");
                false
            }
        }
    }

    /// `wait_for_init` with the configured timeout and interval.
    pub async fn wait_for_init_default(&self, project: &ProjectId) -> bool {
        self.wait_for_init(
            project,
            self.settings.init_timeout(),
            self.settings.init_poll_interval(),
        )
        .await
    }
}
