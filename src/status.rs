//! Per-project status register polled by API consumers.
//!
//! Records live under `project:{id}:status` and `project:{id}:url`. A project
//! with no record reads as `PENDING`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DbHandle;
use crate::project::ProjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Pending,
    Booting,
    Generating,
    Ready,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::Booting => "BOOTING",
            ProjectStatus::Generating => "GENERATING",
            ProjectStatus::Ready => "READY",
            ProjectStatus::Error => "ERROR",
        }
    }

    /// `READY` or `ERROR`: no run is in progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectStatus::Ready | ProjectStatus::Error)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProjectStatus::Pending),
            "BOOTING" => Ok(ProjectStatus::Booting),
            "GENERATING" => Ok(ProjectStatus::Generating),
            "READY" => Ok(ProjectStatus::Ready),
            "ERROR" => Ok(ProjectStatus::Error),
            other => anyhow::bail!("Unknown project status: {}", other),
        }
    }
}

pub fn status_key(project: &ProjectId) -> String {
    format!("project:{}:status", project)
}

pub fn url_key(project: &ProjectId) -> String {
    format!("project:{}:url", project)
}

fn parse_stored(project: &ProjectId, raw: Option<String>) -> ProjectStatus {
    match raw {
        None => ProjectStatus::Pending,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(project = %project, value = %raw, "unreadable stored status; reporting PENDING");
            ProjectStatus::Pending
        }),
    }
}

/// Shared status and URL register. Writes overwrite.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_status(&self, project: &ProjectId, status: ProjectStatus) -> Result<()>;

    /// `PENDING` when nothing has been recorded.
    async fn status(&self, project: &ProjectId) -> Result<ProjectStatus>;

    async fn set_url(&self, project: &ProjectId, url: &str) -> Result<()>;

    async fn url(&self, project: &ProjectId) -> Result<Option<String>>;
}

/// In-process register.
#[derive(Default)]
pub struct MemoryStatusStore {
    entries: DashMap<String, String>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set_status(&self, project: &ProjectId, status: ProjectStatus) -> Result<()> {
        self.entries
            .insert(status_key(project), status.as_str().to_string());
        Ok(())
    }

    async fn status(&self, project: &ProjectId) -> Result<ProjectStatus> {
        let raw = self
            .entries
            .get(&status_key(project))
            .map(|v| v.value().clone());
        Ok(parse_stored(project, raw))
    }

    async fn set_url(&self, project: &ProjectId, url: &str) -> Result<()> {
        self.entries.insert(url_key(project), url.to_string());
        Ok(())
    }

    async fn url(&self, project: &ProjectId) -> Result<Option<String>> {
        Ok(self.entries.get(&url_key(project)).map(|v| v.value().clone()))
    }
}

/// Register persisted in the database's `kv` table, visible to every process
/// sharing the file.
#[derive(Clone)]
pub struct DbStatusStore {
    db: DbHandle,
}

impl DbStatusStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StatusStore for DbStatusStore {
    async fn set_status(&self, project: &ProjectId, status: ProjectStatus) -> Result<()> {
        let key = status_key(project);
        self.db
            .call(move |db| db.kv_set(&key, status.as_str()))
            .await
    }

    async fn status(&self, project: &ProjectId) -> Result<ProjectStatus> {
        let key = status_key(project);
        let raw = self.db.call(move |db| db.kv_get(&key)).await?;
        Ok(parse_stored(project, raw))
    }

    async fn set_url(&self, project: &ProjectId, url: &str) -> Result<()> {
        let key = url_key(project);
        let url = url.to_string();
        self.db.call(move |db| db.kv_set(&key, &url)).await
    }

    async fn url(&self, project: &ProjectId) -> Result<Option<String>> {
        let key = url_key(project);
        self.db.call(move |db| db.kv_get(&key)).await
    }
}
