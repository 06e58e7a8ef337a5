//! Durable job queue and the dispatcher that drains it.
//!
//! Jobs live in the `jobs` table. A worker claims one with a single atomic
//! update, so each job has exactly one consumer; jobs still `running` when a
//! process dies are re-queued on the next startup, which makes delivery
//! at-least-once.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::db::DbHandle;
use crate::generation::GenerationWorker;
use crate::project::ProjectId;
use crate::sandbox::SandboxManager;
use crate::status::{ProjectStatus, StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            other => anyhow::bail!("Unknown job state: {}", other),
        }
    }
}

/// One spawn request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub project_id: ProjectId,
    /// Only bring the environment up; skip generation.
    pub activate: bool,
    pub state: JobState,
    pub attempts: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct JobQueue {
    db: DbHandle,
}

impl JobQueue {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn enqueue(&self, project: &ProjectId, activate: bool) -> Result<Job> {
        let project = project.clone();
        self.db
            .call(move |db| db.insert_job(&project, activate))
            .await
    }

    pub async fn has_active(&self, project: &ProjectId) -> Result<bool> {
        let project = project.clone();
        self.db.call(move |db| db.has_active_job(&project)).await
    }

    pub async fn claim_next(&self) -> Result<Option<Job>> {
        self.db.call(|db| db.claim_next_job()).await
    }

    pub async fn complete(&self, id: i64) -> Result<()> {
        self.db.call(move |db| db.complete_job(id)).await
    }

    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let error = error.to_string();
        self.db.call(move |db| db.fail_job(id, &error)).await
    }

    /// Re-queue jobs a previous process left `running`.
    pub async fn requeue_interrupted(&self) -> Result<usize> {
        self.db.call(|db| db.requeue_running_jobs()).await
    }
}

/// Queue a job and mark the project `PENDING`.
///
/// While an earlier job for the project is queued or running and its status
/// has not settled, that job owns the status and it is left alone; the new job
/// reports its own progress once claimed. The status is written before the job
/// row exists so a worker cannot claim the new job ahead of the write.
pub async fn enqueue_job(
    queue: &JobQueue,
    status: &dyn StatusStore,
    project: &ProjectId,
    activate: bool,
) -> Result<Job> {
    let current = status.status(project).await?;
    if !queue.has_active(project).await? || current.is_terminal() {
        status
            .set_status(project, ProjectStatus::Pending)
            .await
            .context("Failed to set PENDING status")?;
    } else {
        debug!(project = %project, status = %current, "project busy; status left as is");
    }
    queue.enqueue(project, activate).await
}

/// Moves jobs through environment start, readiness and generation.
pub struct Dispatcher {
    queue: JobQueue,
    sandbox: Arc<SandboxManager>,
    generator: Arc<GenerationWorker>,
    status: Arc<dyn StatusStore>,
    wake: Notify,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: JobQueue,
        sandbox: Arc<SandboxManager>,
        generator: Arc<GenerationWorker>,
        status: Arc<dyn StatusStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            sandbox,
            generator,
            status,
            wake: Notify::new(),
            poll_interval,
        }
    }

    /// Persist a job, mark the project `PENDING` and wake an idle worker.
    pub async fn enqueue(&self, project: &ProjectId, activate: bool) -> Result<Job> {
        let job = enqueue_job(&self.queue, self.status.as_ref(), project, activate).await?;
        self.wake.notify_one();
        info!(job_id = job.id, project = %project, activate, "job enqueued");
        Ok(job)
    }

    /// Start `count` worker loops. Each finishes its current job before
    /// honouring cancellation.
    pub fn spawn_workers(self: &Arc<Self>, count: usize, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|worker| {
                let dispatcher = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.worker_loop(worker, cancel).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, cancel: CancellationToken) {
        debug!(worker, "dispatcher worker started");
        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(worker, error = %format!("{e:#}"), "dispatcher error"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(worker, "dispatcher worker stopped");
    }

    /// Claim and process one job. Returns `false` when the queue was empty.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };

        let span = info_span!("job", job_id = job.id, project = %job.project_id);
        let result = self.process_job(&job).instrument(span).await;
        match result {
            Ok(()) => self.queue.complete(job.id).await?,
            Err(e) => {
                let message = format!("{e:#}");
                warn!(job_id = job.id, project = %job.project_id, error = %message, "job failed");
                if let Err(status_err) = self
                    .status
                    .set_status(&job.project_id, ProjectStatus::Error)
                    .await
                {
                    error!(project = %job.project_id, error = %status_err, "failed to record ERROR status");
                }
                self.queue.fail(job.id, &message).await?;
            }
        }
        Ok(true)
    }

    async fn process_job(&self, job: &Job) -> Result<()> {
        let project = &job.project_id;
        self.status
            .set_status(project, ProjectStatus::Booting)
            .await
            .context("Failed to set BOOTING status")?;

        let env = self
            .sandbox
            .start_environment(project)
            .await
            .context("Failed to start environment")?;
        self.status
            .set_url(project, &env.url)
            .await
            .context("Failed to store environment URL")?;
        info!(url = %env.url, created = env.created, "environment running");

        if !self.sandbox.wait_for_init_default(project).await {
            anyhow::bail!(
                "Timed out after {}s waiting for project init",
                self.sandbox.settings().init_timeout_secs
            );
        }

        if job.activate {
            self.status
                .set_status(project, ProjectStatus::Ready)
                .await
                .context("Failed to set READY status")?;
            return Ok(());
        }

        // Generation reports its own failures through status; the job is done
        // once handed off.
        if let Err(e) = self.generator.run(project).await {
            debug!(error = %e, "generation failed; reported through status");
        }
        Ok(())
    }
}
