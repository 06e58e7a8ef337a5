use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::llm::{ChatTurn, Role};
use crate::project::ProjectId;
use crate::queue::{Job, JobState};

/// Async-safe handle to the database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, so synchronous SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open the database at `path`, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self::new(Db::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Db::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// One stored conversation turn.
#[derive(Debug, Clone, Serialize)]
pub struct PromptRecord {
    pub id: i64,
    pub project_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// One line of a project's action log.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: i64,
    pub project_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        // The server and CLI processes share one file.
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS prompts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS actions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL,
                    activate INTEGER NOT NULL DEFAULT 0,
                    state TEXT NOT NULL DEFAULT 'queued',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_prompts_project ON prompts(project_id, id);
                CREATE INDEX IF NOT EXISTS idx_actions_project ON actions(project_id, id);
                CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state, id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Conversation ──────────────────────────────────────────────────

    pub fn append_turn(&self, project: &ProjectId, role: Role, content: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO prompts (project_id, role, content) VALUES (?1, ?2, ?3)",
                params![project.as_str(), role.as_str(), content],
            )
            .context("Failed to insert prompt")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_prompts(&self, project: &ProjectId) -> Result<Vec<PromptRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, role, content, created_at FROM prompts
                 WHERE project_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_prompts")?;
        let rows = stmt
            .query_map(params![project.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query prompts")?;

        let mut prompts = Vec::new();
        for row in rows {
            let (id, project_id, role, content, created_at) =
                row.context("Failed to read prompt row")?;
            prompts.push(PromptRecord {
                id,
                project_id,
                role: Role::from_str(&role)?,
                content,
                created_at,
            });
        }
        Ok(prompts)
    }

    /// Prior turns of a project's conversation, oldest first.
    pub fn find_turns(&self, project: &ProjectId) -> Result<Vec<ChatTurn>> {
        Ok(self
            .list_prompts(project)?
            .into_iter()
            .map(|p| ChatTurn {
                role: p.role,
                content: p.content,
            })
            .collect())
    }

    // ── Action log ────────────────────────────────────────────────────

    pub fn record_action(&self, project: &ProjectId, content: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO actions (project_id, content) VALUES (?1, ?2)",
                params![project.as_str(), content],
            )
            .context("Failed to insert action")?;
        Ok(())
    }

    pub fn list_actions(&self, project: &ProjectId) -> Result<Vec<ActionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, project_id, content, created_at FROM actions
                 WHERE project_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_actions")?;
        let rows = stmt
            .query_map(params![project.as_str()], |row| {
                Ok(ActionRecord {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    content: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .context("Failed to query actions")?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row.context("Failed to read action row")?);
        }
        Ok(actions)
    }

    // ── Key-value register ────────────────────────────────────────────

    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM kv WHERE key = ?1")
            .context("Failed to prepare kv_get")?;
        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("Failed to query kv")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read kv row")?)),
            None => Ok(None),
        }
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .context("Failed to upsert kv")?;
        Ok(())
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    const JOB_COLUMNS: &'static str =
        "id, project_id, activate, state, attempts, error, created_at, updated_at";

    pub fn insert_job(&self, project: &ProjectId, activate: bool) -> Result<Job> {
        self.conn
            .execute(
                "INSERT INTO jobs (project_id, activate) VALUES (?1, ?2)",
                params![project.as_str(), activate],
            )
            .context("Failed to insert job")?;
        let id = self.conn.last_insert_rowid();
        self.get_job(id)?.context("Job not found after insert")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", Self::JOB_COLUMNS);
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare get_job")?;
        let mut rows = stmt
            .query_map(params![id], JobRow::from_row)
            .context("Failed to query job")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read job row")?.into_job()?)),
            None => Ok(None),
        }
    }

    /// Atomically move the oldest queued job to `running` and return it.
    /// A single statement, so two consumers can never claim the same job.
    /// Projects that already have a running job are skipped, which keeps at
    /// most one job per project in flight.
    pub fn claim_next_job(&self) -> Result<Option<Job>> {
        let sql = format!(
            "UPDATE jobs SET state = 'running', attempts = attempts + 1, updated_at = datetime('now')
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE state = 'queued'
                   AND project_id NOT IN (SELECT project_id FROM jobs WHERE state = 'running')
                 ORDER BY id LIMIT 1
             )
             RETURNING {}",
            Self::JOB_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare claim_next_job")?;
        let mut rows = stmt
            .query_map([], JobRow::from_row)
            .context("Failed to claim job")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read claimed job")?.into_job()?)),
            None => Ok(None),
        }
    }

    pub fn complete_job(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET state = 'done', error = NULL, updated_at = datetime('now') WHERE id = ?1",
                params![id],
            )
            .context("Failed to complete job")?;
        Ok(())
    }

    pub fn fail_job(&self, id: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET state = 'failed', error = ?2, updated_at = datetime('now') WHERE id = ?1",
                params![id, error],
            )
            .context("Failed to mark job failed")?;
        Ok(())
    }

    /// Whether the project has a job that is queued or running.
    pub fn has_active_job(&self, project: &ProjectId) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE project_id = ?1 AND state IN ('queued', 'running')",
                params![project.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count active jobs")?;
        Ok(count > 0)
    }

    /// Put jobs left `running` by a dead process back in the queue.
    pub fn requeue_running_jobs(&self) -> Result<usize> {
        let n = self
            .conn
            .execute(
                "UPDATE jobs SET state = 'queued', updated_at = datetime('now') WHERE state = 'running'",
                [],
            )
            .context("Failed to requeue running jobs")?;
        Ok(n)
    }

    pub fn list_jobs(&self, project: &ProjectId) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE project_id = ?1 ORDER BY id",
            Self::JOB_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_jobs")?;
        let rows = stmt
            .query_map(params![project.as_str()], JobRow::from_row)
            .context("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.context("Failed to read job row")?.into_job()?);
        }
        Ok(jobs)
    }
}

/// Intermediate row struct for reading jobs before validating the id and state.
struct JobRow {
    id: i64,
    project_id: String,
    activate: bool,
    state: String,
    attempts: i64,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            activate: row.get(2)?,
            state: row.get(3)?,
            attempts: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            project_id: ProjectId::new(self.project_id).context("Invalid project id in jobs")?,
            activate: self.activate,
            state: JobState::from_str(&self.state)?,
            attempts: self.attempts,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Conversation persistence consumed by the generation worker.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All prior turns, oldest first.
    async fn find_all(&self, project: &ProjectId) -> Result<Vec<ChatTurn>>;

    async fn append(&self, project: &ProjectId, role: Role, content: &str) -> Result<()>;

    async fn record_action(&self, project: &ProjectId, content: &str) -> Result<()>;
}

#[async_trait]
impl ConversationStore for DbHandle {
    async fn find_all(&self, project: &ProjectId) -> Result<Vec<ChatTurn>> {
        let project = project.clone();
        self.call(move |db| db.find_turns(&project)).await
    }

    async fn append(&self, project: &ProjectId, role: Role, content: &str) -> Result<()> {
        let project = project.clone();
        let content = content.to_string();
        self.call(move |db| db.append_turn(&project, role, &content).map(|_| ()))
            .await
    }

    async fn record_action(&self, project: &ProjectId, content: &str) -> Result<()> {
        let project = project.clone();
        let content = content.to_string();
        self.call(move |db| db.record_action(&project, &content)).await
    }
}
