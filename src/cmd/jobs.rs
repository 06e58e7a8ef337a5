//! `nativex enqueue` and `nativex status`: queue and status access without a
//! running server.

use anyhow::{Context, Result};

use nativex::config::NativexConfig;
use nativex::db::DbHandle;
use nativex::project::ProjectId;
use nativex::queue::{JobQueue, enqueue_job};
use nativex::status::{DbStatusStore, StatusStore};

pub async fn cmd_enqueue(config: &NativexConfig, project: &str, activate: bool) -> Result<()> {
    let project = ProjectId::new(project)?;
    let db = DbHandle::open(&config.database.path).context("Failed to open database")?;

    let queue = JobQueue::new(db.clone());
    let job = enqueue_job(&queue, &DbStatusStore::new(db), &project, activate).await?;

    let kind = if activate { "activation" } else { "generation" };
    println!("Enqueued {} job {} for {}", kind, job.id, project);
    Ok(())
}

pub async fn cmd_status(config: &NativexConfig, project: &str) -> Result<()> {
    let project = ProjectId::new(project)?;
    let db = DbHandle::open(&config.database.path).context("Failed to open database")?;
    let store = DbStatusStore::new(db);

    let status = store.status(&project).await?;
    println!("{}: {}", project, status);
    if let Some(url) = store.url(&project).await? {
        println!("url: {}", url);
    }
    Ok(())
}
