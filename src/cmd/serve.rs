//! `nativex serve`: HTTP API plus dispatcher workers in one process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use nativex::config::{NativexConfig, SinkKind};
use nativex::db::DbHandle;
use nativex::generation::{GenerationWorker, load_system_prompt};
use nativex::llm::OpenAiCompatBackend;
use nativex::queue::{Dispatcher, JobQueue};
use nativex::sandbox::{ContainerRuntime, DockerRuntime, SandboxManager};
use nativex::server::{AppState, ServerConfig, start_server};
use nativex::sink::{ActionSink, LocalSink, SandboxSink};
use nativex::status::{DbStatusStore, StatusStore};

pub async fn cmd_serve(
    config: &NativexConfig,
    port: Option<u16>,
    workers: Option<usize>,
    dev: bool,
) -> Result<()> {
    let db = DbHandle::open(&config.database.path).context("Failed to open database")?;
    let status: Arc<dyn StatusStore> = Arc::new(DbStatusStore::new(db.clone()));

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect().context("Failed to connect to Docker")?);
    let sandbox = Arc::new(SandboxManager::new(
        Arc::clone(&runtime),
        config.sandbox.clone(),
    ));

    let timeout = config.actions.command_timeout();
    let sink: Arc<dyn ActionSink> = match config.actions.sink {
        SinkKind::Container => Arc::new(SandboxSink::new(
            runtime,
            config.sandbox.clone(),
            timeout,
        )),
        SinkKind::Local => Arc::new(LocalSink::new(
            config.sandbox.projects_root.clone(),
            timeout,
        )),
    };

    if config.model.api_key().is_none() {
        warn!(
            env = %config.model.api_key_env,
            "model API key not set; requests will be sent unauthenticated"
        );
    }
    let backend = Arc::new(OpenAiCompatBackend::from_settings(&config.model));
    let system_prompt = load_system_prompt(&config.model)?;
    let generator = Arc::new(GenerationWorker::new(
        backend,
        sink,
        Arc::new(db.clone()),
        Arc::clone(&status),
        system_prompt.into_owned(),
    ));

    let queue = JobQueue::new(db.clone());
    let requeued = queue
        .requeue_interrupted()
        .await
        .context("Failed to requeue interrupted jobs")?;
    if requeued > 0 {
        info!(count = requeued, "requeued jobs interrupted by a previous shutdown");
    }

    let dispatcher = Arc::new(Dispatcher::new(
        queue,
        sandbox,
        generator,
        Arc::clone(&status),
        config.dispatcher.poll_interval(),
    ));

    let cancel = CancellationToken::new();
    let worker_count = workers.unwrap_or(config.dispatcher.workers);
    let handles = dispatcher.spawn_workers(worker_count, cancel.clone());
    info!(workers = handles.len(), sink = ?config.actions.sink, "dispatcher started");

    let state = Arc::new(AppState {
        db,
        dispatcher,
        status,
    });
    let server_config = ServerConfig {
        host: if dev {
            "0.0.0.0".to_string()
        } else {
            config.server.host.clone()
        },
        port: port.unwrap_or(config.server.port),
        dev_mode: dev,
    };

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "failed to listen for Ctrl+C");
                    }
                    info!("shutting down");
                }
                _ = cancel.cancelled() => {}
            }
            cancel.cancel();
        }
    };

    let served = start_server(server_config, state, shutdown).await;
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "dispatcher worker panicked");
        }
    }
    served
}
