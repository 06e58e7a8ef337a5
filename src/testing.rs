//! In-crate test doubles for the runtime, model backend, sink and status seams.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{BackendError, RuntimeError, SinkError};
use crate::llm::{ChatTurn, ModelBackend, TokenStream};
use crate::project::ProjectId;
use crate::sandbox::{ContainerPresence, ContainerRuntime, ContainerSpec, ExecOutput};
use crate::sink::{ActionSink, CommandOutput};
use crate::status::{MemoryStatusStore, ProjectStatus, StatusStore};

#[derive(Default)]
struct RuntimeState {
    networks: Vec<String>,
    containers: HashMap<String, (ContainerPresence, Option<ContainerSpec>)>,
    create_calls: usize,
    start_calls: usize,
    network_create_calls: usize,
    inspect_failure: Option<String>,
    conflict_on_create: bool,
    race_network: bool,
    execs: Vec<(String, String, String)>,
    exec_output: Option<ExecOutput>,
    exec_delay: Option<std::time::Duration>,
}

/// In-memory container engine.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    fn with<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert(&self, name: &str, presence: ContainerPresence) {
        self.with(|s| s.containers.insert(name.to_string(), (presence, None)));
    }

    pub fn presence(&self, name: &str) -> ContainerPresence {
        self.with(|s| {
            s.containers
                .get(name)
                .map(|(p, _)| *p)
                .unwrap_or(ContainerPresence::Absent)
        })
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.with(|s| s.containers.get(name).and_then(|(_, spec)| spec.clone()))
    }

    pub fn create_calls(&self) -> usize {
        self.with(|s| s.create_calls)
    }

    pub fn start_calls(&self) -> usize {
        self.with(|s| s.start_calls)
    }

    pub fn network_create_calls(&self) -> usize {
        self.with(|s| s.network_create_calls)
    }

    /// Make every container inspection fail with a non-not-found error.
    pub fn fail_inspect(&self, message: &str) {
        self.with(|s| s.inspect_failure = Some(message.to_string()));
    }

    /// Simulate losing a create race: the container appears (stopped) and the
    /// create call reports a conflict.
    pub fn conflict_on_create(&self) {
        self.with(|s| s.conflict_on_create = true);
    }

    /// Network inspection says absent but creation reports a conflict.
    pub fn race_network_creation(&self) {
        self.with(|s| s.race_network = true);
    }

    pub fn set_exec_output(&self, output: ExecOutput) {
        self.with(|s| s.exec_output = Some(output));
    }

    /// Make every exec take `delay` before returning.
    pub fn set_exec_delay(&self, delay: std::time::Duration) {
        self.with(|s| s.exec_delay = Some(delay));
    }

    /// `(container, command, cwd)` for every exec, in call order.
    pub fn execs(&self) -> Vec<(String, String, String)> {
        self.with(|s| s.execs.clone())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn network_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.with(|s| !s.race_network && s.networks.iter().any(|n| n == name)))
    }

    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.with(|s| {
            s.network_create_calls += 1;
            if s.race_network || s.networks.iter().any(|n| n == name) {
                return Err(RuntimeError::Conflict {
                    kind: "network",
                    name: name.to_string(),
                });
            }
            s.networks.push(name.to_string());
            Ok(())
        })
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerPresence, RuntimeError> {
        self.with(|s| {
            if let Some(message) = &s.inspect_failure {
                return Err(RuntimeError::Api {
                    operation: "inspect_container",
                    target: name.to_string(),
                    message: message.clone(),
                });
            }
            Ok(s.containers
                .get(name)
                .map(|(p, _)| *p)
                .unwrap_or(ContainerPresence::Absent))
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.with(|s| {
            s.create_calls += 1;
            if s.conflict_on_create || s.containers.contains_key(&spec.name) {
                s.containers
                    .entry(spec.name.clone())
                    .or_insert((ContainerPresence::Stopped, None));
                return Err(RuntimeError::Conflict {
                    kind: "container",
                    name: spec.name.clone(),
                });
            }
            s.containers.insert(
                spec.name.clone(),
                (ContainerPresence::Stopped, Some(spec.clone())),
            );
            Ok(())
        })
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.with(|s| {
            s.start_calls += 1;
            match s.containers.get_mut(name) {
                Some((presence, _)) => {
                    *presence = ContainerPresence::Running;
                    Ok(())
                }
                None => Err(RuntimeError::NotFound {
                    kind: "container",
                    name: name.to_string(),
                }),
            }
        })
    }

    async fn exec(&self, name: &str, command: &str, cwd: &str) -> Result<ExecOutput, RuntimeError> {
        if let Some(delay) = self.with(|s| s.exec_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            s.execs
                .push((name.to_string(), command.to_string(), cwd.to_string()));
            Ok(s.exec_output.clone().unwrap_or(ExecOutput {
                stdout: "ok".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }))
        })
    }
}

/// Model backend replaying a fixed reply.
pub struct ScriptedBackend {
    fragments: Vec<String>,
    reject: Mutex<Option<BackendError>>,
    fail_after: Mutex<Option<BackendError>>,
    requests: Mutex<Vec<(String, Vec<ChatTurn>)>>,
}

impl ScriptedBackend {
    pub fn fragments(fragments: Vec<String>) -> Self {
        Self {
            fragments,
            reject: Mutex::new(None),
            fail_after: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the initial request.
    pub fn rejecting(error: BackendError) -> Self {
        let backend = Self::fragments(Vec::new());
        *backend.reject.lock().unwrap() = Some(error);
        backend
    }

    /// Yield `fragments`, then fail the stream.
    pub fn failing_after(fragments: Vec<String>, error: BackendError) -> Self {
        let backend = Self::fragments(fragments);
        *backend.fail_after.lock().unwrap() = Some(error);
        backend
    }

    pub fn last_request(&self) -> Option<(String, Vec<ChatTurn>)> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, BackendError> {
        self.requests
            .lock()
            .unwrap()
            .push((system.to_string(), turns.to_vec()));

        if let Some(error) = self.reject.lock().unwrap().take() {
            return Err(error);
        }

        let mut items: Vec<Result<String, BackendError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(error) = self.fail_after.lock().unwrap().take() {
            items.push(Err(error));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Write { path: String, content: String },
    Run(String),
}

/// Sink that records calls instead of touching anything.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail_command: Option<String>,
}

impl RecordingSink {
    /// Commands equal to `command` exit non-zero.
    pub fn failing_on(command: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_command: Some(command.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn write_file(
        &self,
        _project: &ProjectId,
        path: &str,
        content: &str,
    ) -> Result<(), SinkError> {
        self.calls.lock().unwrap().push(SinkCall::Write {
            path: path.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn run_command(
        &self,
        _project: &ProjectId,
        command: &str,
        _cwd: Option<&str>,
    ) -> Result<CommandOutput, SinkError> {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Run(command.to_string()));
        if self.fail_command.as_deref() == Some(command) {
            return Err(SinkError::CommandFailed {
                command: command.to_string(),
                exit_code: 1,
                stderr: "failed".to_string(),
            });
        }
        Ok(CommandOutput {
            stdout: "ok".to_string(),
            stderr: String::new(),
        })
    }
}

/// Status store that keeps every write for sequence assertions.
#[derive(Default)]
pub struct RecordingStatusStore {
    inner: MemoryStatusStore,
    history: Mutex<HashMap<ProjectId, Vec<ProjectStatus>>>,
}

impl RecordingStatusStore {
    pub fn history(&self, project: &ProjectId) -> Vec<ProjectStatus> {
        self.history
            .lock()
            .unwrap()
            .get(project)
            .cloned()
            .unwrap_or_default()
    }

    pub fn last(&self, project: &ProjectId) -> Option<ProjectStatus> {
        self.history(project).last().copied()
    }
}

#[async_trait]
impl StatusStore for RecordingStatusStore {
    async fn set_status(&self, project: &ProjectId, status: ProjectStatus) -> anyhow::Result<()> {
        self.history
            .lock()
            .unwrap()
            .entry(project.clone())
            .or_default()
            .push(status);
        self.inner.set_status(project, status).await
    }

    async fn status(&self, project: &ProjectId) -> anyhow::Result<ProjectStatus> {
        self.inner.status(project).await
    }

    async fn set_url(&self, project: &ProjectId, url: &str) -> anyhow::Result<()> {
        self.inner.set_url(project, url).await
    }

    async fn url(&self, project: &ProjectId) -> anyhow::Result<Option<String>> {
        self.inner.url(project).await
    }
}
