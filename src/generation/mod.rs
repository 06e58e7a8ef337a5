//! One project's code-generation run.
//!
//! The model's streamed reply is fed through an `ArtifactParser` as it arrives,
//! and every completed action is applied to the sandbox before the next
//! fragment is read. A run either finishes with the full transcript stored as
//! an assistant turn and status `READY`, or stops at the first failure with
//! status `ERROR` and nothing stored.

mod prompt;

pub use prompt::{DEFAULT_SYSTEM_PROMPT, load_system_prompt};

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::artifact::{Action, ArtifactHeader, ArtifactParser};
use crate::db::ConversationStore;
use crate::errors::GenerationError;
use crate::llm::{ModelBackend, Role};
use crate::project::ProjectId;
use crate::sink::ActionSink;
use crate::status::{ProjectStatus, StatusStore};

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub actions_applied: usize,
    pub transcript_len: usize,
    pub artifact: Option<ArtifactHeader>,
}

pub struct GenerationWorker {
    backend: Arc<dyn ModelBackend>,
    sink: Arc<dyn ActionSink>,
    store: Arc<dyn ConversationStore>,
    status: Arc<dyn StatusStore>,
    system_prompt: String,
}

impl GenerationWorker {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        sink: Arc<dyn ActionSink>,
        store: Arc<dyn ConversationStore>,
        status: Arc<dyn StatusStore>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            sink,
            store,
            status,
            system_prompt: system_prompt.into(),
        }
    }

    /// Run generation for `project` and finalize its status. Never retries.
    pub async fn run(&self, project: &ProjectId) -> Result<GenerationOutcome, GenerationError> {
        let result = match self
            .status
            .set_status(project, ProjectStatus::Generating)
            .await
        {
            Ok(()) => self.generate(project).await,
            Err(e) => Err(GenerationError::Store(e)),
        };

        let result = match result {
            Ok(outcome) => match self.status.set_status(project, ProjectStatus::Ready).await {
                Ok(()) => Ok(outcome),
                Err(e) => Err(GenerationError::Store(e)),
            },
            Err(e) => Err(e),
        };

        match &result {
            Ok(outcome) => {
                info!(
                    project = %project,
                    actions = outcome.actions_applied,
                    artifact = outcome.artifact.as_ref().map(|a| a.title.as_str()).unwrap_or("-"),
                    "generation finished"
                );
            }
            Err(e) => {
                error!(project = %project, error = %e, "generation failed");
                if let Err(status_err) = self.status.set_status(project, ProjectStatus::Error).await {
                    error!(project = %project, error = %status_err, "failed to record ERROR status");
                }
            }
        }
        result
    }

    async fn generate(&self, project: &ProjectId) -> Result<GenerationOutcome, GenerationError> {
        let turns = self
            .store
            .find_all(project)
            .await
            .map_err(GenerationError::Store)?;
        debug!(project = %project, turns = turns.len(), "starting generation");

        let mut stream = self.backend.stream_chat(&self.system_prompt, &turns).await?;
        let mut parser = ArtifactParser::new();
        let mut transcript = String::new();
        let mut applied = 0;

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            transcript.push_str(&fragment);
            for action in parser.feed(&fragment) {
                self.apply(project, &action).await?;
                applied += 1;
            }
        }

        self.store
            .append(project, Role::Assistant, &transcript)
            .await
            .map_err(GenerationError::Store)?;

        Ok(GenerationOutcome {
            actions_applied: applied,
            transcript_len: transcript.len(),
            artifact: ArtifactHeader::find(&transcript),
        })
    }

    async fn apply(&self, project: &ProjectId, action: &Action) -> Result<(), GenerationError> {
        debug!(project = %project, action = %action.describe(), "applying action");
        let log_line = match action {
            Action::FileWrite { path, content } => {
                self.sink.write_file(project, path, content).await?;
                format!("Updated file {}", path)
            }
            Action::ShellRun { command } => {
                let output = self.sink.run_command(project, command, None).await?;
                format!("Ran command: {}\nOutput: {}", command, output.summary())
            }
        };
        self.store
            .record_action(project, &log_line)
            .await
            .map_err(GenerationError::Store)
    }
}
