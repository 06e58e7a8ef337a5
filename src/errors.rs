//! Typed error hierarchy for nativex.
//!
//! One enum per seam:
//! - `RuntimeError`: container runtime calls (inspect/create/start/exec)
//! - `SandboxError`: lifecycle manager failures
//! - `SinkError`: applying a single action to a sandbox
//! - `BackendError`: model backend request and stream failures
//! - `GenerationError`: a whole generation run

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the container runtime.
///
/// `NotFound` and `Conflict` are the only classes callers branch on; everything
/// else is fatal to the current job.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    Conflict { kind: &'static str, name: String },

    #[error("Failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("Container runtime {operation} on '{target}' failed: {message}")]
    Api {
        operation: &'static str,
        target: String,
        message: String,
    },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RuntimeError::Conflict { .. })
    }
}

/// Rejected project identifier.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid project id '{id}': {reason}")]
pub struct InvalidProjectId {
    pub id: String,
    pub reason: &'static str,
}

/// Errors from the sandbox lifecycle manager.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to prepare project directory {path}: {source}")]
    ProjectDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors from applying an action to a sandbox.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Refusing to write outside the project directory: {0}")]
    InvalidPath(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("Command '{command}' timed out after {secs}s")]
    CommandTimedOut { command: String, secs: u64 },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Errors from the model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Model backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model backend transport error: {0}")]
    Transport(String),

    #[error("Model backend stream error: {0}")]
    Stream(String),
}

/// Errors that fail a generation run.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Action failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_not_found_is_detectable() {
        let err = RuntimeError::NotFound {
            kind: "container",
            name: "editor-abc".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "container 'editor-abc' not found");
    }

    #[test]
    fn runtime_error_conflict_is_detectable() {
        let err = RuntimeError::Conflict {
            kind: "network",
            name: "nativex-net".into(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn sandbox_error_converts_from_runtime_error() {
        let inner = RuntimeError::Api {
            operation: "inspect_container",
            target: "editor-abc".into(),
            message: "boom".into(),
        };
        let err: SandboxError = inner.into();
        match &err {
            SandboxError::Runtime(RuntimeError::Api { operation, .. }) => {
                assert_eq!(*operation, "inspect_container");
            }
            _ => panic!("Expected SandboxError::Runtime(Api)"),
        }
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn sink_error_command_failed_carries_exit_code() {
        let err = SinkError::CommandFailed {
            command: "npm install".into(),
            exit_code: 127,
            stderr: "npm: not found".into(),
        };
        assert!(err.to_string().contains("127"));
        assert!(err.to_string().contains("npm install"));
    }

    #[test]
    fn generation_error_wraps_backend_and_sink() {
        let err: GenerationError = BackendError::Status {
            status: 401,
            body: "unauthorized".into(),
        }
        .into();
        assert!(matches!(
            err,
            GenerationError::Backend(BackendError::Status { status: 401, .. })
        ));

        let err: GenerationError = SinkError::InvalidPath("../etc".into()).into();
        assert!(matches!(err, GenerationError::Sink(SinkError::InvalidPath(_))));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&RuntimeError::Connect("x".into()));
        assert_std_error(&SinkError::InvalidPath("x".into()));
        assert_std_error(&BackendError::Transport("x".into()));
        assert_std_error(&InvalidProjectId {
            id: "x".into(),
            reason: "y",
        });
    }
}
