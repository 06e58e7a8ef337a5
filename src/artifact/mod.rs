//! Streaming artifact pipeline.
//!
//! Model output embeds actions inside an artifact:
//!
//! ```text
//! <boltArtifact id="todo-app" title="Todo App">
//!   <boltAction type="file" filePath="app/index.tsx">...</boltAction>
//!   <boltAction type="shell">npm install && npx expo start</boltAction>
//! </boltArtifact>
//! ```
//!
//! `ArtifactParser` turns the token stream into `Action`s as each marker
//! closes; `ArtifactHeader` reads the enclosing artifact's id and title once the
//! transcript is complete.

mod parser;
mod tag;

pub use parser::{ArtifactParser, split_commands};

use serde::Serialize;

use tag::Attributes;

const ARTIFACT_TAG: &str = "<boltArtifact";

/// One resolved unit of generated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    FileWrite { path: String, content: String },
    ShellRun { command: String },
}

impl Action {
    /// Short label used in logs.
    pub fn describe(&self) -> String {
        match self {
            Action::FileWrite { path, .. } => format!("write {}", path),
            Action::ShellRun { command } => format!("run {}", command),
        }
    }
}

/// Identity of the artifact wrapping a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactHeader {
    pub id: String,
    pub title: String,
}

impl ArtifactHeader {
    /// Find the first artifact header in `text`. An artifact without an `id` is
    /// not an artifact; a missing title defaults to `Artifact`.
    pub fn find(text: &str) -> Option<Self> {
        let start = text.find(ARTIFACT_TAG)?;
        let name_end = start + ARTIFACT_TAG.len();
        let tag_end = name_end + text[name_end..].find('>')?;
        let attrs = Attributes::parse(&text[name_end..tag_end]);

        let id = attrs.get("id")?.to_string();
        let title = attrs.get("title").unwrap_or("Artifact").to_string();
        Some(Self { id, title })
    }
}
