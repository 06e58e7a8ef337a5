//! Model backend contract and the OpenAI-compatible streaming client.

mod openai;
mod sse;

pub use openai::OpenAiCompatBackend;
pub use sse::{SseDecoder, SseItem};

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("Unknown role: {}", other),
        }
    }
}

/// One prior message of a project's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental text fragments of one model response. Ends when the backend
/// signals completion or closes the connection.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// An opaque streaming token source.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Open a streaming completion. A non-success initial response is an
    /// error here, before any fragment is yielded.
    async fn stream_chat(&self, system: &str, turns: &[ChatTurn])
    -> Result<TokenStream, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_chat_turn_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatTurn::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
