use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::json;
use tracing::debug;

use super::sse::{SseDecoder, SseItem};
use super::{ChatTurn, ModelBackend, TokenStream};
use crate::config::ModelSettings;
use crate::errors::BackendError;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// Streaming client for any `/chat/completions` endpoint speaking the OpenAI
/// wire format (Groq, OpenAI, vLLM, Ollama).
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

    /// Build from config, reading the key from the configured environment variable.
    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            settings.api_key(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

struct DecodeState {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl DecodeState {
    fn absorb(&mut self, items: Vec<SseItem>) {
        for item in items {
            match item {
                SseItem::Delta(text) => self.pending.push_back(text),
                SseItem::Done => {
                    self.finished = true;
                    break;
                }
            }
        }
    }
}

fn decode_tokens(body: ByteStream) -> TokenStream {
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(text), st));
            }
            if st.finished {
                return None;
            }

            let decoded = match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.feed(&chunk),
                Some(Err(e)) => Err(BackendError::Transport(e.to_string())),
                None => {
                    st.finished = true;
                    st.decoder.finish()
                }
            };
            match decoded {
                Ok(items) => st.absorb(items),
                Err(e) => {
                    st.finished = true;
                    st.pending.clear();
                    return Some((Err(e), st));
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, BackendError> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(json!({"role": "system", "content": system}));
        messages.extend(
            turns
                .iter()
                .map(|t| json!({"role": t.role.as_str(), "content": t.content})),
        );
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(model = %self.model, turns = turns.len(), "opening completion stream");
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(decode_tokens(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn sse_body(parts: &[&str]) -> String {
        let mut body = String::new();
        for part in parts {
            body.push_str(&format!(
                "data: {}\n\n",
                json!({"choices": [{"delta": {"content": part}}]})
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn test_streams_deltas_until_done() {
        let body = sse_body(&["<boltAction type=\"shell\">", "ls", "</boltAction>"]);
        let router = Router::new().route(
            "/chat/completions",
            post(move || {
                let body = body.clone();
                async move { body }
            }),
        );
        let base = serve(router).await;

        let backend = OpenAiCompatBackend::new(base, "test-model", Some("k".into()));
        let stream = backend
            .stream_chat("sys", &[ChatTurn::user("hi")])
            .await
            .unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(parts.concat(), "<boltAction type=\"shell\">ls</boltAction>");
    }

    #[tokio::test]
    async fn test_request_carries_system_turns_and_key() {
        let router = Router::new().route(
            "/chat/completions",
            post(
                |headers: axum::http::HeaderMap, axum::Json(req): axum::Json<serde_json::Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let summary = format!(
                        "{}|{}|{}|{}",
                        auth,
                        req["model"].as_str().unwrap_or_default(),
                        req["messages"][0]["role"].as_str().unwrap_or_default(),
                        req["messages"].as_array().map(|m| m.len()).unwrap_or(0)
                    );
                    sse_body(&[&summary])
                },
            ),
        );
        let base = serve(router).await;

        let backend = OpenAiCompatBackend::new(format!("{base}/"), "m1", Some("secret".into()));
        let turns = [ChatTurn::user("a"), ChatTurn::assistant("b")];
        let stream = backend.stream_chat("sys", &turns).await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;

        assert_eq!(parts.concat(), "Bearer secret|m1|system|3");
    }

    #[tokio::test]
    async fn test_non_success_status_is_hard_failure() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(router).await;

        let backend = OpenAiCompatBackend::new(base, "m", None);
        match backend.stream_chat("sys", &[]).await {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            Err(other) => panic!("Expected status error, got {other:?}"),
            Ok(_) => panic!("Expected status error, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = OpenAiCompatBackend::new(format!("http://{addr}"), "m", None);
        assert!(matches!(
            backend.stream_chat("sys", &[]).await,
            Err(BackendError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_error_payload_ends_stream_with_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                format!(
                    "data: {}\n\ndata: {}\n\n",
                    json!({"choices": [{"delta": {"content": "partial"}}]}),
                    json!({"error": {"message": "overloaded"}})
                )
            }),
        );
        let base = serve(router).await;

        let backend = OpenAiCompatBackend::new(base, "m", None);
        let results: Vec<Result<String, BackendError>> =
            backend.stream_chat("sys", &[]).await.unwrap().collect().await;

        // Nothing follows the error, whether or not the earlier delta made it out.
        assert!(matches!(results.last(), Some(Err(BackendError::Stream(m))) if m == "overloaded"));
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }
}
