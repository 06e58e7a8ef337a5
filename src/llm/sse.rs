use serde::Deserialize;
use tracing::warn;

use crate::errors::BackendError;

const DONE_SENTINEL: &str = "[DONE]";

/// A decoded server-sent event from a chat completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    Delta(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Line decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a full line is available, so lines and multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen. Later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseItem>, BackendError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.buf.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            self.decode_line(&line, &mut items)?;
            if self.done {
                self.buf.clear();
                break;
            }
        }
        Ok(items)
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Result<Vec<SseItem>, BackendError> {
        let mut items = Vec::new();
        if !self.done && !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            self.decode_line(&line, &mut items)?;
        }
        Ok(items)
    }

    fn decode_line(&mut self, raw: &[u8], items: &mut Vec<SseItem>) -> Result<(), BackendError> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();

        let Some(payload) = line.strip_prefix("data:") else {
            // event:, id:, retry:, comments and blank separators
            return Ok(());
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(());
        }

        if payload == DONE_SENTINEL {
            self.done = true;
            items.push(SseItem::Done);
            return Ok(());
        }

        let body: ChunkBody = match serde_json::from_str(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "skipping malformed stream line");
                return Ok(());
            }
        };

        if let Some(error) = body.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(BackendError::Stream(message));
        }

        if let Some(content) = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
        {
            items.push(SseItem::Delta(content));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn deltas(items: Vec<SseItem>) -> Vec<String> {
        items
            .into_iter()
            .filter_map(|i| match i {
                SseItem::Delta(s) => Some(s),
                SseItem::Done => None,
            })
            .collect()
    }

    #[test]
    fn test_decodes_deltas_and_done() {
        let body = format!("{}{}data: [DONE]\n\n", data("Hel"), data("lo"));
        let mut decoder = SseDecoder::new();
        let items = decoder.feed(body.as_bytes()).unwrap();

        assert_eq!(
            items,
            vec![
                SseItem::Delta("Hel".into()),
                SseItem::Delta("lo".into()),
                SseItem::Done
            ]
        );
        assert!(decoder.is_done());
    }

    #[test]
    fn test_split_lines_and_utf8_across_chunks() {
        let body = format!("{}{}", data("héllo ✓"), data("wörld"));
        let bytes = body.as_bytes();

        for size in [1, 2, 3, 5, 7, 64] {
            let mut decoder = SseDecoder::new();
            let mut out = Vec::new();
            for chunk in bytes.chunks(size) {
                out.extend(deltas(decoder.feed(chunk).unwrap()));
            }
            assert_eq!(out.concat(), "héllo ✓wörld", "chunk size {size}");
        }
    }

    #[test]
    fn test_ignores_non_data_lines_and_empty_deltas() {
        let body = format!(
            ": keep-alive\nevent: message\n{}{}",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            data("x")
        );
        let mut decoder = SseDecoder::new();
        assert_eq!(deltas(decoder.feed(body.as_bytes()).unwrap()), vec!["x"]);
    }

    #[test]
    fn test_malformed_json_is_skipped() {
        let body = format!("data: {{not json\n{}", data("ok"));
        let mut decoder = SseDecoder::new();
        assert_eq!(deltas(decoder.feed(body.as_bytes()).unwrap()), vec!["ok"]);
    }

    #[test]
    fn test_error_payload_fails_the_stream() {
        let body = "data: {\"error\":{\"message\":\"rate limited\"}}\n";
        let mut decoder = SseDecoder::new();
        match decoder.feed(body.as_bytes()) {
            Err(BackendError::Stream(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("Expected stream error, got {other:?}"),
        }
    }

    #[test]
    fn test_input_after_done_is_ignored() {
        let body = format!("data: [DONE]\n{}", data("late"));
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.feed(body.as_bytes()).unwrap(), vec![SseItem::Done]);
        assert!(decoder.feed(data("later").as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        let line = data("tail");
        let unterminated = line.trim_end();
        assert!(decoder.feed(unterminated.as_bytes()).unwrap().is_empty());
        assert_eq!(deltas(decoder.finish().unwrap()), vec!["tail"]);
    }
}
