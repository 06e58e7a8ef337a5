//! Incremental extraction of actions from streamed model output.
//!
//! Recognized markers:
//! - `<boltAction type="file" filePath="src/App.tsx">...</boltAction>` (`path` is accepted too)
//! - `<boltAction type="shell">npm install && npm start</boltAction>`
//!
//! The parser owns a growing buffer and a cursor. Everything before the cursor
//! has been committed and is never looked at again, so `parse()` can be called
//! after every token without re-emitting or rescanning.

use tracing::debug;

use super::Action;
use super::tag::Attributes;

pub(crate) const OPEN_TAG: &str = "<boltAction";
const CLOSE_TAG: &str = "</boltAction>";

/// Consumed bytes kept before the buffer is compacted.
const COMPACT_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct ArtifactParser {
    buffer: String,
    cursor: usize,
    emitted: usize,
    open: Option<OpenMarker>,
    scanned: usize,
}

/// A marker at the cursor that is still waiting for its `>` or close tag.
#[derive(Debug, Clone, Copy)]
struct OpenMarker {
    start: usize,
    tag_end: Option<usize>,
    // Everything in `[.., scan_from)` has already been searched for the
    // delimiter this marker is waiting on.
    scan_from: usize,
}

impl ArtifactParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add streamed text. Nothing is emitted until `parse()`.
    pub fn append(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// `append` followed by `parse`.
    pub fn feed(&mut self, delta: &str) -> Vec<Action> {
        self.append(delta);
        self.parse()
    }

    /// Emit every action whose marker is fully closed past the cursor.
    ///
    /// Scanning stops at the first marker that is still open; it is retried on
    /// the next call once more text has arrived, resuming where the previous
    /// search for its delimiter left off.
    pub fn parse(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();

        loop {
            let Some(start) = self.find_from(self.cursor, OPEN_TAG) else {
                self.cursor = self.tail_start();
                break;
            };
            let name_end = start + OPEN_TAG.len();
            let open = self.open.take().filter(|open| open.start == start);

            match self.buffer[name_end..].chars().next() {
                None => {
                    self.cursor = start;
                    break;
                }
                Some(c) if c.is_whitespace() || c == '>' || c == '/' => {}
                // Some other tag that merely shares the prefix.
                Some(_) => {
                    self.cursor = name_end;
                    continue;
                }
            }

            let tag_end = match open.and_then(|open| open.tag_end) {
                Some(tag_end) => tag_end,
                None => {
                    let from = open.map_or(name_end, |open| open.scan_from);
                    match self.find_from(from, ">") {
                        Some(tag_end) => tag_end,
                        None => {
                            self.cursor = start;
                            self.open = Some(OpenMarker {
                                start,
                                tag_end: None,
                                scan_from: self.buffer.len(),
                            });
                            break;
                        }
                    }
                }
            };
            let raw_attrs = &self.buffer[name_end..tag_end];

            if raw_attrs.trim_end().ends_with('/') {
                debug!(marker = %&self.buffer[start..=tag_end], "skipping self-closing action marker");
                self.cursor = tag_end + 1;
                continue;
            }

            let content_start = tag_end + 1;
            let from = match open {
                Some(OpenMarker {
                    tag_end: Some(_),
                    scan_from,
                    ..
                }) => scan_from,
                _ => content_start,
            };
            let Some(close) = self.find_from(from, CLOSE_TAG) else {
                self.cursor = start;
                self.open = Some(OpenMarker {
                    start,
                    tag_end: Some(tag_end),
                    scan_from: self.close_resume(content_start),
                });
                break;
            };
            let raw_attrs = &self.buffer[name_end..tag_end];
            let content = &self.buffer[content_start..close];

            if content.contains(OPEN_TAG) {
                debug!("nested action marker inside an open marker; inner marker ignored");
            }

            actions.extend(resolve(&Attributes::parse(raw_attrs), content));
            self.cursor = close + CLOSE_TAG.len();
        }

        self.emitted += actions.len();
        self.compact();
        actions
    }

    /// Number of actions emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Text past the cursor that has not been committed yet.
    pub fn pending(&self) -> &str {
        &self.buffer[self.cursor..]
    }

    // Absolute offset of `pat` at or after `from`.
    fn find_from(&mut self, from: usize, pat: &str) -> Option<usize> {
        let found = self.buffer[from..].find(pat);
        self.scanned += found.map_or(self.buffer.len() - from, |rel| rel + pat.len());
        found.map(|rel| from + rel)
    }

    // Earliest offset where a partially received opening tag could begin.
    fn tail_start(&self) -> usize {
        let mut idx = self.buffer.len().saturating_sub(OPEN_TAG.len() - 1);
        while !self.buffer.is_char_boundary(idx) {
            idx -= 1;
        }
        idx.max(self.cursor)
    }

    // Earliest offset where a partially received close tag could begin.
    fn close_resume(&self, content_start: usize) -> usize {
        let mut idx = self.buffer.len().saturating_sub(CLOSE_TAG.len() - 1);
        while !self.buffer.is_char_boundary(idx) {
            idx -= 1;
        }
        idx.max(content_start)
    }

    fn compact(&mut self) {
        if self.cursor >= COMPACT_THRESHOLD {
            let shift = self.cursor;
            self.buffer.drain(..shift);
            self.cursor = 0;
            if let Some(open) = self.open.as_mut() {
                open.start -= shift;
                open.tag_end = open.tag_end.map(|t| t - shift);
                open.scan_from -= shift;
            }
        }
    }
}

/// Turn one closed marker into zero or more actions.
fn resolve(attrs: &Attributes, content: &str) -> Vec<Action> {
    match attrs.get("type") {
        Some("file") => {
            let path = attrs
                .get("filePath")
                .or_else(|| attrs.get("path"))
                .map(str::trim)
                .filter(|p| !p.is_empty());
            match path {
                Some(path) => vec![Action::FileWrite {
                    path: path.to_string(),
                    content: content.trim().to_string(),
                }],
                None => {
                    debug!("skipping file action without a path");
                    Vec::new()
                }
            }
        }
        Some("shell") => split_commands(content)
            .map(|command| Action::ShellRun {
                command: command.to_string(),
            })
            .collect(),
        other => {
            debug!(action_type = ?other, "skipping action with unrecognized type");
            Vec::new()
        }
    }
}

/// Split a compound shell line on `&&` into independently executed commands.
pub fn split_commands(line: &str) -> impl Iterator<Item = &str> {
    line.split("&&").map(str::trim).filter(|c| !c.is_empty())
}
