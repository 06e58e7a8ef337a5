//! `nativex parse`: replay a saved model response through the artifact parser.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use nativex::artifact::{ArtifactHeader, ArtifactParser};

/// Feed `file` to the parser `chunk_size` characters at a time and print one
/// JSON action per line, as a live stream would produce them.
pub fn cmd_parse(file: &Path, chunk_size: usize) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let chars: Vec<char> = text.chars().collect();
    let mut parser = ArtifactParser::new();
    for chunk in chars.chunks(chunk_size.max(1)) {
        let delta: String = chunk.iter().collect();
        for action in parser.feed(&delta) {
            println!("{}", serde_json::to_string(&action)?);
        }
    }

    match ArtifactHeader::find(&text) {
        Some(header) => info!(id = %header.id, title = %header.title, actions = parser.emitted(), "parsed artifact"),
        None => info!(actions = parser.emitted(), "no artifact header found"),
    }
    Ok(())
}
