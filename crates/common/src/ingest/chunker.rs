//! Text extraction and chunking
//!
//! Splits documents into overlapping fixed-size windows for embedding.

use crate::errors::{AppError, Result};
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

/// How a document's text was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Json,
    Text,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Json => "json",
            SourceType::Text => "text",
        }
    }
}

/// Pull plain text out of an uploaded file. `.json` files are re-rendered as
/// indented JSON; everything else is read as UTF-8, replacing invalid bytes.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<(String, SourceType)> {
    if filename.to_lowercase().ends_with(".json") {
        let parsed: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| AppError::InvalidFormat {
                message: format!("{} is not valid JSON: {}", filename, e),
            })?;
        return Ok((serde_json::to_string_pretty(&parsed)?, SourceType::Json));
    }

    Ok((String::from_utf8_lossy(bytes).into_owned(), SourceType::Text))
}

/// Split text into overlapping windows after collapsing all whitespace runs
/// to single spaces. Empty or all-whitespace input yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = clean.chars().collect();
    let total_len = chars.len();
    let size = config.chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total_len {
        let end = (start + size).min(total_len);
        chunks.push(chars[start..end].iter().collect::<String>());
        if end == total_len {
            break;
        }
        // always move forward, even when overlap >= size
        start = end.saturating_sub(config.chunk_overlap).max(start + 1);
    }

    debug!(
        input_chars = total_len,
        chunk_count = chunks.len(),
        chunk_size = size,
        "Text chunked"
    );

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_chunks() {
        let config = ChunkingConfig::default();
        assert!(chunk_text("", &config).is_empty());
        assert!(chunk_text(" \n\t  ", &config).is_empty());
    }

    #[test]
    fn test_whitespace_normalised() {
        let chunks = chunk_text("a  b\n\nc\td", &ChunkingConfig::default());
        assert_eq!(chunks, vec!["a b c d"]);
    }

    #[test]
    fn test_sliding_window_overlap() {
        let text: String = (0..2000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_text(&text, &ChunkingConfig::default());

        // windows start at 0, 700, 1400
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 800);
        assert_eq!(chunks[1].chars().count(), 800);
        assert_eq!(chunks[2].chars().count(), 600);
        assert_eq!(&chunks[0][700..], &chunks[1][..100]);
    }

    #[test]
    fn test_overlap_larger_than_window_still_advances() {
        let config = ChunkingConfig {
            chunk_size: 3,
            chunk_overlap: 10,
        };
        let chunks = chunk_text("abcdef", &config);
        assert_eq!(chunks, vec!["abc", "bcd", "cde", "def"]);
    }

    #[test]
    fn test_extract_text_by_extension() {
        let (text, kind) = extract_text("policy.JSON", br#"{"name":"leave","weeks":26}"#).unwrap();
        assert_eq!(kind, SourceType::Json);
        assert!(text.contains("\n  \"name\": \"leave\""));

        let (text, kind) = extract_text("notes.txt", b"caf\xc3\xa9 \xff").unwrap();
        assert_eq!(kind, SourceType::Text);
        assert!(text.starts_with("café"));

        assert!(extract_text("broken.json", b"{not json").is_err());
    }
}
