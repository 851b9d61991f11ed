//! Text Extraction Module
//!
//! Pulls searchable text out of files for the local ranker. Only plain-text
//! formats are understood; anything that does not decode as UTF-8 yields an
//! empty string and is skipped by the caller.

use crate::error::{Result, TagError};
use std::io::Read;
use std::path::Path;

/// Files larger than this are truncated before extraction.
const MAX_BYTES: u64 = 4 * 1024 * 1024;

/// Extract text content from a file
pub fn extract_text_from_file(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(TagError::InvalidPath(format!("Not a file: {}", path.display())));
    }

    let mut raw = Vec::new();
    std::fs::File::open(path)?
        .take(MAX_BYTES)
        .read_to_end(&mut raw)?;

    let content = match String::from_utf8(raw) {
        Ok(content) => content,
        // Incomplete sequence at the end: a character cut by the size limit
        Err(e) if e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).unwrap_or_default()
        }
        Err(_) => {
            tracing::debug!("[TextExtraction] Not UTF-8, skipping: {}", path.display());
            return Ok(String::new());
        }
    };

    let extension = path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase();

    Ok(match extension.as_str() {
        "rs" | "c" | "h" | "cpp" | "js" | "ts" | "css" => strip_line_comments(&content, "//"),
        "py" | "sh" | "toml" | "yml" | "yaml" | "conf" | "ini" => strip_line_comments(&content, "#"),
        _ => extract_plain_text(&content),
    })
}

/// Lowercased alphanumeric words of `text`.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Remove excessive whitespace and normalize
fn extract_plain_text(content: &str) -> String {
    content.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_line_comments(content: &str, marker: &str) -> String {
    content.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with(marker))
        .collect::<Vec<_>>()
        .join("\n")
}
