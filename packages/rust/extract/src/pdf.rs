//! PDF text extraction.

use std::panic::{self, AssertUnwindSafe};

use digestkit_shared::{DigestError, Result};
use tracing::debug;

/// Extract the text of every page, paragraphs separated by a blank line.
///
/// Returns an empty string for PDFs without a text layer (scanned images);
/// callers decide whether that is an error.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed documents instead of erroring.
    let raw = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
        .map_err(|_| DigestError::parse("PDF parser panicked on malformed document"))?
        .map_err(|e| DigestError::parse(format!("PDF extraction failed: {e}")))?;

    let text = normalize_pdf_text(&raw);
    debug!(raw_len = raw.len(), text_len = text.len(), "pdf extracted");
    Ok(text)
}

/// Rebuild paragraphs from extracted PDF lines.
///
/// Blank lines and form feeds (page breaks) end a paragraph; wrapped lines
/// are joined, and a hyphen at a line break followed by a lowercase letter
/// is treated as a split word.
pub(crate) fn normalize_pdf_text(raw: &str) -> String {
    let raw = raw.replace('\r', "").replace('\u{c}', "\n\n");
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }

        if current.is_empty() {
            current = line;
        } else if current.ends_with('-')
            && line.chars().next().is_some_and(|c| c.is_lowercase())
        {
            current.pop();
            current.push_str(&line);
        } else {
            current.push(' ');
            current.push_str(&line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n")
}
