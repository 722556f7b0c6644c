//! Link scanning over free text and Markdown.
//!
//! Recognizes, in order of appearance:
//! - Markdown links: `[label](https://…)` and `[label](<https://…> "title")`
//! - Autolinks: `<https://…>`
//! - Bare URLs in prose: `see https://example.com/post.`

use regex::Regex;
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// One alternation so a single left-to-right pass keeps document order.
/// Markdown links are tried first so their targets are not re-read as bare URLs.
/// Targets may hold balanced parentheses (`/wiki/Rust_(language)`).
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\[[^\]]*\]\(\s*<?(?P<md>https?://(?:[^\s()<>]|\([^\s()<>]*\))+)>?(?:\s+"[^"]*")?\s*\)|<(?P<auto>https?://[^\s>]+)>|(?P<bare>https?://[^\s<>"'`\]]+)"#,
    )
    .expect("link regex")
});

/// Punctuation that ends a sentence rather than a URL.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"', '*', '_'];

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Every URL-looking string in `text`, in document order, not yet validated.
pub(crate) fn scan_links(text: &str) -> Vec<String> {
    LINK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            if let Some(m) = caps.name("md").or_else(|| caps.name("auto")) {
                return Some(m.as_str().to_string());
            }
            caps.name("bare").map(|m| trim_bare(m.as_str()).to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strip trailing sentence punctuation from a bare URL, and closing
/// parentheses that have no opening partner inside it.
fn trim_bare(raw: &str) -> &str {
    let mut s = raw;
    loop {
        let mut next = s.trim_end_matches(TRAILING_PUNCTUATION);
        if next.ends_with(')') && next.matches(')').count() > next.matches('(').count() {
            next = &next[..next.len() - 1];
        }
        if next.len() == s.len() {
            return s;
        }
        s = next;
    }
}
