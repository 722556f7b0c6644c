//! Markdown-to-plain-text cleanup pipeline.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Paragraph breaks from the Markdown survive; everything else that is
//! markup (headings, list markers, emphasis, links, images, stray tags) goes.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on converted Markdown.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = strip_code_fences(&result);
    result = strip_images(&result);
    result = unwrap_links(&result);
    result = strip_block_markers(&result);
    result = strip_emphasis(&result);
    result = strip_leftover_html(&result);
    result = unescape_markdown(&result);
    result = collapse_whitespace(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Code fences
// ---------------------------------------------------------------------------

/// Drop ``` fence lines, keep the code itself.
fn strip_code_fences(md: &str) -> String {
    md.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Images
// ---------------------------------------------------------------------------

fn strip_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Links
// ---------------------------------------------------------------------------

/// `[text](url)` becomes `text`.
fn unwrap_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Headings, list markers, block quotes, rules
// ---------------------------------------------------------------------------

fn strip_block_markers(md: &str) -> String {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("valid regex"));
    static LIST_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").expect("valid regex"));
    static QUOTE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").expect("valid regex"));
    static RULE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$").expect("valid regex"));

    let result = RULE_RE.replace_all(md, "");
    let result = HEADING_RE.replace_all(&result, "");
    let result = QUOTE_RE.replace_all(&result, "");
    LIST_RE.replace_all(&result, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Emphasis and inline code
// ---------------------------------------------------------------------------

/// Remove `**`, `__`, `*` and backtick markers. Single `_` is left alone
/// because it is far more often part of an identifier.
fn strip_emphasis(md: &str) -> String {
    static EMPHASIS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?:^|[^\\])(\*\*|__|\*|`)").expect("valid regex"));

    EMPHASIS_RE
        .replace_all(md, |caps: &regex::Captures| {
            let whole = &caps[0];
            let marker = &caps[1];
            whole[..whole.len() - marker.len()].to_string()
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Stray HTML
// ---------------------------------------------------------------------------

/// Remove HTML tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^>]*)?/?>").expect("valid regex"));

    HTML_TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Markdown escapes
// ---------------------------------------------------------------------------

/// `\*` becomes `*`, `\_` becomes `_`, and so on.
fn unescape_markdown(md: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\\([\\`*_{}\[\]()#+\-.!|>~])").expect("valid regex")
    });

    ESCAPE_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 8: Whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of spaces inside lines, join wrapped lines, and separate
/// paragraphs with exactly one blank line.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(join_words(&current));
                current.clear();
            }
        } else {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(join_words(&current));
    }

    paragraphs.join("\n\n")
}

fn join_words(lines: &[&str]) -> String {
    lines
        .iter()
        .flat_map(|l| l.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}
