//! Format-specific text extraction.
//!
//! HTML pages are narrowed to their main content, stripped of page chrome,
//! converted to Markdown with `htmd` (which keeps paragraph structure), and
//! then flattened to plain text by the cleanup pipeline. PDFs and video
//! transcripts have their own normalizers in [`pdf`] and [`text`].

mod cleanup;
pub mod pdf;
pub mod text;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

use digestkit_shared::{DigestError, Result};

pub use pdf::pdf_to_text;
pub use text::{count_words, first_sentences, first_words, transcript_to_text, truncate_chars};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of extracting an HTML page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    /// `og:title`, `<title>`, or first heading, in that order.
    pub title: Option<String>,
    /// Cleaned plain text; may be empty.
    pub text: String,
    pub word_count: usize,
}

/// Tags dropped wholesale during conversion.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "iframe", "noscript", "svg",
    "button", "template",
];

/// Main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".post-content",
    ".article-content",
    ".article-body",
    ".entry-content",
    "#content",
    ".content",
];

/// Non-content blocks that are not identifiable by tag alone.
const CHROME_SELECTORS: &[&str] = &[
    ".ad",
    ".ads",
    ".advert",
    ".advertisement",
    "[class*=\"sponsor\"]",
    "[class*=\"cookie\"]",
    "[class*=\"newsletter\"]",
    "[class*=\"subscribe\"]",
    ".share",
    ".social",
    ".related",
    ".comments",
    "[aria-hidden=\"true\"]",
];

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Extract the readable text of an HTML page.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn html_to_text(html: &str) -> Result<ExtractedText> {
    let doc = Html::parse_document(html);
    let head_title = extract_title(&doc);

    let content_html = extract_content_html(&doc, html);
    let content_html = strip_chrome(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();
    let markdown = converter
        .convert(&content_html)
        .map_err(|e| DigestError::parse(format!("htmd conversion failed: {e}")))?;

    let title = head_title.or_else(|| extract_title_from_markdown(&markdown));
    let text = cleanup::run_pipeline(&markdown);
    let word_count = count_words(&text);

    debug!(word_count, has_title = title.is_some(), "html extracted");

    Ok(ExtractedText {
        title,
        text,
        word_count,
    })
}

/// Pick the main-content container, falling back to `<body>`.
fn extract_content_html(doc: &Html, raw: &str) -> String {
    for sel_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                if el.text().any(|t| !t.trim().is_empty()) {
                    return el.inner_html();
                }
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    raw.to_string()
}

/// Remove class-identified chrome (ads, share bars, cookie banners).
fn strip_chrome(content_html: &str) -> String {
    let fragment = Html::parse_fragment(content_html);
    let mut result = fragment.root_element().inner_html();

    for sel_str in CHROME_SELECTORS {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        for el in fragment.select(&selector) {
            result = result.replacen(&el.html(), "", 1);
        }
    }

    result
}

/// Page title from metadata, then `<title>`, then the first `<h1>`.
fn extract_title(doc: &Html) -> Option<String> {
    let og = Selector::parse("meta[property=\"og:title\"]")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .and_then(|el| el.value().attr("content").map(str::to_string));

    let title_tag = || {
        Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(|el| el.text().collect::<String>())
    };

    let h1 = || {
        Selector::parse("h1")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(|el| el.text().collect::<String>())
    };

    og.or_else(title_tag)
        .or_else(h1)
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
