//! Article summarization with retry and deterministic fallback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use digestkit_extract::{first_sentences, first_words, truncate_chars};
use digestkit_llm::{FormatHint, TextGenerator, json_payload};
use digestkit_shared::{
    Article, ContentType, FALLBACK_MODEL, SummarizeConfig, SummarizeError, Summary,
};

use crate::retry::{RetryPolicy, with_retries};

/// Key points requested from the model, and produced by the fallback.
const KEY_POINTS: usize = 3;

/// Produces one summary per article.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize an article. Only an article without text is an error;
    /// collaborator failures yield a fallback summary.
    async fn summarize(&self, article: &Article) -> Result<Summary, SummarizeError>;
}

/// [`Summarizer`] backed by a [`TextGenerator`].
pub struct LlmSummarizer {
    generator: Arc<dyn TextGenerator>,
    config: SummarizeConfig,
}

impl LlmSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: SummarizeConfig) -> Self {
        Self { generator, config }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            initial: self.config.retry_initial,
        }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip_all, fields(url = %article.url))]
    async fn summarize(&self, article: &Article) -> Result<Summary, SummarizeError> {
        if article.text.trim().is_empty() {
            return Err(SummarizeError::EmptyText {
                url: article.url.clone(),
            });
        }

        let prompt = build_prompt(article, &self.config);
        let reply = with_retries(self.policy(), "summary", || {
            self.generator.generate_summary(&prompt, FormatHint::Json)
        })
        .await;

        match reply.map(|r| parse_reply(&r)) {
            Ok(Some(parsed)) => {
                debug!(words = parsed.summary.split_whitespace().count(), "summary generated");
                Ok(Summary {
                    id: Uuid::now_v7(),
                    article_ids: vec![article.id],
                    source_url: article.url.clone(),
                    text: parsed.summary,
                    key_points: parsed.key_points,
                    title: parsed.title.or_else(|| article.title.clone()),
                    model: self.generator.model_id().to_string(),
                    generated_at: Utc::now(),
                })
            }
            Ok(None) => {
                warn!("model reply had no summary text, using fallback");
                Ok(fallback_summary(article, self.config.target_words))
            }
            Err(e) => {
                warn!(error = %e, "summarization failed, using fallback");
                Ok(fallback_summary(article, self.config.target_words))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

fn build_prompt(article: &Article, config: &SummarizeConfig) -> String {
    let source = match article.content_type {
        ContentType::Web => {
            "Summarize the following web article. Ignore any leftover navigation, \
             sign-up prompts or comment text."
        }
        ContentType::Pdf => {
            "Summarize the following document extracted from a PDF. Ignore running \
             headers, page numbers, reference lists and figure captions."
        }
        ContentType::Video => {
            "Summarize the following video transcript. It is spoken language, so \
             skip filler, greetings and sponsor segments and focus on the substance."
        }
    };

    let title_field = if article.title.is_some() {
        ""
    } else {
        ", \"title\": \"<a short descriptive title>\""
    };

    let mut prompt = format!(
        "{source}\n\n\
         Write about {words} words and {KEY_POINTS} to 5 key points.\n\
         Reply with JSON: {{\"summary\": \"...\", \"key_points\": [\"...\"]{title_field}}}\n\n",
        words = config.target_words,
    );
    if let Some(title) = &article.title {
        prompt.push_str(&format!("Title: {title}\n"));
    }
    prompt.push_str(&format!("Source: {}\n\n", article.url));
    prompt.push_str(truncate_chars(&article.text, config.max_input_chars));
    prompt
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct ParsedSummary {
    summary: String,
    key_points: Vec<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct SummaryReply {
    #[serde(alias = "text")]
    summary: String,
    #[serde(default, alias = "keyPoints", alias = "bullets")]
    key_points: Vec<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Read a model reply as JSON, or failing that as prose with bullet lines.
fn parse_reply(reply: &str) -> Option<ParsedSummary> {
    if let Ok(parsed) = serde_json::from_str::<SummaryReply>(json_payload(reply)) {
        let summary = parsed.summary.trim().to_string();
        if summary.is_empty() {
            return None;
        }
        return Some(ParsedSummary {
            summary,
            key_points: clean_points(parsed.key_points),
            title: parsed
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        });
    }

    let mut prose = Vec::new();
    let mut points = Vec::new();
    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match strip_bullet(line) {
            Some(point) => points.push(point.to_string()),
            None => prose.push(line),
        }
    }

    let summary = prose.join(" ");
    if summary.is_empty() {
        return None;
    }
    Some(ParsedSummary {
        summary,
        key_points: clean_points(points),
        title: None,
    })
}

fn strip_bullet(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        return Some(rest.trim());
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(['.', ')']) {
            return Some(rest.trim());
        }
    }
    None
}

fn clean_points(points: Vec<String>) -> Vec<String> {
    points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Deterministic summary built from the article text alone.
pub fn fallback_summary(article: &Article, target_words: usize) -> Summary {
    Summary {
        id: Uuid::now_v7(),
        article_ids: vec![article.id],
        source_url: article.url.clone(),
        text: first_words(&article.text, target_words),
        key_points: first_sentences(&article.text, KEY_POINTS),
        title: article.title.clone(),
        model: FALLBACK_MODEL.to_string(),
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGenerator, sample_article};
    use digestkit_shared::GenerationError;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> SummarizeConfig {
        SummarizeConfig {
            target_words: 5,
            max_retries: 2,
            retry_initial: Duration::from_millis(10),
            max_input_chars: 24_000,
        }
    }

    fn article() -> Article {
        sample_article(
            "https://example.com/post",
            "Ownership",
            "Each value has an owner. There can only be one owner at a time. When the owner goes out of scope the value is dropped. Borrowing lets code use a value without owning it.",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn two_timeouts_then_success_uses_model_result() {
        let generator = Arc::new(ScriptedGenerator::new().with_summaries(vec![
            Err(GenerationError::Transient("timeout".into())),
            Err(GenerationError::Transient("timeout".into())),
            Ok(r#"{"summary": "Rust tracks ownership.", "key_points": ["One owner", "Scope drop"]}"#.into()),
        ]));
        let summarizer = LlmSummarizer::new(generator.clone(), config());

        let summary = summarizer.summarize(&article()).await.unwrap();
        assert_eq!(summary.text, "Rust tracks ownership.");
        assert_eq!(summary.key_points, vec!["One owner", "Scope drop"]);
        assert_eq!(summary.model, "scripted-model");
        assert!(!summary.is_fallback());
        assert_eq!(generator.summary_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_fall_back_to_excerpt() {
        let generator = Arc::new(ScriptedGenerator::new().with_summaries(vec![
            Err(GenerationError::Transient("503".into())),
            Err(GenerationError::Transient("503".into())),
            Err(GenerationError::Transient("503".into())),
        ]));
        let summarizer = LlmSummarizer::new(generator.clone(), config());
        let article = article();

        let summary = summarizer.summarize(&article).await.unwrap();
        assert!(summary.is_fallback());
        assert_eq!(summary.model, FALLBACK_MODEL);
        assert_eq!(summary.text, "Each value has an owner.");
        assert_eq!(
            summary.key_points,
            vec![
                "Each value has an owner.",
                "There can only be one owner at a time.",
                "When the owner goes out of scope the value is dropped."
            ]
        );
        assert_eq!(summary.article_ids, vec![article.id]);
        assert_eq!(generator.summary_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_falls_back_without_retry() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_summaries(vec![Err(GenerationError::Permanent("bad request".into()))]),
        );
        let summarizer = LlmSummarizer::new(generator.clone(), config());

        assert!(summarizer.summarize(&article()).await.unwrap().is_fallback());
        assert_eq!(generator.summary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_text_is_precondition_failure() {
        let summarizer = LlmSummarizer::new(Arc::new(ScriptedGenerator::new()), config());
        let empty = sample_article("https://example.com/empty", "Empty", "   ");
        assert_eq!(
            summarizer.summarize(&empty).await.unwrap_err(),
            SummarizeError::EmptyText {
                url: "https://example.com/empty".into()
            }
        );
    }

    #[tokio::test]
    async fn prompt_depends_on_format_and_missing_title() {
        let generator = Arc::new(ScriptedGenerator::new());
        let summarizer = LlmSummarizer::new(generator.clone(), config());

        let mut video = sample_article("https://youtu.be/abcdefghijk", "x", "Hello and welcome.");
        video.content_type = ContentType::Video;
        video.title = None;
        summarizer.summarize(&video).await.unwrap();

        let prompts = generator.summary_prompts.lock().unwrap();
        assert!(prompts[0].contains("video transcript"));
        assert!(prompts[0].contains("\"title\""));
        assert!(prompts[0].ends_with("Hello and welcome."));
    }

    #[test]
    fn parses_fenced_json() {
        let parsed = parse_reply(
            "```json\n{\"summary\": \" Short. \", \"keyPoints\": [\"a\", \" \"], \"title\": \"T\"}\n```",
        )
        .unwrap();
        assert_eq!(parsed.summary, "Short.");
        assert_eq!(parsed.key_points, vec!["a"]);
        assert_eq!(parsed.title.as_deref(), Some("T"));
    }

    #[test]
    fn parses_plain_text_with_bullets() {
        let parsed = parse_reply(
            "The article explains borrowing.\nIt covers lifetimes too.\n- Borrows are temporary\n2) Lifetimes are checked",
        )
        .unwrap();
        assert_eq!(
            parsed.summary,
            "The article explains borrowing. It covers lifetimes too."
        );
        assert_eq!(
            parsed.key_points,
            vec!["Borrows are temporary", "Lifetimes are checked"]
        );
    }

    #[test]
    fn empty_reply_has_no_summary() {
        assert!(parse_reply("").is_none());
        assert!(parse_reply("{\"summary\": \"\"}").is_none());
        assert!(parse_reply("- only\n- bullets").is_none());
    }
}
