//! Scripted collaborators and fixtures for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use digestkit_llm::{FormatHint, GenResult, TextGenerator};
use digestkit_shared::{
    Article, CacheEntry, CacheKind, ContentType, DigestError, FetchError, GenerationError, Result,
    Summary, Theme, ThemeMatch,
};
use digestkit_storage::{CacheStore, StoreCounts};

use crate::pipeline::ContentFetcher;

pub(crate) fn sample_article(url: &str, title: &str, text: &str) -> Article {
    Article::new(url, ContentType::Web, Some(title.to_string()), text.to_string())
}

pub(crate) fn sample_summary(article: &Article, model: &str) -> Summary {
    Summary {
        id: uuid::Uuid::now_v7(),
        article_ids: vec![article.id],
        source_url: article.url.clone(),
        text: format!("Summary of {}.", article.display_title()),
        key_points: vec![format!("Point about {}", article.display_title())],
        title: article.title.clone(),
        model: model.to_string(),
        generated_at: Utc::now(),
    }
}

/// Embedding with one axis per keyword the text mentions, plus a small
/// constant component so no vector is zero.
pub(crate) fn keyword_embedding(text: &str, keywords: &[&str]) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = keywords
        .iter()
        .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
        .collect();
    v.push(0.05);
    v
}

// ---------------------------------------------------------------------------
// Text generator
// ---------------------------------------------------------------------------

type EmbedFn = Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

/// A [`TextGenerator`] whose replies are scripted per call type.
pub(crate) struct ScriptedGenerator {
    summary_script: Mutex<VecDeque<GenResult<String>>>,
    narrative_script: Mutex<VecDeque<GenResult<String>>>,
    embed: EmbedFn,
    embedding_failure: Option<GenerationError>,
    theme: Option<GenResult<ThemeMatch>>,
    ping: GenResult<()>,
    pub summary_calls: AtomicUsize,
    pub embedding_calls: AtomicUsize,
    pub narrative_prompts: Mutex<Vec<String>>,
    pub summary_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            summary_script: Mutex::new(VecDeque::new()),
            narrative_script: Mutex::new(VecDeque::new()),
            embed: Box::new(|text| keyword_embedding(text, &["rust", "garden", "space"])),
            embedding_failure: None,
            theme: None,
            ping: Ok(()),
            summary_calls: AtomicUsize::new(0),
            embedding_calls: AtomicUsize::new(0),
            narrative_prompts: Mutex::new(Vec::new()),
            summary_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue replies for successive summary calls. Once exhausted, a JSON
    /// summary echoing the start of the prompt's article is returned.
    pub fn with_summaries(self, replies: Vec<GenResult<String>>) -> Self {
        *self.summary_script.lock().unwrap() = replies.into();
        self
    }

    /// Queue replies for successive narrative calls. Once exhausted, a
    /// fixed narrative is returned.
    pub fn with_narratives(self, replies: Vec<GenResult<String>>) -> Self {
        *self.narrative_script.lock().unwrap() = replies.into();
        self
    }

    pub fn with_embedder(mut self, embed: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        self.embed = Box::new(embed);
        self
    }

    pub fn failing_embeddings(mut self, err: GenerationError) -> Self {
        self.embedding_failure = Some(err);
        self
    }

    pub fn with_theme(mut self, reply: GenResult<ThemeMatch>) -> Self {
        self.theme = Some(reply);
        self
    }

    pub fn with_ping(mut self, reply: GenResult<()>) -> Self {
        self.ping = reply;
        self
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn generate_summary(&self, prompt: &str, _hint: FormatHint) -> GenResult<String> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        self.summary_prompts.lock().unwrap().push(prompt.to_string());
        if let Some(reply) = self.summary_script.lock().unwrap().pop_front() {
            return reply;
        }
        Ok(serde_json::json!({
            "summary": "A scripted summary of the article.",
            "key_points": ["First scripted point", "Second scripted point", "Third scripted point"]
        })
        .to_string())
    }

    async fn generate_embedding(&self, text: &str) -> GenResult<Vec<f32>> {
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.embedding_failure {
            return Err(err.clone());
        }
        Ok((self.embed)(text))
    }

    async fn generate_embeddings(&self, texts: &[String]) -> GenResult<Vec<Vec<f32>>> {
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.embedding_failure {
            return Err(err.clone());
        }
        Ok(texts.iter().map(|t| (self.embed)(t)).collect())
    }

    async fn generate_narrative(&self, context: &str) -> GenResult<String> {
        self.narrative_prompts.lock().unwrap().push(context.to_string());
        if let Some(reply) = self.narrative_script.lock().unwrap().pop_front() {
            return reply;
        }
        Ok("A scripted narrative.".to_string())
    }

    async fn classify_theme(&self, _article_text: &str, themes: &[Theme]) -> GenResult<ThemeMatch> {
        match &self.theme {
            Some(reply) => reply.clone(),
            None => Ok(ThemeMatch {
                theme: themes.first().map(|t| t.name.clone()).unwrap_or_default(),
                relevance: 0.5,
            }),
        }
    }

    async fn ping(&self) -> GenResult<()> {
        self.ping.clone()
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// A [`ContentFetcher`] serving canned articles, with optional per-URL delay.
pub(crate) struct MockFetcher {
    pages: HashMap<String, (String, String)>,
    delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn page(mut self, url: &str, title: &str, text: &str) -> Self {
        self.pages
            .insert(url.to_string(), (title.to_string(), text.to_string()));
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Article, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        match self.pages.get(url.as_str()) {
            Some((title, text)) => Ok(sample_article(url.as_str(), title, text)),
            None => Err(FetchError::Http {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A [`CacheStore`] whose every operation fails.
pub(crate) struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(DigestError::Storage("store unavailable".into()))
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _kind: CacheKind, _key: &str) -> Result<Option<CacheEntry>> {
        unavailable()
    }

    async fn put(&self, _entry: &CacheEntry) -> Result<()> {
        unavailable()
    }

    async fn remove(&self, _kind: CacheKind, _key: &str) -> Result<bool> {
        unavailable()
    }

    async fn counts(&self) -> Result<StoreCounts> {
        unavailable()
    }

    async fn clear(&self) -> Result<u64> {
        unavailable()
    }

    async fn purge_older_than(&self, _kind: CacheKind, _cutoff: DateTime<Utc>) -> Result<u64> {
        unavailable()
    }
}
