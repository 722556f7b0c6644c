//! Core domain types for DigestKit runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

/// Model identifier recorded on summaries built without the collaborator.
pub const FALLBACK_MODEL: &str = "fallback";

// ---------------------------------------------------------------------------
// ArticleId
// ---------------------------------------------------------------------------

/// Stable article identifier: a UUID v5 of the canonical URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    /// Derive the identifier for a canonical URL. Same URL, same id.
    pub fn from_url(url: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()))
    }
}

impl std::fmt::Display for ArticleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ArticleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// SHA-256 hex digest of cleaned article text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Article
// ---------------------------------------------------------------------------

/// How an article's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Web,
    Pdf,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Pdf => "pdf",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single fetched article, enriched as it moves through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    /// Canonical source URL.
    pub url: String,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Cleaned plain text. Never empty once past the fetcher.
    pub text: String,
    /// Raw body kept for re-extraction (HTML pages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// SHA-256 of `text`.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_label: Option<String>,
    /// Cosine similarity to the assigned cluster's centroid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemeMatch>,
}

impl Article {
    /// Build a freshly fetched article; the hash and word count come from `text`.
    pub fn new(
        url: impl Into<String>,
        content_type: ContentType,
        title: Option<String>,
        text: String,
    ) -> Self {
        let url = url.into();
        Self {
            id: ArticleId::from_url(&url),
            content_hash: content_hash(&text),
            word_count: text.split_whitespace().count(),
            url,
            content_type,
            title,
            text,
            raw_content: None,
            fetched_at: Utc::now(),
            cluster_label: None,
            cluster_confidence: None,
            embedding: None,
            theme: None,
        }
    }

    /// Title if extracted, otherwise the URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// A generated (or fallback) summary of one or more articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub article_ids: Vec<ArticleId>,
    pub source_url: String,
    pub text: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Collaborator model, or [`FALLBACK_MODEL`].
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

impl Summary {
    pub fn is_fallback(&self) -> bool {
        self.model == FALLBACK_MODEL
    }
}

// ---------------------------------------------------------------------------
// Cache entries
// ---------------------------------------------------------------------------

/// Which cache table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Content,
    Summary,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Summary => "summary",
        }
    }
}

impl std::str::FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "content" => Ok(Self::Content),
            "summary" => Ok(Self::Summary),
            other => Err(format!("unknown cache kind: {other}")),
        }
    }
}

/// A stored cache record. The payload is the JSON of an [`Article`] or [`Summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub kind: CacheKind,
    /// Subject URL.
    pub key: String,
    /// Content hash the entry was derived from (summary entries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Clusters and themes
// ---------------------------------------------------------------------------

/// A group of topically related articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    /// Human-readable label derived from member titles.
    pub label: String,
    /// Members in input order.
    pub article_ids: Vec<ArticleId>,
    /// Normalized mean of member embeddings.
    pub centroid: Vec<f32>,
    /// Mean pairwise cosine similarity of members.
    pub cohesion: f32,
}

impl TopicCluster {
    pub fn len(&self) -> usize {
        self.article_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.article_ids.is_empty()
    }
}

/// A classification theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Best-matching theme for an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeMatch {
    pub theme: String,
    /// 0.0 (unrelated) to 1.0 (squarely on theme).
    pub relevance: f32,
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// One cluster rendered as a digest section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestSection {
    pub cluster: TopicCluster,
    pub articles: Vec<Article>,
    pub summaries: Vec<Summary>,
    pub narrative: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestMetadata {
    pub article_count: usize,
    pub section_count: usize,
    pub total_word_count: usize,
    pub fallback_summaries: usize,
}

/// The final assembled digest. Consumers treat it as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub executive_summary: String,
    pub sections: Vec<DigestSection>,
    /// Some narrative text came from the deterministic fallback.
    pub narrative_degraded: bool,
    pub metadata: DigestMetadata,
}

// ---------------------------------------------------------------------------
// Run reporting
// ---------------------------------------------------------------------------

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub requested: usize,
    pub fetched: usize,
    pub cached: usize,
    pub failed: usize,
    pub summarized: usize,
    pub summary_cache_hits: usize,
    pub fallback_summaries: usize,
    pub embedded: usize,
}

/// An article that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFailure {
    pub url: String,
    pub kind: String,
    pub message: String,
}
