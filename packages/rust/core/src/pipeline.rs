//! End-to-end digest run: URLs → fetch → summarize → embed → cluster →
//! narrate → assemble.
//!
//! Fetch and summarize run per article on a bounded pool; everything after
//! works on the full, input-ordered article set. Each later stage reports a
//! [`StageOutcome`] and the run decides how to continue in one place
//! ([`settle`]). Every await in [`Pipeline::run`] races the cancellation
//! token and the optional deadline.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use digestkit_extract::truncate_chars;
use digestkit_fetcher::Fetcher;
use digestkit_llm::TextGenerator;
use digestkit_shared::{
    AppConfig, Article, ArticleFailure, ClusterConfig, Digest, DigestError, EmbeddingConfig,
    FetchError, GenerationError, NarrativeConfig, PipelineConfig, Result, RunStats,
    SummarizeConfig, Summary, TopicCluster,
};

use crate::assembler::{IdentityOrdering, OrderingPolicy, assemble};
use crate::cache::{CacheManager, CacheStats};
use crate::cluster::{Clusterer, KMeansClusterer, annotate_articles, single_cluster};
use crate::embedding::{Embedder, LlmEmbedder, embedding_text};
use crate::narrative::{LlmNarrativeSynthesizer, Narrative, NarrativeSynthesizer};
use crate::outcome::StageOutcome;
use crate::summarizer::{LlmSummarizer, Summarizer};

/// Article text sent for theme classification.
const THEME_INPUT_CHARS: usize = 4_000;

/// Drop repeated URLs; the first occurrence keeps its position.
fn unique_urls(urls: &[Url]) -> Vec<Url> {
    let mut seen = HashSet::new();
    let unique: Vec<Url> = urls
        .iter()
        .filter(|u| seen.insert(u.as_str()))
        .cloned()
        .collect();
    if unique.len() < urls.len() {
        debug!(dropped = urls.len() - unique.len(), "duplicate URLs ignored");
    }
    unique
}

/// Retrieves one article.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> std::result::Result<Article, FetchError>;
}

#[async_trait]
impl ContentFetcher for Fetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Article, FetchError> {
        Fetcher::fetch(self, url).await
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct DigestRun {
    pub digest: Digest,
    pub stats: RunStats,
    /// Articles that were skipped, in input order.
    pub failures: Vec<ArticleFailure>,
    pub cache: CacheStats,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when an article has been fetched and summarized.
    fn article_done(&self, url: &str, current: usize, total: usize);
    /// Called when an article is skipped.
    fn article_failed(&self, failure: &ArticleFailure);
    /// Called when the run completes.
    fn done(&self, run: &DigestRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn article_done(&self, _url: &str, _current: usize, _total: usize) {}
    fn article_failed(&self, _failure: &ArticleFailure) {}
    fn done(&self, _run: &DigestRun) {}
}

/// One article after fetch and summarize.
struct Processed {
    article: Article,
    summary: Summary,
    content_hit: bool,
    summary_hit: bool,
}

type ArticleResult = std::result::Result<Processed, ArticleFailure>;

/// The digest orchestrator. Components are trait objects so any of them
/// can be swapped without touching the run logic.
pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    fetcher: Arc<dyn ContentFetcher>,
    cache: Arc<CacheManager>,
    summarizer: Arc<dyn Summarizer>,
    embedder: Arc<dyn Embedder>,
    clusterer: Arc<dyn Clusterer>,
    narrator: Arc<dyn NarrativeSynthesizer>,
    ordering: Arc<dyn OrderingPolicy>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Wire the default components around `generator`.
    pub fn from_config(
        config: &AppConfig,
        generator: Arc<dyn TextGenerator>,
        fetcher: Arc<dyn ContentFetcher>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            summarizer: Arc::new(LlmSummarizer::new(
                generator.clone(),
                SummarizeConfig::from(config),
            )),
            embedder: Arc::new(LlmEmbedder::new(
                generator.clone(),
                EmbeddingConfig::from(config),
            )),
            clusterer: Arc::new(KMeansClusterer::new(ClusterConfig::from(config))),
            narrator: Arc::new(LlmNarrativeSynthesizer::new(
                generator.clone(),
                NarrativeConfig::from(config),
            )),
            ordering: Arc::new(IdentityOrdering),
            config: PipelineConfig::from(config),
            generator,
            fetcher,
            cache,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_clusterer(mut self, clusterer: Arc<dyn Clusterer>) -> Self {
        self.clusterer = clusterer;
        self
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn NarrativeSynthesizer>) -> Self {
        self.narrator = narrator;
        self
    }

    pub fn with_ordering(mut self, ordering: Arc<dyn OrderingPolicy>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Run the full pipeline over `urls`.
    ///
    /// 1. Preflight: make sure the collaborator is reachable
    /// 2. Fetch and summarize every article (bounded concurrency, cached)
    /// 3. Embed summaries
    /// 4. Cluster (single cluster on failure)
    /// 5. Narrative (key-point fallback on failure)
    /// 6. Assemble the digest
    ///
    /// Fails only when there is nothing to digest, the collaborator is
    /// unreachable, or the run is cancelled.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn run(
        &self,
        urls: &[Url],
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<DigestRun> {
        let start = Instant::now();
        let guard = Guard {
            cancel,
            deadline: self.config.deadline.map(|d| start + d),
        };

        if urls.is_empty() {
            return Err(DigestError::fatal("no valid URLs in input"));
        }
        let urls = unique_urls(urls);
        info!(
            count = urls.len(),
            concurrency = self.config.max_concurrency,
            "starting digest run"
        );

        // --- Phase 1: Preflight ---
        progress.phase("Checking text-generation service");
        settle("preflight", guard.run(self.preflight()).await?)?;

        // --- Phase 2: Fetch + summarize ---
        progress.phase("Fetching and summarizing");
        let mut results = guard.run(self.process_all(&urls, progress)).await?;
        results.sort_by_key(|(i, _)| *i);

        let mut stats = RunStats {
            requested: urls.len(),
            ..RunStats::default()
        };
        let mut articles = Vec::new();
        let mut summaries = Vec::new();
        let mut failures = Vec::new();
        for (_, result) in results {
            match result {
                Ok(done) => {
                    if done.content_hit {
                        stats.cached += 1;
                    } else {
                        stats.fetched += 1;
                    }
                    if done.summary_hit {
                        stats.summary_cache_hits += 1;
                    } else {
                        stats.summarized += 1;
                    }
                    if done.summary.is_fallback() {
                        stats.fallback_summaries += 1;
                    }
                    articles.push(done.article);
                    summaries.push(done.summary);
                }
                Err(failure) => failures.push(failure),
            }
        }
        stats.failed = failures.len();

        if articles.is_empty() {
            return Err(DigestError::fatal(format!(
                "all {} articles failed to fetch",
                urls.len()
            )));
        }

        // --- Phase 3: Embed ---
        progress.phase("Embedding");
        let texts: Vec<String> = articles
            .iter()
            .zip(&summaries)
            .map(|(a, s)| embedding_text(a, s))
            .collect();
        let embeddings = settle("embedding", guard.run(self.embed_stage(&texts)).await?)?
            .unwrap_or_default();
        stats.embedded = embeddings.len();

        // --- Phase 4: Cluster ---
        progress.phase("Clustering");
        let clusters = settle("clustering", self.cluster_stage(&articles, &embeddings))?
            .unwrap_or_else(|| vec![single_cluster(&articles, &embeddings)]);
        annotate_articles(&mut articles, &clusters, &embeddings);

        // --- Phase 5: Narrative ---
        progress.phase("Writing narrative");
        let narrative = settle(
            "narrative",
            guard
                .run(self.narrative_stage(&clusters, &articles, &summaries))
                .await?,
        )?
        .unwrap_or_default();

        // --- Phase 6: Assemble ---
        progress.phase("Assembling digest");
        let digest = assemble(
            &self.config.digest_title,
            &clusters,
            &articles,
            &summaries,
            &narrative,
            self.ordering.as_ref(),
        );
        let cache = guard.run(self.cache.stats()).await?;

        let run = DigestRun {
            digest,
            stats,
            failures,
            cache,
            elapsed: start.elapsed(),
        };
        info!(
            articles = run.digest.metadata.article_count,
            sections = run.digest.metadata.section_count,
            fetched = run.stats.fetched,
            cached = run.stats.cached,
            failed = run.stats.failed,
            elapsed_ms = run.elapsed.as_millis() as u64,
            "digest run complete"
        );
        progress.done(&run);
        Ok(run)
    }

    // -----------------------------------------------------------------------
    // Per-article work
    // -----------------------------------------------------------------------

    async fn process_all(
        &self,
        urls: &[Url],
        progress: &dyn ProgressReporter,
    ) -> Vec<(usize, ArticleResult)> {
        let total = urls.len();
        let mut finished = 0;
        stream::iter(urls.iter().enumerate())
            .map(|(i, url)| async move { (i, self.process_article(url).await) })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .inspect(|(i, result)| {
                finished += 1;
                match result {
                    Ok(_) => progress.article_done(urls[*i].as_str(), finished, total),
                    Err(failure) => progress.article_failed(failure),
                }
            })
            .collect()
            .await
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn process_article(&self, url: &Url) -> ArticleResult {
        let fetched = self
            .cache
            .content_or_fetch(url.as_str(), || self.fetcher.fetch(url))
            .await
            .map_err(|e| {
                warn!(error = %e, "article skipped");
                ArticleFailure {
                    url: url.to_string(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            })?;
        let mut article = fetched.value;

        let summarized = self
            .cache
            .summary_or_generate(&article.url, &article.content_hash, || {
                self.summarizer.summarize(&article)
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "article skipped");
                ArticleFailure {
                    url: url.to_string(),
                    kind: "empty_text".to_string(),
                    message: e.to_string(),
                }
            })?;
        let summary = summarized.value;

        if article.title.is_none() {
            article.title = summary.title.clone();
        }

        if !self.config.themes.is_empty() {
            let text = truncate_chars(&article.text, THEME_INPUT_CHARS);
            match self.generator.classify_theme(text, &self.config.themes).await {
                Ok(theme) => article.theme = Some(theme),
                Err(e) => warn!(error = %e, "theme classification failed"),
            }
        }

        Ok(Processed {
            article,
            summary,
            content_hit: fetched.hit,
            summary_hit: summarized.hit,
        })
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn preflight(&self) -> StageOutcome<()> {
        match self.generator.ping().await {
            Ok(()) => StageOutcome::Success(()),
            Err(e @ GenerationError::Unreachable(_)) => StageOutcome::fatal(e.to_string()),
            Err(e) => StageOutcome::degraded((), format!("preflight check failed: {e}")),
        }
    }

    async fn embed_stage(&self, texts: &[String]) -> StageOutcome<Vec<Vec<f32>>> {
        match self.embedder.embed(texts).await {
            Ok(vectors) => StageOutcome::Success(vectors),
            Err(e) => StageOutcome::skip(format!("embedding failed: {e}")),
        }
    }

    fn cluster_stage(
        &self,
        articles: &[Article],
        embeddings: &[Vec<f32>],
    ) -> StageOutcome<Vec<TopicCluster>> {
        if embeddings.is_empty() {
            return StageOutcome::degraded(
                vec![single_cluster(articles, embeddings)],
                "no embeddings, using a single cluster",
            );
        }
        match self.clusterer.cluster(articles, embeddings) {
            Ok(clusters) => StageOutcome::Success(clusters),
            Err(e) => StageOutcome::degraded(
                vec![single_cluster(articles, embeddings)],
                format!("clustering failed: {e}"),
            ),
        }
    }

    async fn narrative_stage(
        &self,
        clusters: &[TopicCluster],
        articles: &[Article],
        summaries: &[Summary],
    ) -> StageOutcome<Narrative> {
        let narrative = self.narrator.synthesize(clusters, articles, summaries).await;
        if narrative.degraded {
            StageOutcome::degraded(narrative, "narrative fell back to key points")
        } else {
            StageOutcome::Success(narrative)
        }
    }
}

/// Continue past a stage: its value for success or degradation, `None`
/// when skipped, an error when fatal.
fn settle<T>(stage: &'static str, outcome: StageOutcome<T>) -> Result<Option<T>> {
    match outcome {
        StageOutcome::Success(value) => Ok(Some(value)),
        StageOutcome::Degraded { value, reason } => {
            warn!(stage, %reason, "stage degraded");
            Ok(Some(value))
        }
        StageOutcome::Skip { reason } => {
            warn!(stage, %reason, "stage skipped");
            Ok(None)
        }
        StageOutcome::Fatal { reason } => Err(DigestError::fatal(reason)),
    }
}

/// Races work against cancellation and the run deadline.
#[derive(Clone, Copy)]
struct Guard<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl Guard<'_> {
    async fn run<F: Future>(&self, work: F) -> Result<F::Output> {
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("run cancelled");
                Err(DigestError::Cancelled)
            }
            _ = expired => {
                warn!("run deadline reached");
                Err(DigestError::Cancelled)
            }
            out = work => Ok(out),
        }
    }
}
