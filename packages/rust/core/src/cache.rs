//! Cache manager: TTL- and hash-checked access to fetched content and
//! generated summaries, with per-key deduplication of in-flight work.
//!
//! Store failures never fail a run. A failed read is a miss and a failed
//! write is logged and dropped.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use digestkit_shared::{
    Article, CacheConfig, CacheEntry, CacheKind, FetchError, Result, Summary, SummarizeError,
};
use digestkit_storage::{CacheStore, StoreCounts};

use crate::singleflight::SingleFlight;

/// A value together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    /// Served from the store rather than produced by this call.
    pub hit: bool,
}

/// Counters and store sizes reported by [`CacheManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Summary entries rejected because the article text changed.
    pub invalidations: u64,
    /// Store reads or writes that failed.
    pub errors: u64,
    pub content_entries: u64,
    pub summary_entries: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the store.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type ContentResult = std::result::Result<Cached<Article>, FetchError>;
type SummaryResult = std::result::Result<Cached<Summary>, SummarizeError>;

/// Shared, long-lived cache front end used by every article task in a run.
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    counters: Counters,
    content_flights: SingleFlight<ContentResult>,
    summary_flights: SingleFlight<SummaryResult>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            counters: Counters::default(),
            content_flights: SingleFlight::new(),
            summary_flights: SingleFlight::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Cached article for `url`, if present and younger than the content TTL.
    pub async fn get_content(&self, url: &str) -> Option<Article> {
        let entry = self.lookup(CacheKind::Content, url).await?;
        if self.expired(&entry, self.config.content_ttl) {
            debug!(url, "content entry expired");
            Counters::bump(&self.counters.misses);
            self.evict(CacheKind::Content, url).await;
            return None;
        }
        let article = self.decode(entry);
        if article.is_none() {
            self.evict(CacheKind::Content, url).await;
        }
        article
    }

    /// Store a fetched article.
    pub async fn put_content(&self, article: &Article) {
        self.store_entry(
            CacheKind::Content,
            &article.url,
            Some(&article.content_hash),
            article,
        )
        .await;
    }

    /// Return the cached article for `url` or run `fetch` and cache its
    /// result. Concurrent calls for one URL share a single fetch.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn content_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> ContentResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Article, FetchError>>,
    {
        let (result, _) = self
            .content_flights
            .run(url, || async {
                if let Some(article) = self.get_content(url).await {
                    return Ok(Cached {
                        value: article,
                        hit: true,
                    });
                }
                let article = fetch().await?;
                self.put_content(&article).await;
                Ok(Cached {
                    value: article,
                    hit: false,
                })
            })
            .await;
        result
    }

    // -----------------------------------------------------------------------
    // Summaries
    // -----------------------------------------------------------------------

    /// Cached summary for `url`, valid only for the same content hash and
    /// within the summary TTL.
    pub async fn get_summary(&self, url: &str, content_hash: &str) -> Option<Summary> {
        let entry = self.lookup(CacheKind::Summary, url).await?;
        if entry.content_hash.as_deref() != Some(content_hash) {
            debug!(url, "summary entry invalidated by content change");
            Counters::bump(&self.counters.invalidations);
            Counters::bump(&self.counters.misses);
            return None;
        }
        if self.expired(&entry, self.config.summary_ttl) {
            debug!(url, "summary entry expired");
            Counters::bump(&self.counters.misses);
            self.evict(CacheKind::Summary, url).await;
            return None;
        }
        let summary = self.decode(entry);
        if summary.is_none() {
            self.evict(CacheKind::Summary, url).await;
        }
        summary
    }

    /// Store a summary derived from text with `content_hash`.
    pub async fn put_summary(&self, url: &str, content_hash: &str, summary: &Summary) {
        self.store_entry(CacheKind::Summary, url, Some(content_hash), summary)
            .await;
    }

    /// Return the cached summary or run `generate`. Concurrent calls for the
    /// same `(url, content_hash)` share one generation. Fallback summaries
    /// are returned but not stored, so a later run asks the collaborator
    /// again.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn summary_or_generate<F, Fut>(
        &self,
        url: &str,
        content_hash: &str,
        generate: F,
    ) -> SummaryResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Summary, SummarizeError>>,
    {
        let key = format!("{url}#{content_hash}");
        let (result, _) = self
            .summary_flights
            .run(&key, || async {
                if let Some(summary) = self.get_summary(url, content_hash).await {
                    return Ok(Cached {
                        value: summary,
                        hit: true,
                    });
                }
                let summary = generate().await?;
                if !summary.is_fallback() {
                    self.put_summary(url, content_hash, &summary).await;
                }
                Ok(Cached {
                    value: summary,
                    hit: false,
                })
            })
            .await;
        result
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Counters for this manager plus the store's entry counts.
    pub async fn stats(&self) -> CacheStats {
        let counts = match self.store.counts().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cache store count failed");
                Counters::bump(&self.counters.errors);
                StoreCounts::default()
            }
        };

        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            content_entries: counts.content,
            summary_entries: counts.summary,
        }
    }

    /// Remove every entry. Returns the number removed.
    pub async fn clear(&self) -> Result<u64> {
        self.store.clear().await
    }

    /// Remove entries older than their kind's TTL. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut removed = 0;
        for (kind, ttl) in [
            (CacheKind::Content, self.config.content_ttl),
            (CacheKind::Summary, self.config.summary_ttl),
        ] {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);
            removed += self.store.purge_older_than(kind, cutoff).await?;
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Raw store lookup. Store errors count as misses.
    async fn lookup(&self, kind: CacheKind, key: &str) -> Option<CacheEntry> {
        match self.store.get(kind, key).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                None
            }
            Err(e) => {
                warn!(kind = kind.as_str(), key, error = %e, "cache read failed, treating as miss");
                Counters::bump(&self.counters.errors);
                Counters::bump(&self.counters.misses);
                None
            }
        }
    }

    /// An entry is fresh only while its age is strictly below the TTL.
    fn expired(&self, entry: &CacheEntry, ttl: Duration) -> bool {
        let age = (Utc::now() - entry.created_at).to_std().unwrap_or(Duration::ZERO);
        age >= ttl
    }

    /// Drop an entry that can never be served again.
    async fn evict(&self, kind: CacheKind, key: &str) {
        if let Err(e) = self.store.remove(kind, key).await {
            warn!(kind = kind.as_str(), key, error = %e, "cache evict failed");
            Counters::bump(&self.counters.errors);
        }
    }

    fn decode<T: DeserializeOwned>(&self, entry: CacheEntry) -> Option<T> {
        match serde_json::from_str(&entry.payload) {
            Ok(value) => {
                Counters::bump(&self.counters.hits);
                Some(value)
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "undecodable cache entry, treating as miss");
                Counters::bump(&self.counters.errors);
                Counters::bump(&self.counters.misses);
                None
            }
        }
    }

    async fn store_entry<T: Serialize>(
        &self,
        kind: CacheKind,
        key: &str,
        content_hash: Option<&str>,
        value: &T,
    ) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "cache payload serialization failed");
                return;
            }
        };

        let entry = CacheEntry {
            kind,
            key: key.to_string(),
            content_hash: content_hash.map(str::to_string),
            payload,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.put(&entry).await {
            warn!(kind = kind.as_str(), key, error = %e, "cache write failed");
            Counters::bump(&self.counters.errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingStore, sample_article, sample_summary};
    use digestkit_storage::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> (Arc<MemoryStore>, CacheManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = CacheManager::new(store.clone(), CacheConfig::default());
        (store, manager)
    }

    #[tokio::test]
    async fn content_roundtrip_is_idempotent() {
        let (_, cache) = manager();
        let article = sample_article("https://example.com/a", "Rust ownership", "Body text here.");

        assert!(cache.get_content(&article.url).await.is_none());
        cache.put_content(&article).await;
        cache.put_content(&article).await;

        let got = cache.get_content(&article.url).await.unwrap();
        assert_eq!(got, article);
        let stats = cache.stats().await;
        assert_eq!(stats.content_entries, 1);
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn expired_content_is_a_miss() {
        let (store, cache) = manager();
        let article = sample_article("https://example.com/old", "Old", "Stale text.");
        let entry = CacheEntry {
            kind: CacheKind::Content,
            key: article.url.clone(),
            content_hash: Some(article.content_hash.clone()),
            payload: serde_json::to_string(&article).unwrap(),
            created_at: Utc::now() - chrono::Duration::hours(25),
        };
        store.put(&entry).await.unwrap();

        assert!(cache.get_content(&article.url).await.is_none());
        assert_eq!(cache.stats().await.content_entries, 0);

        store.put(&entry).await.unwrap();
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().await.content_entries, 0);
    }

    #[tokio::test]
    async fn zero_ttl_never_serves_a_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(
            store.clone(),
            CacheConfig {
                content_ttl: Duration::ZERO,
                summary_ttl: Duration::ZERO,
            },
        );
        let article = sample_article("https://example.com/now", "Now", "Fresh text.");
        let summary = sample_summary(&article, "test-model");

        cache.put_content(&article).await;
        cache
            .put_summary(&article.url, &article.content_hash, &summary)
            .await;

        assert!(cache.get_content(&article.url).await.is_none());
        assert!(
            cache
                .get_summary(&article.url, &article.content_hash)
                .await
                .is_none()
        );
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!((stats.content_entries, stats.summary_entries), (0, 0));
    }

    #[tokio::test]
    async fn undecodable_entry_is_dropped() {
        let (store, cache) = manager();
        store
            .put(&CacheEntry {
                kind: CacheKind::Content,
                key: "https://example.com/bad".into(),
                content_hash: None,
                payload: "{not json".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(cache.get_content("https://example.com/bad").await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.content_entries, 0);
        assert!((stats.hit_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn hit_ratio_counts_lookups() {
        let (_, cache) = manager();
        let article = sample_article("https://example.com/r", "R", "Ratio text.");
        assert!(cache.get_content(&article.url).await.is_none());
        cache.put_content(&article).await;
        assert!(cache.get_content(&article.url).await.is_some());
        assert!(cache.get_content(&article.url).await.is_some());
        assert!(cache.get_content(&article.url).await.is_some());

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (3, 1));
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn summary_invalidated_by_content_hash() {
        let (_, cache) = manager();
        let article = sample_article("https://example.com/a", "A", "Original text.");
        let summary = sample_summary(&article, "test-model");

        cache
            .put_summary(&article.url, &article.content_hash, &summary)
            .await;
        assert_eq!(
            cache.get_summary(&article.url, &article.content_hash).await,
            Some(summary)
        );

        let changed = digestkit_shared::content_hash("Edited text.");
        assert!(cache.get_summary(&article.url, &changed).await.is_none());
        assert_eq!(cache.stats().await.invalidations, 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_for_one_url_share_a_fetch() {
        let (_, cache) = manager();
        let cache = Arc::new(cache);
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .content_or_fetch("https://example.com/a", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(sample_article("https://example.com/a", "A", "Shared body."))
                    })
                    .await
            }));
        }
        for handle in handles {
            let cached = handle.await.unwrap().unwrap();
            assert_eq!(cached.value.text, "Shared body.");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Later calls are served from the store.
        let again = cache
            .content_or_fetch("https://example.com/a", || async {
                Err(FetchError::EmptyContent {
                    url: "refetched".into(),
                })
            })
            .await
            .unwrap();
        assert!(again.hit);
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let (_, cache) = manager();
        let url = "https://example.com/down";
        let err = cache
            .content_or_fetch(url, || async {
                Err(FetchError::Http {
                    url: url.into(),
                    status: 503,
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "http");
        assert_eq!(cache.stats().await.content_entries, 0);
    }

    #[tokio::test]
    async fn fallback_summaries_are_not_stored() {
        let (_, cache) = manager();
        let article = sample_article("https://example.com/a", "A", "Text.");
        let fallback = sample_summary(&article, digestkit_shared::FALLBACK_MODEL);

        let got = cache
            .summary_or_generate(&article.url, &article.content_hash, || async {
                Ok(fallback.clone())
            })
            .await
            .unwrap();
        assert!(!got.hit);
        assert_eq!(cache.stats().await.summary_entries, 0);

        let real = sample_summary(&article, "test-model");
        cache
            .summary_or_generate(&article.url, &article.content_hash, || async {
                Ok(real.clone())
            })
            .await
            .unwrap();
        let again = cache
            .summary_or_generate(&article.url, &article.content_hash, || async {
                Err(SummarizeError::EmptyText {
                    url: "regenerated".into(),
                })
            })
            .await
            .unwrap();
        assert!(again.hit);
        assert_eq!(again.value.model, "test-model");
    }

    #[tokio::test]
    async fn store_failures_degrade_to_misses() {
        let cache = CacheManager::new(Arc::new(FailingStore), CacheConfig::default());
        let article = sample_article("https://example.com/a", "A", "Text.");

        cache.put_content(&article).await;
        assert!(cache.get_content(&article.url).await.is_none());

        let fetched = cache
            .content_or_fetch(&article.url, || async { Ok(article.clone()) })
            .await
            .unwrap();
        assert!(!fetched.hit);

        let stats = cache.stats().await;
        assert!(stats.errors >= 3);
        assert_eq!(stats.hits, 0);
        assert!(cache.clear().await.is_err());
    }
}
