//! Rate-limited, format-aware article fetcher.
//!
//! A fetch classifies the URL, retrieves the body (or the transcript for
//! video URLs), runs the matching adapter on the blocking pool and returns
//! an [`Article`]. Every failure is a typed [`FetchError`] for the caller
//! to record and skip; nothing here aborts a run.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::{debug, info, instrument, warn};
use url::Url;

use digestkit_shared::{Article, ContentType, DigestError, FetchConfig, FetchError, Result};

use crate::adapters::{AdapterRegistry, ExtractedDocument, TranscriptClient};
use crate::classify::{classify, classify_response};
use crate::rate_limit::HostRateLimiter;

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("DigestKit/", env!("CARGO_PKG_VERSION"));

/// A successful response body with the headers classification needs.
struct FetchedBody {
    bytes: Vec<u8>,
    content_type: Option<String>,
    content_disposition: Option<String>,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetches single articles. Cheap to share behind an `Arc`.
pub struct Fetcher {
    config: FetchConfig,
    client: Client,
    limiter: Arc<HostRateLimiter>,
    registry: AdapterRegistry,
    transcripts: TranscriptClient,
}

impl Fetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            limiter: Arc::new(HostRateLimiter::new(config.rate_limit)),
            transcripts: TranscriptClient::new(client.clone()),
            registry: AdapterRegistry::new(),
            client,
            config,
        })
    }

    /// Send video transcript lookups to another origin.
    pub fn with_transcript_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transcripts = TranscriptClient::new(self.client.clone()).with_base_url(base_url);
        self
    }

    /// Fetch and extract one article.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> std::result::Result<Article, FetchError> {
        if !self.config.allow_private_hosts && is_ssrf_target(url) {
            warn!("SSRF protection: blocked");
            return Err(FetchError::Blocked {
                url: url.to_string(),
                message: "private or non-HTTP target".into(),
            });
        }

        let started = Instant::now();

        let (content_type, doc) = match classify(url) {
            ContentType::Video => {
                let doc = self.transcripts.fetch(url, &self.limiter).await?;
                (ContentType::Video, doc)
            }
            _ => self.fetch_document(url).await?,
        };

        if doc.text.trim().is_empty() {
            return Err(FetchError::EmptyContent {
                url: url.to_string(),
            });
        }

        let mut article = Article::new(url.as_str(), content_type, doc.title, doc.text);
        article.raw_content = doc.raw;

        info!(
            content_type = %article.content_type,
            words = article.word_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "article fetched"
        );

        Ok(article)
    }

    /// GET a web page or PDF and run the matching adapter.
    async fn fetch_document(
        &self,
        url: &Url,
    ) -> std::result::Result<(ContentType, ExtractedDocument), FetchError> {
        let body = self.get(url).await?;
        let content_type = classify_response(
            url,
            body.content_type.as_deref(),
            body.content_disposition.as_deref(),
            &body.bytes,
        );

        let adapter = self.registry.for_type(content_type);
        debug!(adapter = adapter.name(), bytes = body.bytes.len(), "extracting");

        let task_url = url.clone();
        let bytes = body.bytes;
        let doc = tokio::task::spawn_blocking(move || adapter.extract(&task_url, &bytes))
            .await
            .map_err(|e| FetchError::Parse {
                url: url.to_string(),
                message: format!("extraction task failed: {e}"),
            })??;

        Ok((content_type, doc))
    }

    /// Rate-limited GET enforcing status and size limits.
    async fn get(&self, url: &Url) -> std::result::Result<FetchedBody, FetchError> {
        if let Some(host) = url.host_str() {
            self.limiter.acquire(host).await;
        }

        let network_err = |message: String| FetchError::Network {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| network_err(describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let max = self.config.max_response_bytes;
        if let Some(len) = response.content_length() {
            if len > max as u64 {
                return Err(FetchError::Blocked {
                    url: url.to_string(),
                    message: format!("response too large ({len} bytes, max {max})"),
                });
            }
        }

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| network_err(format!("body read failed: {e}")))?;

        if bytes.len() > max {
            return Err(FetchError::Blocked {
                url: url.to_string(),
                message: format!("response too large ({} bytes, max {max})", bytes.len()),
            });
        }

        Ok(FetchedBody {
            bytes: bytes.to_vec(),
            content_type,
            content_disposition,
        })
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else if e.is_redirect() {
        format!("too many redirects: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
