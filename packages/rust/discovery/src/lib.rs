//! URL discovery: turns free text, Markdown, or a remote reading list into a
//! deduplicated list of canonical article URLs.
//!
//! Extraction is pure and never fails; text without links yields an empty
//! list and the caller decides whether that is fatal.

mod links;
mod normalize;

use std::collections::HashSet;

use digestkit_shared::{DigestError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use normalize::normalize_url;

/// Maximum number of redirects to follow when fetching a reading list.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds for fetching a reading list.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum reading-list size we accept (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("DigestKit/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract every HTTP(S) URL from `text`, canonicalized, in order of first
/// appearance. URLs that normalize to the same form appear once.
pub fn extract_urls(text: &str) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for raw in links::scan_links(text) {
        let Some(url) = normalize_url(&raw) else {
            debug!(%raw, "skipping unparseable link");
            continue;
        };
        if seen.insert(url.as_str().to_string()) {
            urls.push(url);
        }
    }

    debug!(count = urls.len(), "extracted urls");
    urls
}

// ---------------------------------------------------------------------------
// Remote reading lists
// ---------------------------------------------------------------------------

/// Configuration for fetching a remote reading list.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Download a text/Markdown reading list and extract its URLs.
///
/// The list's own URL is never part of the result.
#[instrument(skip_all, fields(url = %url))]
pub async fn fetch_reading_list(url: &Url, opts: &DiscoveryOptions) -> Result<Vec<Url>> {
    let client = build_client(opts)?;
    let body = fetch_text(&client, url.as_str()).await?;

    let own = normalize_url(url.as_str());
    let urls: Vec<Url> = extract_urls(&body)
        .into_iter()
        .filter(|u| Some(u) != own.as_ref())
        .collect();

    info!(count = urls.len(), "reading list fetched");
    Ok(urls)
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch a URL as text, enforcing status and size limits.
async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DigestError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(DigestError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| DigestError::Network(format!("{url}: failed to read body: {e}")))
}
