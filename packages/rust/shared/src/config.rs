//! Application configuration for DigestKit.
//!
//! User config lives at `~/.digestkit/digestkit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};
use crate::types::Theme;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "digestkit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".digestkit";

/// Upper bound on the number of topic clusters in a digest.
pub const MAX_CLUSTERS: usize = 5;

// ---------------------------------------------------------------------------
// Config structs (matching digestkit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Fetch policy.
    #[serde(default)]
    pub fetch: FetchPolicyConfig,

    /// Cache location and lifetimes.
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub summarize: SummarizeSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub narrative: NarrativeSettings,

    /// Classification themes. Empty disables theme classification.
    #[serde(default)]
    pub themes: Vec<ThemeEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory digests are written to when no output path is given.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum articles fetched and summarized at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Title given to assembled digests.
    #[serde(default = "default_digest_title")]
    pub digest_title: String,

    /// Abort the run after this many seconds. Unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrency: default_max_concurrency(),
            digest_title: default_digest_title(),
            deadline_secs: None,
        }
    }
}

fn default_output_dir() -> String {
    "~/digestkit-digests".into()
}
fn default_max_concurrency() -> usize {
    5
}
fn default_digest_title() -> String {
    "Daily Digest".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model used for summaries, narratives and classification.
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            default_model: default_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_request_timeout() -> u64 {
    60
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicyConfig {
    /// Minimum ms between requests to the same host.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Responses larger than this are rejected.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Permit loopback and private-network targets.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchPolicyConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: default_rate_limit(),
            max_redirects: default_max_redirects(),
            timeout_secs: default_fetch_timeout(),
            max_response_bytes: default_max_response_bytes(),
            allow_private_hosts: false,
        }
    }
}

fn default_rate_limit() -> u64 {
    1000
}
fn default_max_redirects() -> usize {
    3
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_response_bytes() -> usize {
    25 * 1024 * 1024
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// libSQL database file.
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Lifetime of fetched content.
    #[serde(default = "default_content_ttl")]
    pub content_ttl_secs: u64,

    /// Lifetime of generated summaries.
    #[serde(default = "default_summary_ttl")]
    pub summary_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            content_ttl_secs: default_content_ttl(),
            summary_ttl_secs: default_summary_ttl(),
        }
    }
}

fn default_cache_path() -> String {
    "~/.digestkit/cache.db".into()
}
fn default_content_ttl() -> u64 {
    24 * 60 * 60
}
fn default_summary_ttl() -> u64 {
    7 * 24 * 60 * 60
}

/// `[summarize]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeSettings {
    #[serde(default = "default_target_words")]
    pub target_words: usize,

    /// Retries after the first attempt, transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Article text beyond this many characters is cut before prompting.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for SummarizeSettings {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            max_retries: default_max_retries(),
            retry_initial_ms: default_retry_initial_ms(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_target_words() -> usize {
    150
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_initial_ms() -> u64 {
    500
}
fn default_max_input_chars() -> usize {
    24_000
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Every vector in a run must have exactly this many components.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".into()
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_batch_size() -> usize {
    16
}

/// `[cluster]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Fixed cluster count. Unset selects k automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,

    #[serde(default = "default_min_k")]
    pub min_k: usize,

    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// Mean pairwise cosine similarity a cluster must exceed.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            k: None,
            min_k: default_min_k(),
            max_k: default_max_k(),
            similarity_threshold: default_similarity_threshold(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_min_k() -> usize {
    2
}
fn default_max_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_max_iterations() -> usize {
    50
}

/// `[narrative]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeSettings {
    /// Articles highlighted per cluster.
    #[serde(default = "default_highlights")]
    pub highlights: usize,

    #[serde(default = "default_narrative_words")]
    pub target_words: usize,
}

impl Default for NarrativeSettings {
    fn default() -> Self {
        Self {
            highlights: default_highlights(),
            target_words: default_narrative_words(),
        }
    }
}

fn default_highlights() -> usize {
    3
}
fn default_narrative_words() -> usize {
    250
}

/// `[[themes]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub rate_limit: Duration,
    pub max_redirects: usize,
    pub timeout: Duration,
    pub max_response_bytes: usize,
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            rate_limit: Duration::from_millis(config.fetch.rate_limit_ms),
            max_redirects: config.fetch.max_redirects,
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_response_bytes: config.fetch.max_response_bytes,
            allow_private_hosts: config.fetch.allow_private_hosts,
        }
    }
}

/// Runtime cache lifetimes.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub content_ttl: Duration,
    pub summary_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CacheConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            content_ttl: Duration::from_secs(config.cache.content_ttl_secs),
            summary_ttl: Duration::from_secs(config.cache.summary_ttl_secs),
        }
    }
}

/// Runtime summarizer settings.
#[derive(Debug, Clone)]
pub struct SummarizeConfig {
    pub target_words: usize,
    pub max_retries: u32,
    pub retry_initial: Duration,
    pub max_input_chars: usize,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SummarizeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            target_words: config.summarize.target_words,
            max_retries: config.summarize.max_retries,
            retry_initial: Duration::from_millis(config.summarize.retry_initial_ms),
            max_input_chars: config.summarize.max_input_chars,
        }
    }
}

/// Runtime embedding settings. Shares retry policy with the summarizer.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_initial: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EmbeddingConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            dimension: config.embedding.dimension,
            batch_size: config.embedding.batch_size.max(1),
            max_retries: config.summarize.max_retries,
            retry_initial: Duration::from_millis(config.summarize.retry_initial_ms),
        }
    }
}

/// Runtime clustering settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub k: Option<usize>,
    pub min_k: usize,
    pub max_k: usize,
    pub similarity_threshold: f32,
    pub max_iterations: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ClusterConfig {
    fn from(config: &AppConfig) -> Self {
        let max_k = config.cluster.max_k.clamp(1, MAX_CLUSTERS);
        Self {
            k: config.cluster.k.map(|k| k.clamp(1, MAX_CLUSTERS)),
            min_k: config.cluster.min_k.clamp(1, max_k),
            max_k,
            similarity_threshold: config.cluster.similarity_threshold,
            max_iterations: config.cluster.max_iterations.max(1),
        }
    }
}

/// Runtime narrative settings.
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub highlights: usize,
    pub target_words: usize,
    pub max_retries: u32,
    pub retry_initial: Duration,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for NarrativeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            highlights: config.narrative.highlights,
            target_words: config.narrative.target_words,
            max_retries: config.summarize.max_retries,
            retry_initial: Duration::from_millis(config.summarize.retry_initial_ms),
        }
    }
}

/// Runtime orchestration settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrency: usize,
    pub digest_title: String,
    pub deadline: Option<Duration>,
    /// Enabled classification themes.
    pub themes: Vec<Theme>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.defaults.max_concurrency.max(1),
            digest_title: config.defaults.digest_title.clone(),
            deadline: config.defaults.deadline_secs.map(Duration::from_secs),
            themes: config
                .themes
                .iter()
                .filter(|t| t.enabled)
                .map(|t| Theme {
                    name: t.name.clone(),
                    description: t.description.clone(),
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.digestkit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DigestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.digestkit/digestkit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| DigestError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DigestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DigestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DigestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DigestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DigestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the env var named in the config.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DigestError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
