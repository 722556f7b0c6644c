//! Shared types, error model, and configuration for DigestKit.
//!
//! This crate is the foundation depended on by all other DigestKit crates.
//! It provides:
//! - [`DigestError`]: the unified error type, plus the per-stage errors
//! - Domain types ([`Article`], [`Summary`], [`TopicCluster`], [`Digest`], ...)
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CacheConfig, CacheSettings, ClusterConfig, ClusterSettings, DefaultsConfig,
    EmbeddingConfig, EmbeddingSettings, FetchConfig, FetchPolicyConfig, MAX_CLUSTERS, NarrativeConfig,
    NarrativeSettings, OpenRouterConfig, PipelineConfig, SummarizeConfig, SummarizeSettings,
    ThemeEntry, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{ClusterError, DigestError, FetchError, GenerationError, Result, SummarizeError};
pub use types::{
    Article, ArticleFailure, ArticleId, CacheEntry, CacheKind, ContentType, Digest,
    DigestMetadata, DigestSection, FALLBACK_MODEL, RunStats, Summary, Theme, ThemeMatch,
    TopicCluster, content_hash,
};
