//! Error types for DigestKit.
//!
//! Library crates use [`DigestError`] via `thiserror`; the CLI wraps it with
//! `color-eyre`. Stage-level failures that the pipeline recovers from have
//! their own cloneable types ([`FetchError`], [`GenerationError`],
//! [`ClusterError`], [`SummarizeError`]) so a single failure can be shared
//! between every caller waiting on the same in-flight operation.

use std::path::PathBuf;

/// Top-level error type for all DigestKit operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a single article fetch.
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache store error. The cache manager treats these as misses.
    #[error("storage error: {0}")]
    Storage(String),

    /// Text-generation collaborator error.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run cannot produce a digest at all.
    #[error("pipeline aborted: {message}")]
    Fatal { message: String },

    /// The run was cancelled or hit its deadline.
    #[error("pipeline cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DigestError>;

impl DigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a fatal pipeline error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Why a single article could not be retrieved or extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS, TLS, timeout or redirect-limit failure.
    #[error("{url}: network error: {message}")]
    Network { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("{url}: HTTP {status}")]
    Http { url: String, status: u16 },

    /// The URL is not something we are willing to fetch.
    #[error("{url}: blocked: {message}")]
    Blocked { url: String, message: String },

    /// The body could not be parsed in its detected format.
    #[error("{url}: parse error: {message}")]
    Parse { url: String, message: String },

    /// Extraction succeeded but produced no usable text.
    #[error("{url}: no usable content extracted")]
    EmptyContent { url: String },

    /// A video URL whose transcript could not be obtained.
    #[error("{url}: transcript unavailable: {message}")]
    Transcript { url: String, message: String },
}

impl FetchError {
    /// The URL the failure refers to.
    pub fn url(&self) -> &str {
        match self {
            Self::Network { url, .. }
            | Self::Http { url, .. }
            | Self::Blocked { url, .. }
            | Self::Parse { url, .. }
            | Self::EmptyContent { url }
            | Self::Transcript { url, .. } => url,
        }
    }

    /// Short machine-readable failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Http { .. } => "http",
            Self::Blocked { .. } => "blocked",
            Self::Parse { .. } => "parse",
            Self::EmptyContent { .. } => "empty_content",
            Self::Transcript { .. } => "transcript",
        }
    }
}

/// Failure reported by the text-generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Timeouts, rate limits, 5xx. Worth retrying.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Rejected request or unusable response. Retrying will not help.
    #[error("generation failed: {0}")]
    Permanent(String),

    /// The service cannot be reached at all.
    #[error("text-generation service unreachable: {0}")]
    Unreachable(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Clustering could not run on the given input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClusterError {
    #[error("nothing to cluster")]
    EmptyInput,

    #[error("{articles} articles but {embeddings} embeddings")]
    CountMismatch { articles: usize, embeddings: usize },

    #[error("embedding {index} is zero or not finite")]
    InvalidVector { index: usize },
}

/// Summarization could not start for an article.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummarizeError {
    #[error("{url}: article has no text to summarize")]
    EmptyText { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DigestError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DigestError::fatal("no valid URLs in input");
        assert!(err.to_string().contains("no valid URLs"));
    }

    #[test]
    fn fetch_error_carries_url_and_kind() {
        let err = FetchError::Http {
            url: "https://example.com/a".into(),
            status: 500,
        };
        assert_eq!(err.url(), "https://example.com/a");
        assert_eq!(err.kind(), "http");
        assert_eq!(err.to_string(), "https://example.com/a: HTTP 500");
    }

    #[test]
    fn generation_error_transience() {
        assert!(GenerationError::Transient("429".into()).is_transient());
        assert!(!GenerationError::Permanent("bad request".into()).is_transient());
        assert!(!GenerationError::Unreachable("refused".into()).is_transient());

        let top: DigestError = GenerationError::Unreachable("refused".into()).into();
        assert!(top.to_string().contains("unreachable"));
    }
}
