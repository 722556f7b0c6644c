//! Article retrieval for DigestKit.
//!
//! This crate provides:
//! - [`classify`]: Content-type classification (web, PDF, video)
//! - [`adapters`]: Per-format text extraction and video transcripts
//! - [`rate_limit`]: Per-host request spacing
//! - [`engine`]: The [`Fetcher`] tying them together

pub mod adapters;
pub mod classify;
pub mod engine;
pub mod rate_limit;

pub use adapters::{AdapterRegistry, DocumentAdapter, ExtractedDocument, TranscriptClient};
pub use classify::{classify, classify_response};
pub use engine::Fetcher;
pub use rate_limit::HostRateLimiter;
