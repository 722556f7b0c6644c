//! Digest pipeline orchestration and domain logic for DigestKit.
//!
//! This crate ties together fetching, caching, summarization, embedding,
//! clustering and narrative synthesis into a single run ([`Pipeline::run`])
//! that turns a list of URLs into a [`Digest`](digestkit_shared::Digest).

pub mod assembler;
pub mod cache;
pub mod cluster;
pub mod embedding;
pub mod narrative;
pub mod outcome;
pub mod pipeline;
pub mod retry;
pub mod singleflight;
pub mod summarizer;

#[cfg(test)]
mod testing;

pub use assembler::{IdentityOrdering, LargestFirst, OrderingPolicy, assemble, write_digest};
pub use cache::{CacheManager, CacheStats, Cached};
pub use cluster::{Clusterer, KMeansClusterer};
pub use embedding::{Embedder, LlmEmbedder};
pub use narrative::{LlmNarrativeSynthesizer, Narrative, NarrativeSynthesizer};
pub use outcome::StageOutcome;
pub use pipeline::{ContentFetcher, DigestRun, Pipeline, ProgressReporter, SilentProgress};
pub use summarizer::{LlmSummarizer, Summarizer};
