//! Format adapters that turn a fetched body into article text.
//!
//! Body-based formats (web pages, PDFs) implement [`DocumentAdapter`] and are
//! looked up by [`ContentType`] in the [`AdapterRegistry`]. Video transcripts
//! need their own network round trips and live in [`video`].

mod pdf;
pub mod video;
mod web;

use std::sync::Arc;

use digestkit_shared::{ContentType, FetchError};
use url::Url;

pub use pdf::PdfAdapter;
pub use video::TranscriptClient;
pub use web::WebAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Text extracted by an adapter, before it becomes an `Article`.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    /// Cleaned plain text; may be empty, the engine rejects that.
    pub text: String,
    /// Decoded body worth keeping for re-extraction.
    pub raw: Option<String>,
}

/// Extraction for one body-based content type.
///
/// Extraction is synchronous CPU work; the engine runs it on the blocking
/// pool.
pub trait DocumentAdapter: Send + Sync {
    /// Which content type this adapter handles.
    fn content_type(&self) -> ContentType;

    /// Extract text from the response body.
    fn extract(&self, url: &Url, body: &[u8]) -> Result<ExtractedDocument, FetchError>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds the registered body adapters.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn DocumentAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with the built-in web and PDF adapters.
    pub fn new() -> Self {
        Self {
            adapters: vec![Arc::new(WebAdapter), Arc::new(PdfAdapter)],
        }
    }

    /// The adapter for `content_type`, falling back to the web adapter.
    pub fn for_type(&self, content_type: ContentType) -> Arc<dyn DocumentAdapter> {
        self.adapters
            .iter()
            .find(|a| a.content_type() == content_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(WebAdapter))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
