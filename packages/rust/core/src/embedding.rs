//! Batched embedding generation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use digestkit_llm::TextGenerator;
use digestkit_shared::{Article, EmbeddingConfig, GenerationError, Summary};

use crate::retry::{RetryPolicy, with_retries};

/// Maps texts to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed `texts`, one vector per text in the same order.
    ///
    /// # Panics
    ///
    /// If the collaborator returns a vector whose length is not
    /// [`Embedder::dimension`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GenerationError>;
}

/// [`Embedder`] backed by a [`TextGenerator`], in `batch_size` chunks.
pub struct LlmEmbedder {
    generator: Arc<dyn TextGenerator>,
    config: EmbeddingConfig,
}

impl LlmEmbedder {
    pub fn new(generator: Arc<dyn TextGenerator>, config: EmbeddingConfig) -> Self {
        Self { generator, config }
    }
}

#[async_trait]
impl Embedder for LlmEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    #[instrument(skip_all, fields(texts = texts.len(), batch_size = self.config.batch_size))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GenerationError> {
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            initial: self.config.retry_initial,
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let out = with_retries(policy, "embedding", || {
                self.generator.generate_embeddings(batch)
            })
            .await?;

            if out.len() != batch.len() {
                return Err(GenerationError::Permanent(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    out.len()
                )));
            }
            for v in &out {
                assert_eq!(
                    v.len(),
                    self.config.dimension,
                    "embedding dimension is fixed for the run"
                );
            }
            vectors.extend(out);
        }

        debug!(vectors = vectors.len(), "embeddings generated");
        Ok(vectors)
    }
}

/// Text embedded for an article: its title, summary and key points.
pub fn embedding_text(article: &Article, summary: &Summary) -> String {
    let title = summary
        .title
        .as_deref()
        .unwrap_or_else(|| article.display_title());
    let mut text = format!("{title}\n\n{}", summary.text);
    for point in &summary.key_points {
        text.push_str("\n- ");
        text.push_str(point);
    }
    text
}
