//! Text-generation collaborator for DigestKit.
//!
//! [`TextGenerator`] is everything the pipeline asks of a language model:
//! summaries, embeddings, narratives and theme classification. The
//! production implementation is [`OpenRouterClient`]; tests substitute
//! scripted mocks.

pub mod openrouter;

use async_trait::async_trait;
use digestkit_shared::{GenerationError, Theme, ThemeMatch};

pub use openrouter::{OpenRouterClient, OpenRouterOptions};

/// Result alias for collaborator calls.
pub type GenResult<T> = std::result::Result<T, GenerationError>;

/// Response shape requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    /// A single JSON object.
    Json,
    /// Free text.
    Text,
}

/// A language-model service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier recorded on generated summaries.
    fn model_id(&self) -> &str;

    /// Complete a summarization prompt.
    async fn generate_summary(&self, prompt: &str, hint: FormatHint) -> GenResult<String>;

    /// Embed one text.
    async fn generate_embedding(&self, text: &str) -> GenResult<Vec<f32>>;

    /// Embed several texts, preserving order.
    ///
    /// The default issues one call per text; services with a batch endpoint
    /// should override it.
    async fn generate_embeddings(&self, texts: &[String]) -> GenResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.generate_embedding(text).await?);
        }
        Ok(out)
    }

    /// Write narrative prose from the given context.
    async fn generate_narrative(&self, context: &str) -> GenResult<String>;

    /// Pick the theme that best fits an article.
    async fn classify_theme(&self, article_text: &str, themes: &[Theme]) -> GenResult<ThemeMatch>;

    /// Cheap reachability check before a run starts.
    async fn ping(&self) -> GenResult<()> {
        Ok(())
    }
}

/// The JSON object inside a model reply.
///
/// Models often wrap JSON in a Markdown code fence or add a sentence before
/// it; this returns the outermost `{...}` span, or the trimmed reply when
/// there is none.
pub fn json_payload(reply: &str) -> &str {
    let trimmed = reply.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payload_strips_fences_and_chatter() {
        assert_eq!(json_payload("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(
            json_payload("```json\n{\"a\": {\"b\": 2}}\n```"),
            "{\"a\": {\"b\": 2}}"
        );
        assert_eq!(
            json_payload("Sure! Here it is: {\"a\":1} Hope that helps."),
            "{\"a\":1}"
        );
        assert_eq!(json_payload("  plain text  "), "plain text");
    }
}
