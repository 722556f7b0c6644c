//! OpenRouter client (OpenAI-compatible chat and embeddings endpoints).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use digestkit_shared::{AppConfig, DigestError, GenerationError, Theme, ThemeMatch};

use crate::{FormatHint, GenResult, TextGenerator, json_payload};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("DigestKit/", env!("CARGO_PKG_VERSION"));

const SUMMARY_SYSTEM_PROMPT: &str = "You are a precise editor who summarizes articles for a \
    reading digest. Stay faithful to the source and never invent facts.";

const NARRATIVE_SYSTEM_PROMPT: &str = "You write short, readable digest narratives that connect \
    related articles. Use plain prose without headings or lists.";

const CLASSIFY_SYSTEM_PROMPT: &str = "You label articles with the single best-fitting theme \
    from a fixed list. Reply with JSON only.";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    message: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ThemeReply {
    theme: String,
    #[serde(default)]
    relevance: f32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Connection settings for [`OpenRouterClient`].
#[derive(Debug, Clone)]
pub struct OpenRouterOptions {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

impl From<&AppConfig> for OpenRouterOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.openrouter.base_url.clone(),
            chat_model: config.openrouter.default_model.clone(),
            embedding_model: config.embedding.model.clone(),
            timeout: Duration::from_secs(config.openrouter.request_timeout_secs),
        }
    }
}

impl Default for OpenRouterOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// [`TextGenerator`] backed by the OpenRouter API.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    options: OpenRouterOptions,
}

impl fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.options.base_url)
            .field("chat_model", &self.options.chat_model)
            .field("embedding_model", &self.options.embedding_model)
            .finish()
    }
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        options: OpenRouterOptions,
    ) -> digestkit_shared::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.timeout)
            .build()
            .map_err(|e| DigestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            options: OpenRouterOptions {
                base_url: options.base_url.trim_end_matches('/').to_string(),
                ..options
            },
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.options.base_url)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .header("X-Title", "DigestKit")
    }

    /// One chat completion; returns the assistant message text.
    async fn chat(&self, system: &str, user: &str, hint: FormatHint) -> GenResult<String> {
        let request = ChatRequest {
            model: &self.options.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.3,
            response_format: (hint == FormatHint::Json).then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .post("chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;
        let body = read_body(response).await?;

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Permanent(format!("invalid chat response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(api_error(err));
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(GenerationError::Permanent("model returned no content".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    fn model_id(&self) -> &str {
        &self.options.chat_model
    }

    #[instrument(skip_all, fields(model = %self.options.chat_model, prompt_len = prompt.len()))]
    async fn generate_summary(&self, prompt: &str, hint: FormatHint) -> GenResult<String> {
        self.chat(SUMMARY_SYSTEM_PROMPT, prompt, hint).await
    }

    async fn generate_embedding(&self, text: &str) -> GenResult<Vec<f32>> {
        let mut vectors = self.generate_embeddings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| GenerationError::Permanent("no embedding returned".into()))
    }

    #[instrument(skip_all, fields(model = %self.options.embedding_model, count = texts.len()))]
    async fn generate_embeddings(&self, texts: &[String]) -> GenResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.options.embedding_model,
            input: texts,
        };
        let response = self
            .post("embeddings")
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;
        let body = read_body(response).await?;

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Permanent(format!("invalid embedding response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(api_error(err));
        }

        let mut data = parsed.data;
        if data.len() != texts.len() {
            return Err(GenerationError::Permanent(format!(
                "requested {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);
        debug!(dimension = data[0].embedding.len(), "embeddings received");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    #[instrument(skip_all, fields(model = %self.options.chat_model))]
    async fn generate_narrative(&self, context: &str) -> GenResult<String> {
        self.chat(NARRATIVE_SYSTEM_PROMPT, context, FormatHint::Text)
            .await
    }

    #[instrument(skip_all, fields(themes = themes.len()))]
    async fn classify_theme(&self, article_text: &str, themes: &[Theme]) -> GenResult<ThemeMatch> {
        if themes.is_empty() {
            return Err(GenerationError::Permanent("no themes to choose from".into()));
        }

        let prompt = theme_prompt(article_text, themes);
        let reply = self
            .chat(CLASSIFY_SYSTEM_PROMPT, &prompt, FormatHint::Json)
            .await?;
        parse_theme_reply(&reply, themes)
    }

    async fn ping(&self) -> GenResult<()> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                GenerationError::Unreachable("API key rejected".into()),
            ),
            s => {
                warn!(status = s.as_u16(), "ping returned non-success status");
                Err(GenerationError::Transient(format!("ping returned HTTP {s}")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn send_error(e: reqwest::Error) -> GenerationError {
    if e.is_connect() {
        GenerationError::Unreachable(e.to_string())
    } else {
        // Timeouts and dropped connections.
        GenerationError::Transient(e.to_string())
    }
}

/// Body of a successful response; error statuses become typed errors.
async fn read_body(response: reqwest::Response) -> GenResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GenerationError::Transient(format!("body read failed: {e}")))?;

    if status.is_success() {
        return Ok(body);
    }

    let snippet: String = body.chars().take(200).collect();
    let message = format!("HTTP {status}: {snippet}");
    if is_retryable(status) {
        Err(GenerationError::Transient(message))
    } else {
        Err(GenerationError::Permanent(message))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// An error object inside a 200 response (upstream provider failures).
fn api_error(err: ApiError) -> GenerationError {
    let code = err
        .code
        .as_ref()
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
        .and_then(|c| u16::try_from(c).ok())
        .and_then(|c| StatusCode::from_u16(c).ok());

    match code {
        Some(status) if !is_retryable(status) => GenerationError::Permanent(err.message),
        _ => GenerationError::Transient(err.message),
    }
}

fn theme_prompt(article_text: &str, themes: &[Theme]) -> String {
    let mut prompt = String::from("Themes:\n");
    for theme in themes {
        if theme.description.is_empty() {
            prompt.push_str(&format!("- {}\n", theme.name));
        } else {
            prompt.push_str(&format!("- {}: {}\n", theme.name, theme.description));
        }
    }
    prompt.push_str(
        "\nReply with {\"theme\": \"<theme name from the list>\", \"relevance\": <0.0 to 1.0>}.\n\nArticle:\n",
    );
    prompt.push_str(article_text);
    prompt
}

fn parse_theme_reply(reply: &str, themes: &[Theme]) -> GenResult<ThemeMatch> {
    let parsed: ThemeReply = serde_json::from_str(json_payload(reply))
        .map_err(|e| GenerationError::Permanent(format!("unparseable theme reply: {e}")))?;

    let theme = themes
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(parsed.theme.trim()))
        .ok_or_else(|| {
            GenerationError::Permanent(format!("model chose unknown theme {:?}", parsed.theme))
        })?;

    let relevance = if parsed.relevance.is_finite() {
        parsed.relevance.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(ThemeMatch {
        theme: theme.name.clone(),
        relevance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new(
            "test-key",
            OpenRouterOptions {
                base_url: format!("{}/api/v1/", server.uri()),
                chat_model: "test/chat".into(),
                embedding_model: "test/embed".into(),
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    fn themes() -> Vec<Theme> {
        vec![
            Theme {
                name: "Rust".into(),
                description: "The Rust language".into(),
            },
            Theme {
                name: "Gardening".into(),
                description: String::new(),
            },
        ]
    }

    #[tokio::test]
    async fn summary_request_is_authenticated_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "test/chat",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  {\"summary\":\"ok\"}  ")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let reply = client
            .generate_summary("Summarize this", FormatHint::Json)
            .await
            .unwrap();
        assert_eq!(reply, "{\"summary\":\"ok\"}");
        assert_eq!(client.model_id(), "test/chat");
    }

    #[tokio::test]
    async fn rate_limit_is_transient_and_bad_request_permanent() {
        let busy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&busy)
            .await;
        let err = client_for(&busy).generate_narrative("x").await.unwrap_err();
        assert!(err.is_transient(), "{err}");

        let rejecting = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("nope"))
            .mount(&rejecting)
            .await;
        let err = client_for(&rejecting).generate_narrative("x").await.unwrap_err();
        assert!(matches!(err, GenerationError::Permanent(_)), "{err}");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_summary("x", FormatHint::Text)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn error_object_in_ok_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 502, "message": "provider down"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_summary("x", FormatHint::Text)
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Transient("provider down".into()));
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let client = OpenRouterClient::new(
            "k",
            OpenRouterOptions {
                base_url: "http://127.0.0.1:1".into(),
                timeout: Duration::from_secs(2),
                ..OpenRouterOptions::default()
            },
        )
        .unwrap();

        let err = client.generate_narrative("x").await.unwrap_err();
        assert!(matches!(err, GenerationError::Unreachable(_)), "{err}");
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, GenerationError::Unreachable(_)), "{err}");
    }

    #[tokio::test]
    async fn embeddings_are_batched_and_ordered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "test/embed", "input": ["a", "b"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vectors = client_for(&server)
            .generate_embeddings(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn classify_theme_matches_known_theme() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                "```json\n{\"theme\": \"rust\", \"relevance\": 1.7}\n```",
            )))
            .mount(&server)
            .await;

        let matched = client_for(&server)
            .classify_theme("Borrow checker deep dive", &themes())
            .await
            .unwrap();
        assert_eq!(matched.theme, "Rust");
        assert_eq!(matched.relevance, 1.0);
    }

    #[test]
    fn unknown_theme_is_rejected() {
        let err = parse_theme_reply("{\"theme\": \"Cooking\", \"relevance\": 0.9}", &themes())
            .unwrap_err();
        assert!(matches!(err, GenerationError::Permanent(_)));
    }

    #[test]
    fn theme_prompt_lists_every_theme() {
        let prompt = theme_prompt("body text", &themes());
        assert!(prompt.contains("- Rust: The Rust language"));
        assert!(prompt.contains("- Gardening\n"));
        assert!(prompt.ends_with("body text"));
    }

    #[tokio::test]
    async fn ping_checks_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        client_for(&server).ping().await.unwrap();
    }

    #[test]
    fn debug_redacts_key() {
        let client = OpenRouterClient::new("sk-secret", OpenRouterOptions::default()).unwrap();
        let shown = format!("{client:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }
}
