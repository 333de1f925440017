//! OpenAI-compatible embedding and generation backends.
//!
//! This module is only available when the `openai` feature is enabled. Both
//! backends share one HTTP client setup and accept a custom base URL, so they
//! also work against compatible servers (Ollama, vLLM, LM Studio).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::TextGenerator;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Output size of `text-embedding-3-small`.
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Authenticated access to one API base. Failures are plain messages that
/// each backend wraps in its own error variant.
struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl ApiClient {
    fn new(api_key: String) -> std::result::Result<Self, String> {
        if api_key.trim().is_empty() {
            return Err("API key must not be empty".to_string());
        }
        Ok(Self { http: reqwest::Client::new(), api_key, api_base: OPENAI_API_BASE.to_string() })
    }

    fn from_env() -> std::result::Result<Self, String> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => Self::new(key),
            _ => Err("OPENAI_API_KEY environment variable not set".to_string()),
        }
    }

    fn set_base(&mut self, api_base: String) {
        self.api_base = api_base.trim_end_matches('/').to_string();
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> std::result::Result<R, String> {
        let response = self
            .http
            .post(format!("{}/{path}", self.api_base))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request to /{path} failed: {e}"))?;
        let response = Self::check(response).await?;
        response.json().await.map_err(|e| format!("failed to parse /{path} response: {e}"))
    }

    async fn get(&self, path: &str) -> std::result::Result<(), String> {
        let response = self
            .http
            .get(format!("{}/{path}", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| format!("backend unreachable: {e}"))?;
        Self::check(response).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> std::result::Result<reqwest::Response, String> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiError>(&body).map(|e| e.error.message).unwrap_or(body);
        Err(format!("API returned {status}: {detail}"))
    }
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// An [`EmbeddingProvider`] backed by the `/embeddings` endpoint.
///
/// Defaults to `text-embedding-3-small` (1536 dimensions). The key comes
/// from the constructor or `OPENAI_API_KEY`.
///
/// ```rust,ignore
/// use docchat_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(512);
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    api: ApiClient,
    model: String,
    dimensions: usize,
    /// Sent to the API to shorten embeddings when set.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        ApiClient::new(api_key.into()).map(Self::with_client).map_err(unavailable)
    }

    /// Create a provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        ApiClient::from_env().map(Self::with_client).map_err(unavailable)
    }

    fn with_client(api: ApiClient) -> Self {
        Self {
            api,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at an OpenAI-compatible server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api.set_base(api_base.into());
        self
    }

    /// Request embeddings shortened to `dims`; also what
    /// [`dimensions()`](EmbeddingProvider::dimensions) reports.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

fn unavailable(message: String) -> RagError {
    RagError::EmbeddingUnavailable { provider: "OpenAI".to_string(), message }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| unavailable("API returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = "OpenAI", model = %self.model, batch_size = texts.len(), "embedding batch");

        let request =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.request_dimensions };
        let response: EmbeddingResponse =
            self.api.post("embeddings", &request).await.map_err(|message| {
                error!(provider = "OpenAI", %message, "embedding request failed");
                unavailable(message)
            })?;

        if response.data.len() != texts.len() {
            return Err(unavailable(format!(
                "API returned {} embeddings for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A [`TextGenerator`] backed by the `/chat/completions` endpoint.
///
/// The prompt is sent as a single user message and the first choice is
/// returned verbatim. The startup health check lists `/models`.
///
/// ```rust,ignore
/// use docchat_rag::openai::OpenAIChatGenerator;
///
/// let generator = OpenAIChatGenerator::from_env()?.with_model("gpt-4o");
/// ```
pub struct OpenAIChatGenerator {
    api: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAIChatGenerator {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        ApiClient::new(api_key.into()).map(Self::with_client).map_err(generation_failed)
    }

    /// Create a generator using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        ApiClient::from_env().map(Self::with_client).map_err(generation_failed)
    }

    fn with_client(api: ApiClient) -> Self {
        Self { api, model: DEFAULT_CHAT_MODEL.to_string(), temperature: 0.7, max_tokens: Some(512) }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at an OpenAI-compatible server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api.set_base(api_base.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Cap the number of generated tokens. `None` leaves it to the server.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

fn generation_failed(message: String) -> RagError {
    RagError::GenerationFailed { backend: "OpenAI".to_string(), message }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(backend = "OpenAI", model = %self.model, prompt_len = prompt.len(), "generating");
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response: ChatResponse =
            self.api.post("chat/completions", &request).await.map_err(generation_failed)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| generation_failed("API returned no content".to_string()))
    }

    async fn health_check(&self) -> Result<()> {
        self.api.get("models").await.map_err(generation_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keys_are_rejected() {
        assert!(matches!(
            OpenAIEmbeddingProvider::new(""),
            Err(RagError::EmbeddingUnavailable { .. })
        ));
        assert!(matches!(OpenAIChatGenerator::new("  "), Err(RagError::GenerationFailed { .. })));
    }

    #[test]
    fn dimension_override_is_reported() {
        let provider = OpenAIEmbeddingProvider::new("sk-test").unwrap().with_dimensions(256);
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.request_dimensions, Some(256));
    }

    #[test]
    fn api_base_loses_trailing_slash() {
        let generator =
            OpenAIChatGenerator::new("sk-test").unwrap().with_api_base("http://localhost:11434/v1/");
        assert_eq!(generator.api.api_base, "http://localhost:11434/v1");
    }
}
