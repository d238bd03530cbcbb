//! OpenAI-compatible chat completions and embeddings client.
//!
//! Most hosted providers (and local servers such as Ollama) expose the same
//! `/chat/completions` and `/embeddings` endpoints; they differ only in base
//! URL, key and how strictly they honour `response_format`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{Backend, BackendError, Completion, CompletionRequest, Embedder};

/// How the backend is asked to produce JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredOutput {
    /// `response_format: json_schema` with the full schema (strict)
    JsonSchema,
    /// `response_format: json_object`; schema only described in the prompt
    #[default]
    JsonObject,
    /// No response_format; rely on the prompt alone
    None,
}

/// Chat/embedding client for one provider and model
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    label: String,
    structured_output: StructuredOutput,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiBackend {
    pub fn new(
        provider: &str,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        let model = model.into();

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            label: format!("{}/{}", provider, model),
            model,
            structured_output: StructuredOutput::default(),
        })
    }

    pub fn with_structured_output(mut self, mode: StructuredOutput) -> Self {
        self.structured_output = mode;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the chat request body for a prompt
    fn chat_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        match self.structured_output {
            StructuredOutput::JsonSchema => {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": request.schema_name,
                        "schema": request.schema,
                        "strict": true,
                    }
                });
            }
            StructuredOutput::JsonObject => {
                body["response_format"] = json!({"type": "json_object"});
            }
            StructuredOutput::None => {}
        }

        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<String, BackendError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        match status {
            s if s.is_success() => Ok(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Auth(text)),
            s => Err(BackendError::Http {
                status: s.as_u16(),
                body: text,
            }),
        }
    }
}

/// Extract content and truncation flag from a chat completion payload
fn parse_chat_response(raw: &str) -> Result<Completion, BackendError> {
    let response: ChatResponse =
        serde_json::from_str(raw).map_err(|e| BackendError::Decode(e.to_string()))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Decode("No choices in response".to_string()))?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        truncated: choice.finish_reason.as_deref() == Some("length"),
    })
}

fn parse_embedding_response(raw: &str, expected: usize) -> Result<Vec<Vec<f32>>, BackendError> {
    let mut response: EmbeddingResponse =
        serde_json::from_str(raw).map_err(|e| BackendError::Decode(e.to_string()))?;

    if response.data.len() != expected {
        return Err(BackendError::Decode(format!(
            "Expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    response.data.sort_by_key(|item| item.index);
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip(self, request), fields(backend = %self.label, schema = request.schema_name))]
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
        let body = self.chat_body(request);
        let raw = self.post("chat/completions", &body).await?;
        let completion = parse_chat_response(&raw)?;

        debug!(
            chars = completion.content.len(),
            truncated = completion.truncated,
            "Received completion"
        );

        Ok(completion)
    }
}

#[async_trait]
impl Embedder for OpenAiBackend {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip(self, inputs), fields(backend = %self.label, count = inputs.len()))]
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.model,
            "input": inputs,
        });
        let raw = self.post("embeddings", &body).await?;
        parse_embedding_response(&raw, inputs.len())
    }
}
