//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the language-model backends the
//! benchmark talks to and for the dataset hub samples are loaded from.

pub mod hub;
pub mod openai;
pub mod provider;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the concrete adapters
pub use hub::{DatasetSource, HubClient, SplitPreference};
pub use openai::{OpenAiBackend, StructuredOutput};
pub use provider::{build_backend, build_embedder, ProviderSettings};

/// Errors from a backend call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Backend misconfigured: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) | Self::Decode(_) => true,
            Self::Auth(_) | Self::Config(_) => false,
        }
    }
}

/// A single structured-output request
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Fully rendered prompt
    pub prompt: &'a str,

    /// Name of the expected response shape
    pub schema_name: &'a str,

    /// JSON Schema of the expected response
    pub schema: &'a serde_json::Value,
}

/// Raw output of a backend call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Message content, expected to hold a JSON object
    pub content: String,

    /// True when the backend stopped at its output limit
    pub truncated: bool,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            truncated: false,
        }
    }
}

/// Trait for language-model backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name (provider/model)
    fn name(&self) -> &str;

    /// Send one prompt and return the model's raw structured answer
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, BackendError>;
}

/// Trait for text embedding backends
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Embed every input in one call; output order matches input order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}
