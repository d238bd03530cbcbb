//! Provider resolution: (provider, model) to a configured backend.
//!
//! Known providers carry a default base URL, API key variable and JSON mode.
//! Anything in the config file's `providers` section overrides those.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderConfig, ResolvedConfig};

use super::{Backend, BackendError, Embedder, OpenAiBackend, StructuredOutput};

/// Connection details for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub provider: String,
    pub base_url: String,
    /// Environment variable holding the key; `None` for keyless local servers
    pub api_key_env: Option<String>,
    pub structured_output: StructuredOutput,
}

struct KnownProvider {
    name: &'static str,
    base_url: &'static str,
    api_key_env: Option<&'static str>,
    structured_output: StructuredOutput,
}

const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        structured_output: StructuredOutput::JsonSchema,
    },
    KnownProvider {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        api_key_env: Some("DEEPSEEK_API_KEY"),
        structured_output: StructuredOutput::JsonObject,
    },
    KnownProvider {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: Some("OPENROUTER_API_KEY"),
        structured_output: StructuredOutput::JsonObject,
    },
    KnownProvider {
        name: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        structured_output: StructuredOutput::None,
    },
    KnownProvider {
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        api_key_env: Some("GEMINI_API_KEY"),
        structured_output: StructuredOutput::JsonObject,
    },
    KnownProvider {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        api_key_env: Some("GROQ_API_KEY"),
        structured_output: StructuredOutput::JsonObject,
    },
    KnownProvider {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        api_key_env: None,
        structured_output: StructuredOutput::JsonSchema,
    },
];

impl ProviderSettings {
    /// Resolve settings for a provider name, applying config overrides
    pub fn resolve(provider: &str, overrides: Option<&ProviderConfig>) -> Result<Self, BackendError> {
        let known = KNOWN_PROVIDERS.iter().find(|p| p.name == provider);

        let base_url = overrides
            .and_then(|o| o.base_url.clone())
            .or_else(|| known.map(|k| k.base_url.to_string()))
            .ok_or_else(|| {
                BackendError::Config(format!(
                    "Unknown provider '{}' (set providers.{}.base_url in .drivel/config.yaml)",
                    provider, provider
                ))
            })?;

        let api_key_env = overrides
            .and_then(|o| o.api_key_env.clone())
            .or_else(|| known.and_then(|k| k.api_key_env.map(String::from)));

        let structured_output = overrides
            .and_then(|o| o.structured_output)
            .or_else(|| known.map(|k| k.structured_output))
            .unwrap_or_default();

        Ok(Self {
            provider: provider.to_string(),
            base_url,
            api_key_env,
            structured_output,
        })
    }

    /// Read the API key from the environment, if this provider needs one
    pub fn api_key(&self) -> Result<Option<String>, BackendError> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                BackendError::Auth(format!("{} is not set for provider {}", var, self.provider))
            }),
        }
    }

    fn client(&self, model: &str, timeout: Duration) -> Result<OpenAiBackend, BackendError> {
        Ok(OpenAiBackend::new(
            &self.provider,
            self.base_url.clone(),
            self.api_key()?,
            model,
            timeout,
        )?
        .with_structured_output(self.structured_output))
    }
}

/// Construct a chat backend session for (provider, model)
pub fn build_backend(
    config: &ResolvedConfig,
    provider: &str,
    model: &str,
) -> Result<Arc<dyn Backend>, BackendError> {
    let settings = ProviderSettings::resolve(provider, config.provider(provider))?;
    let timeout = Duration::from_secs(config.run.request_timeout_seconds);
    Ok(Arc::new(settings.client(model, timeout)?))
}

/// Construct an embeddings client for (provider, model)
pub fn build_embedder(
    config: &ResolvedConfig,
    provider: &str,
    model: &str,
) -> Result<Arc<dyn Embedder>, BackendError> {
    let settings = ProviderSettings::resolve(provider, config.provider(provider))?;
    let timeout = Duration::from_secs(config.run.request_timeout_seconds);
    Ok(Arc::new(settings.client(model, timeout)?))
}
