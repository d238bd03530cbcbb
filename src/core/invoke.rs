//! Structured model calls with bounded retries.
//!
//! A call renders nothing itself: it sends a finished prompt, parses the
//! reply into a typed response, applies the caller's domain rule and retries
//! on malformed, truncated or rejected output until the attempt budget runs
//! out.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::adapters::{Backend, BackendError, CompletionRequest};

/// Prefix that asks reasoning models to skip their thinking phase
pub const NO_THINK_PREFIX: &str = "/set nothink ";

/// Prepend the no-think directive unless thinking is enabled
pub fn apply_think(prompt: &str, think: bool) -> String {
    if think {
        prompt.to_string()
    } else {
        format!("{}{}", NO_THINK_PREFIX, prompt)
    }
}

/// Retry policy for model calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds (0 disables backoff)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt budget and no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Why a single attempt was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Response truncated at output limit")]
    Truncated,

    #[error("{0}")]
    Invalid(String),
}

impl InvokeError {
    /// Terminal backend errors end the retry loop early
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            _ => true,
        }
    }
}

/// Final outcome of a call that never produced an acceptable answer
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Failed after {attempts} attempts. Last error: {last_error}")]
pub struct InvokeFailure {
    pub attempts: u32,
    pub last_error: InvokeError,
}

/// A typed reply shape the backend is asked to produce
pub trait ResponseSchema: DeserializeOwned {
    /// Schema name sent with the request
    const NAME: &'static str;

    /// JSON Schema of the object
    fn schema() -> Value;
}

/// `{answer, reason}` reply (detection, tagging)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonedAnswer {
    pub answer: String,
    pub reason: String,
}

impl ResponseSchema for ReasonedAnswer {
    const NAME: &'static str = "reasoned_answer";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "answer": {"type": "string"},
                "reason": {"type": "string"}
            },
            "required": ["answer", "reason"],
            "additionalProperties": false
        })
    }
}

/// `{answer}` reply (multiple choice)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceAnswer {
    pub answer: String,
}

impl ResponseSchema for ChoiceAnswer {
    const NAME: &'static str = "choice_answer";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {"answer": {"type": "string"}},
            "required": ["answer"],
            "additionalProperties": false
        })
    }
}

/// `{narrative}` reply (narrative generation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeAnswer {
    pub narrative: String,
}

impl ResponseSchema for NarrativeAnswer {
    const NAME: &'static str = "narrative_answer";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {"narrative": {"type": "string"}},
            "required": ["narrative"],
            "additionalProperties": false
        })
    }
}

/// `{score}` reply (narrative judge)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeScore {
    pub score: i64,
}

impl ResponseSchema for JudgeScore {
    const NAME: &'static str = "judge_score";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {"score": {"type": "integer"}},
            "required": ["score"],
            "additionalProperties": false
        })
    }
}

/// Pull the JSON object out of a reply, tolerating code fences and chatter
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Parse a reply into `T`
pub fn parse_response<T: ResponseSchema>(content: &str) -> Result<T, InvokeError> {
    serde_json::from_str(extract_json(content)).map_err(|e| InvokeError::Malformed(e.to_string()))
}

/// Send `prompt` until the reply parses as `T` and passes `validate`.
///
/// At most `policy.max_attempts` calls are made. Terminal backend errors stop
/// early; everything else is retried after the policy's backoff delay.
#[instrument(skip_all, fields(id = %id, backend = %backend.name(), schema = T::NAME))]
pub async fn invoke<T, V, F>(
    backend: &dyn Backend,
    prompt: &str,
    policy: &RetryPolicy,
    id: &str,
    validate: F,
) -> Result<V, InvokeFailure>
where
    T: ResponseSchema,
    F: Fn(T) -> Result<V, String>,
{
    let schema = T::schema();
    let request = CompletionRequest {
        prompt,
        schema_name: T::NAME,
        schema: &schema,
    };

    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match backend.complete(&request).await {
            Ok(completion) if completion.truncated => Err(InvokeError::Truncated),
            Ok(completion) => parse_response::<T>(&completion.content)
                .and_then(|parsed| validate(parsed).map_err(InvokeError::Invalid)),
            Err(e) => Err(InvokeError::Backend(e)),
        };

        let e = match result {
            Ok(value) => {
                debug!(attempt, "Call succeeded");
                return Ok(value);
            }
            Err(e) => e,
        };

        if e.is_retryable() && policy.should_retry(attempt) {
            let delay = policy.delay_for_attempt(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Attempt failed, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            continue;
        }

        error!(attempt, error = %e, "Call failed permanently");
        return Err(InvokeFailure {
            attempts: attempt,
            last_error: e,
        });
    }
}
