//! Retry Integration Tests
//!
//! Tests for the bounded retry loop around structured model calls.

use async_trait::async_trait;
use drivel_bench::adapters::{Backend, BackendError, Completion, CompletionRequest};
use drivel_bench::core::{invoke, InvokeError, ReasonedAnswer, RetryPolicy};
use drivel_bench::domain::DetectionLabel;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fails the first `failures` calls, then answers with a valid label
struct FlakyBackend {
    failures: u32,
    calls: AtomicU32,
    error: BackendError,
}

impl FlakyBackend {
    fn new(failures: u32, error: BackendError) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            error,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(Completion::new(
                r#"{"answer": "Drivelology", "reason": "it is"}"#,
            ))
        }
    }
}

fn detection_label(answer: ReasonedAnswer) -> Result<DetectionLabel, String> {
    answer.answer.parse().map_err(|e: drivel_bench::domain::LabelError| e.to_string())
}

fn transient() -> BackendError {
    BackendError::Http {
        status: 503,
        body: "overloaded".to_string(),
    }
}

#[tokio::test]
async fn test_succeeds_after_transient_failures() {
    let backend = FlakyBackend::new(3, transient());
    let policy = RetryPolicy::immediate(5);

    let label = invoke::<ReasonedAnswer, _, _>(&backend, "prompt", &policy, "id-1", detection_label)
        .await
        .unwrap();

    assert_eq!(label, DetectionLabel::Drivelology);
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn test_always_failing_uses_exactly_max_attempts() {
    let backend = FlakyBackend::new(u32::MAX, transient());
    let policy = RetryPolicy::immediate(5);

    let failure = invoke::<ReasonedAnswer, _, _>(&backend, "prompt", &policy, "id-2", detection_label)
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 5);
    assert_eq!(backend.calls(), 5);
    assert_eq!(failure.last_error, InvokeError::Backend(transient()));
    assert!(failure.to_string().starts_with("Failed after 5 attempts. Last error:"));
}

#[tokio::test]
async fn test_auth_error_stops_immediately() {
    let backend = FlakyBackend::new(u32::MAX, BackendError::Auth("bad key".to_string()));
    let policy = RetryPolicy::immediate(5);

    let failure = invoke::<ReasonedAnswer, _, _>(&backend, "prompt", &policy, "id-3", detection_label)
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 1);
    assert_eq!(backend.calls(), 1);
}

/// Replies with a fixed sequence of raw bodies
struct ScriptedBackend {
    replies: Vec<Completion>,
    calls: AtomicU32,
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        Ok(self.replies[call.min(self.replies.len() - 1)].clone())
    }
}

#[tokio::test]
async fn test_malformed_truncated_and_invalid_are_retried() {
    let mut truncated = Completion::new(r#"{"answer": "Drivel"#);
    truncated.truncated = true;

    let backend = ScriptedBackend {
        replies: vec![
            Completion::new("I think it is Drivelology"),
            truncated,
            Completion::new(r#"{"answer": "maybe", "reason": "unsure"}"#),
            Completion::new("```json\n{\"answer\": \"non-Drivelology\", \"reason\": \"flat\"}\n```"),
        ],
        calls: AtomicU32::new(0),
    };
    let policy = RetryPolicy::immediate(4);

    let label = invoke::<ReasonedAnswer, _, _>(&backend, "prompt", &policy, "id-4", detection_label)
        .await
        .unwrap();

    assert_eq!(label, DetectionLabel::NonDrivelology);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_last_error_is_reported() {
    let backend = ScriptedBackend {
        replies: vec![Completion::new(r#"{"answer": "maybe", "reason": "unsure"}"#)],
        calls: AtomicU32::new(0),
    };
    let policy = RetryPolicy::immediate(2);

    let failure = invoke::<ReasonedAnswer, _, _>(&backend, "prompt", &policy, "id-5", detection_label)
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert!(matches!(failure.last_error, InvokeError::Invalid(_)));
}
