use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use juno_core::errors::GatewayError;
use juno_core::provider::{CompletionOptions, EmbedTask, EmbeddingProvider, LlmProvider};

use crate::demo::HashEmbedder;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    Text(String),
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every prompt it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    prompts: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(prompt.to_string());

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Text(text) => return Ok(text),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

/// Embedder with scripted vectors per text. Unscripted texts fall back to a
/// deterministic hash embedding.
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    fallback: HashEmbedder,
    failing: AtomicBool,
    call_count: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: HashMap::new(),
            fallback: HashEmbedder::new(16),
            failing: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        let _ = self.vectors.insert(text.to_string(), vector);
        self
    }

    /// Make every subsequent call fail with a network error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model(&self) -> &str {
        "mock-embedding"
    }

    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>, GatewayError> {
        let _ = self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::NetworkError("mock embedder offline".into()));
        }
        match self.vectors.get(text) {
            Some(v) => Ok(v.clone()),
            None => self.fallback.embed(text, task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("first"), MockResponse::text("second")]);
        let opts = CompletionOptions::default();

        assert_eq!(mock.complete("a", &opts).await.unwrap(), "first");
        assert_eq!(mock.complete("b", &opts).await.unwrap(), "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.prompts(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("only one")]);
        let opts = CompletionOptions::default();
        let _ = mock.complete("a", &opts).await;
        assert!(mock.complete("b", &opts).await.is_err());
    }

    #[tokio::test]
    async fn delayed_error() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_millis(20),
            MockResponse::Error(GatewayError::RateLimited { retry_after: None }),
        )]);
        let start = std::time::Instant::now();
        let result = mock.complete("a", &CompletionOptions::default()).await;
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn embedder_uses_scripted_vectors() {
        let embedder = MockEmbedder::new().with_vector("balance", vec![1.0, 0.0]);
        assert_eq!(embedder.embed("balance", EmbedTask::Query).await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(embedder.embed("other", EmbedTask::Query).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn embedder_failure_toggle() {
        let embedder = MockEmbedder::new();
        embedder.set_failing(true);
        assert!(embedder.embed("x", EmbedTask::Document).await.is_err());
        embedder.set_failing(false);
        assert!(embedder.embed("x", EmbedTask::Document).await.is_ok());
        assert_eq!(embedder.call_count(), 2);
    }
}
