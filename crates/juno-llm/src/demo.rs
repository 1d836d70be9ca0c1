//! Offline stand-ins used when no model API key is configured.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use juno_core::errors::GatewayError;
use juno_core::provider::{CompletionOptions, EmbedTask, EmbeddingProvider, LlmProvider};

pub const DEMO_REPLY: &str = "Hello! I'm Juno, your helpful AI companion. I'm currently running in demo mode. How can I help you today?";

/// Answers every prompt with a fixed demo-mode greeting.
#[derive(Clone, Debug, Default)]
pub struct DemoProvider;

#[async_trait]
impl LlmProvider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    fn model(&self) -> &str {
        "demo"
    }

    async fn complete(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, GatewayError> {
        Ok(DEMO_REPLY.to_string())
    }
}

/// Deterministic embeddings from a SHA-256 digest of the input, L2-normalized.
///
/// Identical texts map to identical vectors, so exact repeats are retrievable
/// without a remote embedding service.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.trim().to_lowercase().as_bytes());
        let hash = hasher.finalize();

        let mut v: Vec<f32> = (0..self.dims)
            .map(|i| {
                let byte_idx = i % hash.len();
                // Map byte to [-1, 1]
                (f32::from(hash[byte_idx]) / 127.5) - 1.0
            })
            .collect();

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model(&self) -> &str {
        "sha256-hash"
    }

    async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>, GatewayError> {
        Ok(self.hash_to_vector(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_reply_is_fixed() {
        let text = DemoProvider.complete("anything", &CompletionOptions::default()).await.unwrap();
        assert_eq!(text, DEMO_REPLY);
    }

    #[tokio::test]
    async fn hash_embedding_is_deterministic_and_unit() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("What is my net worth?", EmbedTask::Query).await.unwrap();
        let b = embedder.embed("what is my net worth?", EmbedTask::Document).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("hello", EmbedTask::Query).await.unwrap();
        let b = embedder.embed("world", EmbedTask::Query).await.unwrap();
        assert_ne!(a, b);
    }
}
