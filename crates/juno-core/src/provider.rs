use async_trait::async_trait;

use crate::errors::GatewayError;

/// Options controlling generation behavior.
#[derive(Clone, Debug)]
pub struct CompletionOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_output_tokens: Some(2048),
            temperature: Some(0.7),
        }
    }
}

/// Black-box generative model: prompt in, completion out.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, GatewayError>;
}

/// What an embedding will be used for. Providers may embed differently for
/// stored documents and for search queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedTask {
    Query,
    Document,
}

impl EmbedTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "RETRIEVAL_QUERY",
            Self::Document => "RETRIEVAL_DOCUMENT",
        }
    }
}

/// Text embedding service.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_options_defaults() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.max_output_tokens, Some(2048));
        assert!(opts.temperature.is_some());
    }

    #[test]
    fn embed_task_wire_names() {
        assert_eq!(EmbedTask::Query.as_str(), "RETRIEVAL_QUERY");
        assert_eq!(EmbedTask::Document.as_str(), "RETRIEVAL_DOCUMENT");
    }
}
