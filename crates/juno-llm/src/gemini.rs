use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use juno_core::errors::GatewayError;
use juno_core::provider::{CompletionOptions, EmbedTask, EmbeddingProvider, LlmProvider};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Upper bound on one HTTP exchange, including reading the body.
    pub call_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            model: "gemini-2.5-flash-lite".into(),
            embedding_model: "text-embedding-004".into(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared HTTP plumbing for the generate and embed endpoints.
#[derive(Clone)]
struct GeminiHttp {
    client: Client,
    config: GeminiConfig,
}

impl GeminiHttp {
    fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NotConfigured(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str, action: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            action
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, GatewayError> {
        let timeout = self.config.call_timeout;
        let exchange = async {
            let resp = self
                .client
                .post(url)
                .header("x-goog-api-key", self.config.api_key.expose_secret())
                .json(body)
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                let body = resp.text().await.unwrap_or_default();
                return Err(match GatewayError::from_status(status, body) {
                    GatewayError::RateLimited { .. } => GatewayError::RateLimited { retry_after },
                    other => other,
                });
            }

            resp.json::<Value>()
                .await
                .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| GatewayError::Timeout(timeout))?
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

/// Text generation against the Gemini `generateContent` endpoint.
pub struct GeminiProvider {
    http: GeminiHttp,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http: GeminiHttp::new(config)?,
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.http.config.model
    }

    #[instrument(skip(self, prompt, options), fields(model = %self.http.config.model))]
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, GatewayError> {
        let mut generation = serde_json::Map::new();
        if let Some(max) = options.max_output_tokens {
            let _ = generation.insert("maxOutputTokens".into(), json!(max));
        }
        if let Some(t) = options.temperature {
            let _ = generation.insert("temperature".into(), json!(t));
        }
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation,
        });

        let url = self.http.endpoint(&self.http.config.model, "generateContent");
        let raw = self.http.post(&url, &body).await?;
        let parsed: GenerateResponse = serde_json::from_value(raw)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GatewayError::EmptyCompletion);
        }
        Ok(text)
    }
}

/// Embeddings against the Gemini `embedContent` endpoint.
pub struct GeminiEmbedder {
    http: GeminiHttp,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            http: GeminiHttp::new(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn model(&self) -> &str {
        &self.http.config.embedding_model
    }

    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>, GatewayError> {
        let model = &self.http.config.embedding_model;
        let body = json!({
            "model": format!("models/{model}"),
            "content": {"parts": [{"text": text}]},
            "taskType": task.as_str(),
        });
        let url = self.http.endpoint(model, "embedContent");
        let raw = self.http.post(&url, &body).await?;
        let parsed: EmbedResponse = serde_json::from_value(raw)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        if parsed.embedding.values.is_empty() {
            return Err(GatewayError::MalformedResponse("empty embedding".into()));
        }
        Ok(parsed.embedding.values)
    }
}
