//! Embedding service abstraction
//!
//! Query embeddings for knowledge base lookups. Document
//! embedding happens at ingestion time, outside this service.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI embedding client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry_budget: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: [&'a str; 1],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            retry_budget: Duration::from_secs(config.retry_budget_secs),
        })
    }

    /// POST the request, retrying connection failures, timeouts, 429 and 5xx
    async fn send(&self, text: &str) -> Result<reqwest::Response> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            input: [text],
            model: &self.model,
        };
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();

        let client = &self.client;
        let api_key = self.api_key.as_str();
        let url = url.as_str();
        let request = &request;

        backoff::future::retry(policy, move || async move {
            let response = client
                .post(url)
                .bearer_auth(api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    let err = AppError::HttpClient(e);
                    tracing::warn!(error = %err, transient = err.is_transient(), "Embedding request failed");
                    err.into_backoff()
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let err = AppError::UpstreamStatus {
                service: "embedding".to_string(),
                status: status.as_u16(),
                body,
            };
            tracing::warn!(error = %err, transient = err.is_transient(), "Embedding API error");
            Err(err.into_backoff())
        })
        .await
    }

    async fn make_request(&self, text: &str) -> Result<Vec<f32>> {
        let response = self.send(text).await?;

        let result: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingError {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.make_request(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Format an embedding as a pgvector literal
pub fn to_vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding.iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}
