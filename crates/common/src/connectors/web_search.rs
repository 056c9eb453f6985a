//! Tavily web search connector

use super::{WebPayload, WebResult, WebSearch};
use crate::config::WebSearchConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    include_answer: bool,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<WebResult>,
}

impl From<SearchResponse> for WebPayload {
    fn from(response: SearchResponse) -> Self {
        Self {
            summary: response.answer.unwrap_or_default(),
            results: response.results,
        }
    }
}

/// Web search against the Tavily API
pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "web_search.api_key is required".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            endpoint: config.endpoint.clone(),
        })
    }

    async fn request(&self, query: &str, max_results: usize) -> Result<WebPayload> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            search_depth: "advanced",
            include_answer: true,
            max_results,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Connector {
                connector: "web".to_string(),
                message: format!("API error {}: {}", status, body),
            });
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Option<WebPayload> {
        let start = Instant::now();

        match self.request(query, max_results).await {
            Ok(payload) => {
                debug!(results = payload.results.len(), "Web search completed");
                metrics::record_connector("web", "hit", start.elapsed().as_secs_f64());
                Some(payload)
            }
            Err(e) => {
                warn!(error = %e, "Web search failed");
                metrics::record_connector("web", "failed", start.elapsed().as_secs_f64());
                None
            }
        }
    }
}
