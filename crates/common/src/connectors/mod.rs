//! Source connectors
//!
//! Three stateless retrieval sources consulted by the answer cycle:
//! - Knowledge base (semantic search over curated travel documents)
//! - Web search (live results with an aggregated summary)
//! - Visa requirement lookup (passport × destination)
//!
//! Connectors never fail across their boundary. Transport errors, timeouts
//! and empty answers are logged and returned as `None` or an empty list.

mod knowledge_base;
mod visa;
mod web_search;

pub use knowledge_base::{KnowledgeBase, PgVectorIndex, ScoredDocument, VectorIndex};
pub use visa::RapidApiVisa;
pub use web_search::TavilySearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Knowledge base hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeHit {
    pub content: String,
    pub source: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Web search answer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebPayload {
    /// Aggregated summary produced by the search provider
    #[serde(default)]
    pub summary: String,
    /// Ranked results
    #[serde(default)]
    pub results: Vec<WebResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

/// Semantic search over the knowledge base
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    /// Up to `k` hits scoring at least `score_threshold`, or an empty list
    async fn search(&self, query: &str, k: usize, score_threshold: f32) -> Vec<KnowledgeHit>;
}

/// Live web search
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// `None` when the provider failed
    async fn search(&self, query: &str, max_results: usize) -> Option<WebPayload>;
}

/// Visa requirement lookup
#[async_trait]
pub trait VisaLookup: Send + Sync {
    /// Provider payload, or `None` when the lookup failed
    async fn lookup(&self, nationality_code: &str, destination_code: &str) -> Option<serde_json::Value>;
}

/// Stand-in for a connector whose credentials are not configured
pub struct Unconfigured {
    name: &'static str,
}

impl Unconfigured {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl KnowledgeSearch for Unconfigured {
    async fn search(&self, _query: &str, _k: usize, _score_threshold: f32) -> Vec<KnowledgeHit> {
        tracing::debug!(connector = self.name, "Connector not configured");
        Vec::new()
    }
}

#[async_trait]
impl WebSearch for Unconfigured {
    async fn search(&self, _query: &str, _max_results: usize) -> Option<WebPayload> {
        tracing::debug!(connector = self.name, "Connector not configured");
        None
    }
}

#[async_trait]
impl VisaLookup for Unconfigured {
    async fn lookup(&self, _nationality_code: &str, _destination_code: &str) -> Option<serde_json::Value> {
        tracing::debug!(connector = self.name, "Connector not configured");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_connectors_return_values() {
        let stub = Unconfigured::new("test");
        assert!(KnowledgeSearch::search(&stub, "liquids", 5, 0.5).await.is_empty());
        assert!(WebSearch::search(&stub, "weather", 5).await.is_none());
        assert!(stub.lookup("US", "JP").await.is_none());
    }
}
