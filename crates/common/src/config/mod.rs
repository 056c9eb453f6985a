//! Configuration management for Tripwise services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Language model gateway configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Knowledge base (pgvector) configuration
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    /// Web search connector configuration
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Visa lookup connector configuration
    #[serde(default)]
    pub visa: VisaConfig,

    /// Orchestration parameters
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// API base URL (OpenAI-compatible)
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// API key
    pub api_key: Option<String>,

    /// Chat model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum elapsed time spent retrying transient failures, in seconds
    #[serde(default = "default_llm_retry_budget")]
    pub retry_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// API base URL
    #[serde(default = "default_llm_base")]
    pub api_base: String,

    /// API key for embedding service (falls back to llm.api_key)
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum elapsed time spent retrying transient failures, in seconds
    #[serde(default = "default_embedding_retry_budget")]
    pub retry_budget_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeBaseConfig {
    /// Postgres URL holding the pgvector collection (disabled when unset)
    pub database_url: Option<String>,

    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// Search endpoint
    #[serde(default = "default_web_endpoint")]
    pub endpoint: String,

    /// API key (connector disabled when unset)
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_connector_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VisaConfig {
    /// RapidAPI host serving the visa lookup
    #[serde(default = "default_visa_host")]
    pub api_host: String,

    /// RapidAPI key (connector disabled when unset)
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_connector_timeout")]
    pub timeout_secs: u64,
}

/// Knobs for the classify → retrieve → draft → validate cycle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Validation is skipped and the draft accepted once this many passes happened
    #[serde(default = "default_force_accept_after")]
    pub force_accept_after: u32,

    /// Hard ceiling on validation passes before the draft is accepted regardless
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Characters per streamed text fragment
    #[serde(default = "default_stream_chunk_chars")]
    pub stream_chunk_chars: usize,

    /// Prior turns hydrated into a conversation
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Knowledge base results kept per query
    #[serde(default = "default_knowledge_top_k")]
    pub knowledge_top_k: usize,

    /// Minimum relevance score for knowledge base hits
    #[serde(default = "default_score_threshold")]
    pub knowledge_score_threshold: f32,

    /// Over-fetch multiplier applied before filtering
    #[serde(default = "default_overfetch_factor")]
    pub knowledge_overfetch_factor: usize,

    /// Content prefix length used as the dedup key
    #[serde(default = "default_dedup_prefix")]
    pub knowledge_dedup_prefix_chars: usize,

    /// Web results requested per query
    #[serde(default = "default_web_max_results")]
    pub web_max_results: usize,

    /// Web results shown in the grounding context
    #[serde(default = "default_web_results_shown")]
    pub web_results_shown: usize,

    /// Web snippet length in the grounding context
    #[serde(default = "default_web_snippet_chars")]
    pub web_snippet_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (process-wide)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_llm_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.8 }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_retry_budget() -> u64 { 20 }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retry_budget() -> u64 { 5 }
fn default_collection() -> String { "documents".to_string() }
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout() -> u64 { 10 }
fn default_web_endpoint() -> String { "https://api.tavily.com/search".to_string() }
fn default_visa_host() -> String { "visa-requirement.p.rapidapi.com".to_string() }
fn default_connector_timeout() -> u64 { 10 }
fn default_force_accept_after() -> u32 { 2 }
fn default_max_retries() -> u32 { 5 }
fn default_stream_chunk_chars() -> usize { 4 }
fn default_history_limit() -> usize { 20 }
fn default_knowledge_top_k() -> usize { 5 }
fn default_score_threshold() -> f32 { 0.5 }
fn default_overfetch_factor() -> usize { 3 }
fn default_dedup_prefix() -> usize { 200 }
fn default_web_max_results() -> usize { 5 }
fn default_web_results_shown() -> usize { 3 }
fn default_web_snippet_chars() -> usize { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "tripwise".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__MODEL=gpt-4o
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// API key used for embeddings (falls back to the chat model key)
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding.api_key.as_deref().or(self.llm.api_key.as_deref())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
            retry_budget_secs: default_llm_retry_budget(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: default_llm_base(),
            api_key: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            retry_budget_secs: default_embedding_retry_budget(),
        }
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            collection: default_collection(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_web_endpoint(),
            api_key: None,
            timeout_secs: default_connector_timeout(),
        }
    }
}

impl Default for VisaConfig {
    fn default() -> Self {
        Self {
            api_host: default_visa_host(),
            api_key: None,
            timeout_secs: default_connector_timeout(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            force_accept_after: default_force_accept_after(),
            max_retries: default_max_retries(),
            stream_chunk_chars: default_stream_chunk_chars(),
            history_limit: default_history_limit(),
            knowledge_top_k: default_knowledge_top_k(),
            knowledge_score_threshold: default_score_threshold(),
            knowledge_overfetch_factor: default_overfetch_factor(),
            knowledge_dedup_prefix_chars: default_dedup_prefix(),
            web_max_results: default_web_max_results(),
            web_results_shown: default_web_results_shown(),
            web_snippet_chars: default_web_snippet_chars(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.workflow.force_accept_after, 2);
        assert_eq!(config.workflow.max_retries, 5);
        assert_eq!(config.workflow.stream_chunk_chars, 4);
    }

    #[test]
    fn test_empty_source_uses_serde_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.workflow.knowledge_top_k, 5);
        assert_eq!(config.workflow.knowledge_overfetch_factor, 3);
        assert!(config.knowledge_base.database_url.is_none());
    }

    #[test]
    fn test_retry_budgets_from_toml() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(
                "[llm]\nretry_budget_secs = 3\n[server]\nrequest_timeout_secs = 45",
                ::config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.llm.retry_budget_secs, 3);
        assert_eq!(config.embedding.retry_budget_secs, 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(45));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_embedding_key_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.embedding_api_key(), None);
        config.llm.api_key = Some("sk-chat".into());
        assert_eq!(config.embedding_api_key(), Some("sk-chat"));
        config.embedding.api_key = Some("sk-embed".into());
        assert_eq!(config.embedding_api_key(), Some("sk-embed"));
    }
}
