//! Tripwise Common Library
//!
//! Shared code for the Tripwise engine and gateway including:
//! - Configuration management
//! - Error types and handling
//! - Language model gateway abstraction
//! - Source connectors (knowledge base, web search, visa lookup)
//! - Embedding client for knowledge base queries
//! - Metrics and observability

pub mod config;
pub mod connectors;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use connectors::{KnowledgeHit, KnowledgeSearch, VisaLookup, WebPayload, WebResult, WebSearch};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{ChatMessage, LmGateway, Role};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
