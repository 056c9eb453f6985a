//! Language model gateway
//!
//! The sole boundary through which completions are requested:
//! - One-shot completion over a message list
//! - Streamed completion yielding ordered text fragments

mod openai;

pub use openai::OpenAiGateway;

use crate::errors::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Ordered, finite, non-restartable sequence of text fragments
pub type TextStream = BoxStream<'static, Result<String>>;

/// Message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a completion request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Trait for completion providers
#[async_trait]
pub trait LmGateway: Send + Sync {
    /// Request a single completion
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Request a completion delivered incrementally
    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
