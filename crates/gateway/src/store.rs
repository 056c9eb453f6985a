//! In-memory conversation store
//!
//! Keeps the message history, title and trip context of each conversation.
//! The engine never touches it: the chat handler hydrates state from here
//! and writes the assistant turn back only after a cycle completes.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tripwise_common::errors::{AppError, Result};
use tripwise_common::ChatMessage;
use tripwise_engine::TripContext;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ConversationRecord {
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub trip_context: Option<TripContext>,
}

#[derive(Clone, Default)]
pub struct ConversationStore {
    inner: Arc<RwLock<HashMap<String, ConversationRecord>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation and return its identifier
    pub async fn create(&self, title: String) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.insert(
            id.clone(),
            ConversationRecord {
                title,
                ..Default::default()
            },
        );
        id
    }

    pub async fn get(&self, id: &str) -> Result<ConversationRecord> {
        self.inner
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })
    }

    /// Replace the stored trip context when one is supplied; return the current one
    pub async fn upsert_trip_context(&self, id: &str, trip: Option<TripContext>) -> Result<Option<TripContext>> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })?;
        if let Some(trip) = trip {
            record.trip_context = Some(trip);
        }
        Ok(record.trip_context.clone())
    }

    pub async fn append(&self, id: &str, message: ChatMessage) -> Result<()> {
        let mut guard = self.inner.write().await;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| AppError::ConversationNotFound { id: id.to_string() })?;
        record.messages.push(message);
        Ok(())
    }

    /// Latest `limit` messages in chronological order
    pub async fn history(&self, id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let record = self.get(id).await?;
        let skip = record.messages.len().saturating_sub(limit);
        Ok(record.messages.into_iter().skip(skip).collect())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
