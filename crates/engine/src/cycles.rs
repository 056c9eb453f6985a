//! Registry of conversations with a cycle in flight

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tripwise_common::{AppError, Result};

/// At most one active cycle per conversation identifier
#[derive(Clone, Default)]
pub struct ActiveCycles {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveCycles {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `conversation_id`; the claim is released when the guard drops
    pub fn try_acquire(&self, conversation_id: &str) -> Result<CycleGuard> {
        if !self.lock().insert(conversation_id.to_string()) {
            return Err(AppError::ConversationBusy {
                id: conversation_id.to_string(),
            });
        }

        Ok(CycleGuard {
            id: conversation_id.to_string(),
            cycles: self.clone(),
        })
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.lock().contains(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Claim on one conversation
pub struct CycleGuard {
    id: String,
    cycles: ActiveCycles,
}

impl CycleGuard {
    pub fn conversation_id(&self) -> &str {
        &self.id
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.cycles.lock().remove(&self.id);
    }
}
