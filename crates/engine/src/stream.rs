//! Delivery of the accepted draft as ordered text fragments

use tracing::{info, warn};

use crate::events::{Progress, ProgressSink};
use crate::state::ConversationState;

/// Split `text` into fragments of at most `size` characters.
///
/// Fragments never split a character and concatenate back to `text`.
pub fn fragments(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(text.len() / size + 1);
    let mut start = 0;

    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % size == 0 {
            out.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

/// Emit the pending draft fragment by fragment
pub async fn emit(state: &ConversationState, chunk_chars: usize, sink: &dyn ProgressSink) {
    let draft = state.draft();
    if draft.is_empty() {
        warn!("No pending response to stream");
        return;
    }

    info!(chars = draft.chars().count(), "Streaming final response");
    for fragment in fragments(draft, chunk_chars) {
        sink.emit(Progress::Text(fragment.to_string()));
        tokio::task::yield_now().await;
    }
}
