//! Retry controller
//!
//! Two bounds keep a cycle finite. Once `force_accept_after` validation
//! passes happened the validator is no longer consulted and the draft is
//! accepted. `max_retries` is the hard ceiling that accepts whatever draft
//! exists, which only comes into play when drafts keep coming back empty.

use tripwise_common::metrics;

use crate::state::ConversationState;
use crate::workflow::CycleSettings;

/// What the validation stage should do with the current draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPlan {
    /// Nothing to validate; fail without a model call
    RejectEmpty,
    /// Enough attempts made; pass without a model call
    ForceAccept,
    /// Ask the validator
    Consult,
}

pub fn plan(state: &ConversationState, settings: &CycleSettings) -> ValidationPlan {
    if state.draft().is_empty() {
        ValidationPlan::RejectEmpty
    } else if state.retry_count >= settings.force_accept_after {
        ValidationPlan::ForceAccept
    } else {
        ValidationPlan::Consult
    }
}

/// Decision taken after a validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Accept,
    Retry,
}

pub fn route(state: &ConversationState, settings: &CycleSettings) -> Route {
    if state.validation_passed {
        return Route::Accept;
    }

    if state.retry_count >= settings.max_retries {
        tracing::warn!(
            retry_count = state.retry_count,
            "Max retries reached, streaming best attempt"
        );
        return Route::Accept;
    }

    metrics::record_retry(state.retry_count);
    tracing::info!(
        retry_count = state.retry_count,
        sources = ?state.sources_used,
        "Draft rejected, reclassifying"
    );
    Route::Retry
}
