//! Draft validation
//!
//! A second, independent model call judges whether the draft addresses the
//! query. The judge is lenient and an unreadable verdict counts as a pass,
//! so a flaky validator can never trap a cycle in retries.

use serde::Deserialize;
use tracing::{debug, info, warn};
use tripwise_common::{metrics, ChatMessage, Result};

use crate::classifier::strip_code_fence;
use crate::context::{complete_timed, AppContext};
use crate::events::{Phase, Progress, ProgressSink};
use crate::retry::{plan, ValidationPlan};
use crate::state::{ConversationState, ValidationVerdict};
use crate::trip::TripContext;

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(alias = "passed")]
    relevance_passed: bool,
    #[serde(default)]
    reason: String,
}

/// Parse the judge's answer, `None` when it is not the expected JSON
pub fn parse_verdict(raw: &str) -> Option<ValidationVerdict> {
    serde_json::from_str::<RawVerdict>(strip_code_fence(raw))
        .ok()
        .map(|v| ValidationVerdict {
            passed: v.relevance_passed,
            reason: v.reason,
        })
}

const CRITERIA: &str = r#"Criteria:
1. If the user asked a travel-related question: Does the response answer it reasonably?
2. If trip context was provided: Does the response use it when relevant?
3. If the user shared personal info (like their name): Does the response acknowledge it?
4. If the user asked something OFF-TOPIC (not travel related): Does the response politely redirect? THIS IS VALID.
5. For greetings/casual chat: Is the response friendly and appropriate?

VALID responses (should PASS):
- Politely redirecting off-topic questions to travel topics
- Asking for clarification
- Adding disclaimers about checking official sources
- Saying "I don't have real-time data" and providing what's available
- Providing best-effort answers with caveats about data freshness
- Any reasonable attempt to answer the question, even if imperfect

INVALID responses (should FAIL):
- Completely ignoring the user's question
- Making up information without any source
- Giving a totally unrelated response

BE LENIENT: If the response makes a reasonable attempt to answer, even if the data isn't perfect, pass it.
Weather data may be forecasts or slightly dated - this is acceptable with a disclaimer.

Respond with ONLY valid JSON:
{"relevance_passed": true, "reason": "brief explanation"}
OR
{"relevance_passed": false, "reason": "what's wrong"}"#;

pub fn build_prompt(query: &str, draft: &str, trip: Option<&TripContext>) -> String {
    let hint = trip
        .and_then(TripContext::validation_hint)
        .map(|h| format!("\n{}\n", h))
        .unwrap_or_default();

    format!(
        "Evaluate if this response appropriately addresses the user's message.\n\n\
         User's message: {}\n\
         Assistant's response: {}\n{}\n{}",
        query, draft, hint, CRITERIA
    )
}

/// Run one validation pass over the pending draft
pub async fn validate(ctx: &AppContext, state: &mut ConversationState, sink: &dyn ProgressSink) -> Result<()> {
    let settings = &ctx.workflow.settings;
    info!(
        attempt = state.retry_count + 1,
        max = settings.max_retries,
        "Checking draft relevance"
    );

    match plan(state, settings) {
        ValidationPlan::RejectEmpty => {
            warn!("No draft to validate");
            metrics::record_verdict("failed");
            state.apply_verdict(false);
        }
        ValidationPlan::ForceAccept => {
            info!(
                retry_count = state.retry_count,
                sources = ?state.sources_used,
                "Attempt threshold reached, accepting draft"
            );
            sink.emit(Progress::thought(Phase::Validation, "Proceeding with best available information"));
            metrics::record_verdict("skipped");
            state.apply_verdict(true);
        }
        ValidationPlan::Consult => {
            let query = state.query.clone().unwrap_or_default();
            let prompt = build_prompt(&query, state.draft(), state.trip_context.as_ref());
            let raw = complete_timed(ctx.llm.as_ref(), "validate", &[ChatMessage::user(prompt)]).await?;

            match parse_verdict(&raw) {
                Some(verdict) => {
                    info!(passed = verdict.passed, reason = %verdict.reason, "Relevance verdict");
                    let (label, thought) = if verdict.passed {
                        ("passed", "Answer verified")
                    } else {
                        ("failed", "Refining answer...")
                    };
                    sink.emit(Progress::thought(Phase::Validation, thought));
                    metrics::record_verdict(label);
                    state.apply_verdict(verdict.passed);
                }
                None => {
                    let preview: String = raw.chars().take(100).collect();
                    warn!("Unparsable relevance verdict, accepting draft");
                    debug!(raw = %preview, "Relevance response");
                    sink.emit(Progress::thought(Phase::Validation, "Proceeding with response"));
                    metrics::record_verdict("unparsable");
                    state.apply_verdict(true);
                }
            }
        }
    }

    Ok(())
}
