//! Draft generation
//!
//! Builds the grounding message set and asks the model for one draft. The
//! grounding sections always follow knowledge base, web, visa order no
//! matter which connector finished first.

use tracing::info;
use tripwise_common::{ChatMessage, KnowledgeHit, Result, WebPayload};

use crate::context::{complete_timed, AppContext};
use crate::state::{ConversationState, SourceKind, VisaOutcome};
use crate::trip::TripContext;
use crate::workflow::CycleSettings;

/// Reply used for requests outside the assistant's scope
pub const OFF_TOPIC_REPLY: &str = "I'm Tripwise, your travel assistant! I can help with visa requirements, \
flight info, baggage rules, and travel tips. What travel questions can I help you with?";

const PERSONA: &str = "You are Tripwise, a helpful travel assistant specializing in:
- Visa and immigration requirements
- Flight information and airline policies
- TSA/security regulations and baggage rules
- Travel tips and destination information
- Customs and entry requirements";

const TRIP_GUIDANCE: &str = "Use these details to personalize your responses. For example:
- If they ask about visas, use their nationality and destination
- If they ask about flights, reference their origin/destination
- If they mention \"my trip\" or \"my flight\", you know their travel plans
- Proactively mention relevant info based on their trip";

const EDGE_CASES: &str = "EDGE CASES TO HANDLE:
- If information might be outdated or change frequently (COVID rules, visa policies, health requirements), add a brief disclaimer like \"Policies may change - verify with official sources before travel.\"
- If sources conflict, mention the discrepancy and recommend checking official sources.
- If you don't have enough info to answer accurately, ask clarifying questions rather than guessing.
- For visa questions without nationality/destination, ask the user to provide their passport country and destination.
- For time-sensitive questions (flights, weather), note that info may not be real-time.
- If user asks about a specific airline but no airline_code in context, ask which airline.

NEVER:
- Make up visa requirements or entry rules
- Guarantee entry to any country (final decision is always with immigration)
- Provide medical or legal advice beyond general travel health/document info
- Assume nationality or destination if not provided - ask instead";

/// Basename of a document path
fn source_name(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}

pub fn format_knowledge(hits: Option<&[KnowledgeHit]>) -> Vec<String> {
    let hits = match hits {
        Some(hits) if !hits.is_empty() => hits,
        _ => return vec!["No relevant information in knowledge base.".to_string()],
    };

    let mut lines = vec!["=== Knowledge Base ===".to_string()];
    for (i, hit) in hits.iter().enumerate() {
        lines.push(format!("\n[Source {} - {}]", i + 1, source_name(&hit.source)));
        lines.push(hit.content.clone());
    }
    lines
}

pub fn format_web(payload: Option<&WebPayload>, shown: usize, snippet_chars: usize) -> Vec<String> {
    let Some(payload) = payload else {
        return vec!["Web search returned no results.".to_string()];
    };

    let mut lines = vec!["\n=== Web Search ===".to_string()];
    if !payload.summary.is_empty() {
        lines.push(format!("Summary: {}\n", payload.summary));
    }
    for (i, result) in payload.results.iter().take(shown).enumerate() {
        let title = if result.title.is_empty() { "Untitled" } else { result.title.as_str() };
        let snippet: String = result.content.chars().take(snippet_chars).collect();
        lines.push(format!("[Result {}] {}", i + 1, title));
        lines.push(format!("{}...\n", snippet));
    }
    lines
}

pub fn format_visa(outcome: Option<&VisaOutcome>) -> Vec<String> {
    let payload = outcome.and_then(VisaOutcome::grounding_payload);
    let Some(payload) = payload else {
        return vec!["Visa information not available.".to_string()];
    };

    let pretty = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    vec!["\n=== Visa Requirements ===".to_string(), pretty]
}

fn trip_section(trip: &TripContext) -> Option<String> {
    let lines = trip.summary_lines();
    if lines.is_empty() {
        return None;
    }
    let bullets: Vec<String> = lines.iter().map(|l| format!("- {}", l)).collect();
    Some(format!("\nUSER'S TRIP DETAILS:\n{}\n\n{}\n", bullets.join("\n"), TRIP_GUIDANCE))
}

/// System prompt: persona, trip details, rules, then grounding sections
pub fn system_prompt(state: &ConversationState, settings: &CycleSettings) -> String {
    let trip = state.trip_context.as_ref();
    let language = trip.map(|t| t.answer_language).unwrap_or_default();

    let mut prompt = String::from(PERSONA);
    if let Some(section) = trip.and_then(trip_section) {
        prompt.push_str(&section);
    }
    prompt.push_str(&format!("\nRESPONSE LANGUAGE: Respond in {}.\n\n", language.display_name()));
    prompt.push_str(&format!(
        "IMPORTANT RULES:\n\
         1. Remember details the user has shared (like their name, travel plans, etc.)\n\
         2. If trip context is provided, USE IT to give personalized answers\n\
         3. For off-topic questions unrelated to travel/aviation, politely redirect:\n   \"{}\"\n\
         4. For casual greetings or personal info, respond naturally and remember it.\n\
         5. Be direct, helpful, and conversational.\n\
         6. When answering questions, naturally incorporate the user's trip details when relevant.\n\n",
        OFF_TOPIC_REPLY
    ));
    prompt.push_str(EDGE_CASES);

    let sources = state.sources_in_priority();
    if sources.is_empty() {
        return prompt;
    }

    let mut sections = Vec::new();
    for kind in &sources {
        match kind {
            SourceKind::Knowledge => sections.extend(format_knowledge(state.knowledge_results.as_deref())),
            SourceKind::Web => sections.extend(format_web(
                state.web_results.as_ref(),
                settings.web_results_shown,
                settings.web_snippet_chars,
            )),
            SourceKind::Visa => sections.extend(format_visa(state.visa_results.as_ref())),
        }
    }
    let labels: Vec<&str> = sources.iter().map(SourceKind::label).collect();

    prompt.push_str(&format!(
        "\n\nAvailable information from {} sources:\n{}\n\nUse these sources to provide accurate information when relevant.",
        labels.join(", "),
        sections.join("\n")
    ));
    prompt
}

/// Full message set: system prompt followed by the conversation history
pub fn build_messages(state: &ConversationState, settings: &CycleSettings) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(ChatMessage::system(system_prompt(state, settings)));
    messages.extend(state.messages.iter().cloned());
    messages
}

/// Request one draft and record it on `state`
pub async fn generate(ctx: &AppContext, state: &mut ConversationState) -> Result<()> {
    info!(
        sources = ?state.sources_in_priority(),
        attempt = state.retry_count + 1,
        "Generating draft"
    );

    let messages = build_messages(state, &ctx.workflow.settings);
    let draft = complete_timed(ctx.llm.as_ref(), "generate", &messages).await?;
    state.apply_draft(draft);
    Ok(())
}
