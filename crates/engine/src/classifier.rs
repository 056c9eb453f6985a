//! Query classification
//!
//! Turns the active query into a [`Decision`] naming the sources to consult.
//! Classification never fails the cycle on bad model output: anything that
//! does not parse falls back to a general question with no sources.

use serde::Deserialize;
use tracing::{debug, info, warn};
use tripwise_common::{ChatMessage, Result};

use crate::context::{complete_timed, AppContext};
use crate::events::{Phase, Progress, ProgressSink};
use crate::state::{ConversationState, Decision, QueryType, SourceKind};
use crate::trip::TripContext;

/// Parsed model output, or the reason it could not be used
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Parsed(Decision),
    ParseError { raw: String, error: String },
}

impl Classification {
    /// The parsed decision, or the conservative default
    pub fn into_decision(self) -> Decision {
        match self {
            Classification::Parsed(decision) => decision,
            Classification::ParseError { .. } => Decision::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawDecision {
    query_type: QueryType,
    #[serde(default)]
    needs_visa_api: bool,
    #[serde(default)]
    needs_web_search: bool,
    #[serde(default)]
    needs_rag: bool,
}

/// Remove a surrounding markdown code fence, with or without a `json` tag
pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split("```").next().unwrap_or(rest);
    body.strip_prefix("json").unwrap_or(body).trim()
}

pub fn parse_decision(raw: &str) -> Classification {
    match serde_json::from_str::<RawDecision>(strip_code_fence(raw)) {
        Ok(parsed) => Classification::Parsed(Decision {
            query_type: parsed.query_type,
            needs_visa: parsed.needs_visa_api,
            needs_web: parsed.needs_web_search,
            needs_rag: parsed.needs_rag,
        }),
        Err(e) => Classification::ParseError {
            raw: raw.to_string(),
            error: e.to_string(),
        },
    }
}

const CLASSIFY_RULES: &str = r#"Respond with ONLY the raw JSON object. Do NOT use markdown code blocks, backticks, or any formatting.
Your response must be ONLY valid JSON that can be directly parsed.

Format:
{
    "query_type": "general",
    "needs_visa_api": false,
    "needs_web_search": false,
    "needs_rag": false
}

Rules:
- If asking about visa requirements, entry requirements, documents needed → needs_visa_api: true
- If user has trip context with nationality + destination and asks about entry/visa → needs_visa_api: true
- If asking about security/TSA/baggage rules for USA, Canada, or South Korea → needs_rag: true
- If asking about security/TSA/baggage rules for OTHER countries → needs_web_search: true
- If asking about GENERAL travel topics (liquids, carry-on, prohibited items) → needs_rag: true
- If asking about current news, flights, weather, prices → needs_web_search: true
- For complex questions, multiple sources may be needed

EDGE CASES TO HANDLE:
- "Can I bring X?" → needs_rag (security/baggage rules)
- "How long can I stay?" → needs_visa_api (visa duration)
- "Do I need to quarantine?" → needs_web_search (current policies change)
- "What's the weather like?" → needs_web_search (real-time data)
- "Is it safe to travel to X?" → needs_web_search (current events)
- "What vaccines do I need?" → needs_web_search (health requirements change)
- "How early should I arrive?" → needs_rag (airport procedures)
- "Transit visa" or "layover" questions → needs_visa_api
- Currency, tipping, local customs → needs_web_search
- Questions mentioning specific airlines → needs_web_search (airline-specific policies)

IMPLICIT QUESTIONS (user has trip context):
- "What do I need?" → If destination exists, likely asking about visa/entry requirements
- "Am I allowed?" → Could be visa or security depending on context
- "Any restrictions?" → Check both visa and current travel advisories

query_type can be: "visa", "general", "security", "baggage", "customs", "weather", "health", "transit", "country_specific"

IMPORTANT: Output ONLY the JSON object with no markdown formatting."#;

pub fn build_prompt(
    query: &str,
    trip: Option<&TripContext>,
    retry_count: u32,
    previous_sources: &[SourceKind],
) -> String {
    let mut prompt = format!(
        "You are analyzing a travel question. Determine what information sources are needed.\n\nQuestion: {}\n",
        query
    );

    if let Some(trip) = trip {
        prompt.push('\n');
        prompt.push_str(&trip.classifier_block());
        prompt.push('\n');
    }

    if retry_count > 0 {
        let tried: Vec<&str> = previous_sources.iter().map(SourceKind::label).collect();
        prompt.push_str(&format!(
            "\nRETRY ATTEMPT {}: Previous answer was insufficient.\n\
             Sources already tried: [{}]\n\
             Try to be MORE COMPREHENSIVE - consider if additional sources would help.\n",
            retry_count,
            tried.join(", ")
        ));
    }

    prompt.push('\n');
    prompt.push_str(CLASSIFY_RULES);
    prompt
}

/// Classify the active query and record the decision on `state`.
///
/// The first cycle of a turn takes the query from the latest user message;
/// retries reuse the stored query verbatim.
pub async fn classify(ctx: &AppContext, state: &mut ConversationState, sink: &dyn ProgressSink) -> Result<Decision> {
    let retry_count = state.retry_count;
    let previous_sources = state.sources_used.clone();

    let query = if retry_count == 0 {
        state.latest_user_message().unwrap_or_default().to_string()
    } else {
        state.query.clone().unwrap_or_default()
    };

    if query.trim().is_empty() {
        warn!("No query found, skipping classification");
        let decision = Decision::default();
        state.apply_decision(String::new(), decision);
        return Ok(decision);
    }

    sink.emit(Progress::thought(
        Phase::Analysis,
        if retry_count == 0 { "Analyzing your question..." } else { "Trying different approach..." },
    ));

    let prompt = build_prompt(&query, state.trip_context.as_ref(), retry_count, &previous_sources);
    let raw = complete_timed(ctx.llm.as_ref(), "classify", &[ChatMessage::user(prompt)]).await?;

    let decision = match parse_decision(&raw) {
        Classification::Parsed(decision) => {
            info!(
                retry_count,
                query_type = ?decision.query_type,
                needs_visa = decision.needs_visa,
                needs_web = decision.needs_web,
                needs_rag = decision.needs_rag,
                "Query classified"
            );
            decision
        }
        Classification::ParseError { raw, error } => {
            warn!(retry_count, error = %error, "Unparsable classification, using default");
            debug!(raw = %raw, "Classification response");
            Decision::default()
        }
    };

    state.apply_decision(query, decision);
    Ok(decision)
}
