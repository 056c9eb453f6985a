//! Conversation state threaded through one answer cycle
//!
//! The state is owned by the cycle while it runs. Stages mutate it through
//! the narrow methods below so the bookkeeping rules live in one place:
//! - source labels reset at every fresh classification
//! - labels only grow within a cycle and never repeat
//! - retrieval payloads from an earlier cycle are never reused

use serde::{Deserialize, Serialize};
use tripwise_common::{ChatMessage, KnowledgeHit, Role, WebPayload};

use crate::trip::TripContext;

/// Retrieval source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    #[serde(rename = "rag")]
    Knowledge,
    #[serde(rename = "web")]
    Web,
    #[serde(rename = "visa")]
    Visa,
}

impl SourceKind {
    /// Order in which sources appear in the grounding context
    pub const PRIORITY: [SourceKind; 3] = [SourceKind::Knowledge, SourceKind::Web, SourceKind::Visa];

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Knowledge => "rag",
            SourceKind::Web => "web",
            SourceKind::Visa => "visa",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Merge newly reported labels into the accumulated list.
///
/// An empty `incoming` list is the reset issued by a fresh classification.
/// Otherwise labels are appended in order, skipping ones already present.
pub fn merge_sources(existing: &[SourceKind], incoming: &[SourceKind]) -> Vec<SourceKind> {
    if incoming.is_empty() {
        return Vec::new();
    }

    let mut merged: Vec<SourceKind> = Vec::with_capacity(existing.len() + incoming.len());
    for kind in existing.iter().chain(incoming) {
        if !merged.contains(kind) {
            merged.push(*kind);
        }
    }
    merged
}

/// Question category assigned by the classifier
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Visa,
    #[default]
    General,
    Security,
    Baggage,
    Customs,
    Weather,
    Health,
    Transit,
    CountrySpecific,
}

/// Source selection for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decision {
    pub query_type: QueryType,
    pub needs_visa: bool,
    pub needs_web: bool,
    pub needs_rag: bool,
}

/// Verdict of one validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub reason: String,
}

/// Outcome of the visa connector task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VisaOutcome {
    /// Provider payload
    Found { payload: serde_json::Value },
    /// Trip context lacks what the lookup needs
    Incomplete {
        missing_fields: Vec<String>,
        message: String,
    },
    /// Lookup was attempted and failed
    Unavailable,
}

impl VisaOutcome {
    pub fn incomplete(missing: &[&str]) -> Self {
        VisaOutcome::Incomplete {
            missing_fields: missing.iter().map(|m| m.to_string()).collect(),
            message: format!(
                "To check visa requirements, I need to know your {}.",
                missing.join(" and ")
            ),
        }
    }

    /// JSON shown to the drafting model, `None` when nothing is known
    pub fn grounding_payload(&self) -> Option<serde_json::Value> {
        match self {
            VisaOutcome::Found { payload } => Some(payload.clone()),
            VisaOutcome::Incomplete { missing_fields, message } => Some(serde_json::json!({
                "status": "incomplete",
                "missing_fields": missing_fields,
                "message": message,
            })),
            VisaOutcome::Unavailable => None,
        }
    }
}

/// Output of one retrieval task
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    Knowledge(Vec<KnowledgeHit>),
    Web(Option<WebPayload>),
    Visa(VisaOutcome),
}

impl RetrievalResult {
    pub fn kind(&self) -> SourceKind {
        match self {
            RetrievalResult::Knowledge(_) => SourceKind::Knowledge,
            RetrievalResult::Web(_) => SourceKind::Web,
            RetrievalResult::Visa(_) => SourceKind::Visa,
        }
    }
}

/// Everything the engine knows about a conversation during one turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Role-tagged history, append-only
    pub messages: Vec<ChatMessage>,
    pub trip_context: Option<TripContext>,

    /// Active query, fixed at the first classification of the turn
    pub query: Option<String>,
    pub query_type: Option<QueryType>,

    pub needs_visa: bool,
    pub needs_web: bool,
    pub needs_rag: bool,

    /// Labels of sources consulted in the current cycle
    pub sources_used: Vec<SourceKind>,

    pub knowledge_results: Option<Vec<KnowledgeHit>>,
    pub web_results: Option<WebPayload>,
    pub visa_results: Option<VisaOutcome>,

    pub validation_passed: bool,
    pub retry_count: u32,

    /// Latest draft awaiting validation and delivery
    pub pending_response: Option<String>,
}

impl ConversationState {
    /// Fresh per-turn state over hydrated history
    pub fn new(messages: Vec<ChatMessage>, trip_context: Option<TripContext>) -> Self {
        Self {
            messages,
            trip_context,
            ..Default::default()
        }
    }

    /// Content of the most recent user turn
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Record a fresh classification, discarding the previous cycle's retrieval
    pub fn apply_decision(&mut self, query: String, decision: Decision) {
        self.query = Some(query);
        self.query_type = Some(decision.query_type);
        self.needs_visa = decision.needs_visa;
        self.needs_web = decision.needs_web;
        self.needs_rag = decision.needs_rag;
        self.sources_used = merge_sources(&self.sources_used, &[]);
        self.knowledge_results = None;
        self.web_results = None;
        self.visa_results = None;
    }

    /// Fan-in of one retrieval task
    pub fn apply_retrieval(&mut self, result: RetrievalResult) {
        self.sources_used = merge_sources(&self.sources_used, &[result.kind()]);
        match result {
            RetrievalResult::Knowledge(hits) => self.knowledge_results = Some(hits),
            RetrievalResult::Web(payload) => self.web_results = payload,
            RetrievalResult::Visa(outcome) => self.visa_results = Some(outcome),
        }
    }

    /// Record the draft as the next assistant turn
    pub fn apply_draft(&mut self, draft: String) {
        self.messages.push(ChatMessage::assistant(draft.clone()));
        self.pending_response = Some(draft);
    }

    /// Record a validation pass; the counter moves on every pass
    pub fn apply_verdict(&mut self, passed: bool) {
        self.validation_passed = passed;
        self.retry_count += 1;
    }

    /// Sources used this cycle, in grounding order
    pub fn sources_in_priority(&self) -> Vec<SourceKind> {
        SourceKind::PRIORITY
            .into_iter()
            .filter(|k| self.sources_used.contains(k))
            .collect()
    }

    pub fn draft(&self) -> &str {
        self.pending_response.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SourceKind::*;

    #[test]
    fn test_merge_resets_on_empty() {
        assert!(merge_sources(&[Web, Visa], &[]).is_empty());
    }

    #[test]
    fn test_merge_preserves_order_and_dedups() {
        assert_eq!(merge_sources(&[Web], &[Knowledge, Web]), vec![Web, Knowledge]);
        assert_eq!(merge_sources(&[], &[Visa, Visa]), vec![Visa]);
    }

    #[test]
    fn test_merge_is_completion_order_independent_as_a_set() {
        let orders = [
            [Knowledge, Web, Visa],
            [Visa, Web, Knowledge],
            [Web, Visa, Knowledge],
        ];
        for order in orders {
            let mut acc = Vec::new();
            for kind in order {
                acc = merge_sources(&acc, &[kind]);
            }
            assert_eq!(acc.len(), 3);
            for kind in SourceKind::PRIORITY {
                assert_eq!(acc.iter().filter(|k| **k == kind).count(), 1);
            }
        }
    }

    #[test]
    fn test_repeated_retrieval_does_not_duplicate_labels() {
        let mut state = ConversationState::default();
        let payload = WebPayload { summary: "s".into(), results: vec![] };
        state.apply_retrieval(RetrievalResult::Web(Some(payload.clone())));
        state.apply_retrieval(RetrievalResult::Web(Some(payload)));
        assert_eq!(state.sources_used, vec![Web]);
    }

    #[test]
    fn test_apply_decision_clears_previous_cycle() {
        let mut state = ConversationState::default();
        state.apply_retrieval(RetrievalResult::Knowledge(vec![]));
        state.apply_retrieval(RetrievalResult::Visa(VisaOutcome::Unavailable));

        state.apply_decision("q".into(), Decision { needs_web: true, ..Default::default() });

        assert!(state.sources_used.is_empty());
        assert!(state.knowledge_results.is_none());
        assert!(state.visa_results.is_none());
        assert!(state.needs_web);
    }

    #[test]
    fn test_sources_in_priority() {
        let state = ConversationState {
            sources_used: vec![Visa, Knowledge, Web],
            ..Default::default()
        };
        assert_eq!(state.sources_in_priority(), vec![Knowledge, Web, Visa]);
    }

    #[test]
    fn test_incomplete_visa_message() {
        let outcome = VisaOutcome::incomplete(&["passport country", "destination"]);
        let payload = outcome.grounding_payload().unwrap();
        assert_eq!(payload["status"], "incomplete");
        assert_eq!(
            payload["message"],
            "To check visa requirements, I need to know your passport country and destination."
        );
        assert!(VisaOutcome::Unavailable.grounding_payload().is_none());
    }

    #[test]
    fn test_latest_user_message_and_draft() {
        let mut state = ConversationState::new(
            vec![ChatMessage::user("first"), ChatMessage::assistant("a"), ChatMessage::user("second")],
            None,
        );
        assert_eq!(state.latest_user_message(), Some("second"));

        state.apply_draft("answer".into());
        assert_eq!(state.messages.last().unwrap().content, "answer");
        assert_eq!(state.draft(), "answer");
    }

    #[test]
    fn test_verdict_always_advances_counter() {
        let mut state = ConversationState::default();
        state.apply_verdict(false);
        state.apply_verdict(true);
        assert_eq!(state.retry_count, 2);
        assert!(state.validation_passed);
    }
}
