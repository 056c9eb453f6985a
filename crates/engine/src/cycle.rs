//! Stage-graph driver for one conversation turn

use tracing::{debug, info, Instrument};
use tripwise_common::Result;

use crate::context::AppContext;
use crate::events::ProgressSink;
use crate::state::{ConversationState, Decision};
use crate::workflow::Stage;
use crate::{classifier, generation, retrieval, stream, validation};

/// Drive `state` through the workflow until the answer is delivered.
///
/// Only LM gateway failures end the cycle early; everything else recovers
/// inside its stage.
pub async fn run_cycle(
    ctx: &AppContext,
    mut state: ConversationState,
    sink: &dyn ProgressSink,
) -> Result<ConversationState> {
    let workflow = ctx.workflow.clone();
    let mut decision = Decision::default();
    let mut stage = workflow.entry();

    loop {
        let span = tracing::debug_span!("stage", name = stage.name(), retry_count = state.retry_count);

        async {
            match &stage {
                Stage::Receive => receive(&state),
                Stage::Classify => decision = classifier::classify(ctx, &mut state, sink).await?,
                Stage::Retrieve(tasks) => retrieval::retrieve(ctx, &mut state, tasks, sink).await,
                Stage::Generate => generation::generate(ctx, &mut state).await?,
                Stage::Validate => validation::validate(ctx, &mut state, sink).await?,
                Stage::Stream => stream::emit(&state, workflow.settings.stream_chunk_chars, sink).await,
            }
            Ok::<(), tripwise_common::AppError>(())
        }
        .instrument(span)
        .await?;

        match workflow.successor(&stage, &state, &decision) {
            Some(next) => stage = next,
            None => break,
        }
    }

    info!(
        retry_count = state.retry_count,
        passed = state.validation_passed,
        "Cycle complete"
    );
    Ok(state)
}

/// Entry stage: log the hydrated history
fn receive(state: &ConversationState) {
    info!(messages = state.messages.len(), "Turn received");
    for (i, message) in state.messages.iter().enumerate() {
        let preview: String = message.content.chars().take(50).collect();
        debug!(index = i, role = ?message.role, preview = %preview, "History");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Progress;
    use crate::state::{SourceKind, VisaOutcome};
    use crate::testing::{hit, web_payload, FakeKnowledge, FakeVisa, FakeWeb, RecordingSink, ScriptedLm, TestContext};
    use crate::trip::TripContext;
    use std::sync::Arc;
    use tripwise_common::ChatMessage;

    fn turn(query: &str, trip: Option<TripContext>) -> ConversationState {
        ConversationState::new(vec![ChatMessage::user(query)], trip)
    }

    #[tokio::test]
    async fn test_weather_question_grounds_on_web_only() {
        let lm = Arc::new(
            ScriptedLm::new()
                .classify([r#"{"query_type": "weather", "needs_web_search": true}"#])
                .generate(["Expect mild spring weather in Seoul."])
                .validate([r#"{"relevance_passed": true, "reason": "answers"}"#]),
        );
        let web = FakeWeb::with(web_payload("Seoul is 18C and sunny", 2));
        let web_calls = web.calls();
        let knowledge = FakeKnowledge::with(vec![hit("Seoul subway guide", "docs/seoul.pdf", 0.9)]);
        let knowledge_calls = knowledge.calls();
        let visa = FakeVisa::with(serde_json::json!({"visa": "free"}));
        let visa_calls = visa.calls();
        let ctx = TestContext::new(lm.clone()).web(web).knowledge(knowledge).visa(visa).build();
        let sink = RecordingSink::default();

        let state = run_cycle(&ctx, turn("What's the weather in Seoul?", None), &sink).await.unwrap();

        assert_eq!(web_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(knowledge_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(visa_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(state.sources_used, vec![SourceKind::Web]);
        let system = lm.last_prompt("generate").unwrap();
        assert!(system.contains("Summary: Seoul is 18C and sunny"));
        assert!(!system.contains("=== Knowledge Base ==="));
        assert!(!system.contains("=== Visa Requirements ==="));
        assert_eq!(sink.texts().concat(), "Expect mild spring weather in Seoul.");
    }

    #[tokio::test]
    async fn test_visa_question_missing_destination_grounds_on_incomplete_marker() {
        let lm = Arc::new(
            ScriptedLm::new()
                .classify([r#"{"query_type": "visa", "needs_visa_api": true}"#])
                .generate(["Could you tell me your destination?"])
                .validate([r#"{"relevance_passed": true, "reason": "asks for clarification"}"#]),
        );
        let visa = FakeVisa::with(serde_json::json!({"visa": "required"}));
        let visa_calls = visa.calls();
        let ctx = TestContext::new(lm.clone()).visa(visa).build();
        let trip = TripContext { nationality_country_code: Some("KR".into()), ..Default::default() };

        let state = run_cycle(&ctx, turn("Do I need a visa?", Some(trip)), &RecordingSink::default())
            .await
            .unwrap();

        assert_eq!(visa_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(state.visa_results, Some(VisaOutcome::incomplete(&["destination"])));
        let system = lm.last_prompt("generate").unwrap();
        assert!(system.contains("\"status\": \"incomplete\""));
        assert!(system.contains("\"destination\""));
        assert!(!system.contains("\"visa\": \"required\""));
        assert_eq!(state.draft(), "Could you tell me your destination?");
    }

    #[tokio::test]
    async fn test_prose_classification_goes_direct() {
        let lm = Arc::new(
            ScriptedLm::new()
                .classify(["I think this is about visas."])
                .generate(["Happy to help!"])
                .validate([r#"{"relevance_passed": true, "reason": "ok"}"#]),
        );
        let ctx = TestContext::new(lm.clone()).build();

        let state = run_cycle(&ctx, turn("Hello", None), &RecordingSink::default()).await.unwrap();

        assert!(state.sources_used.is_empty());
        assert!(!state.needs_visa && !state.needs_web && !state.needs_rag);
        assert_eq!(lm.calls("generate"), 1);
        assert!(!lm.last_prompt("generate").unwrap().contains("Available information"));
    }

    #[tokio::test]
    async fn test_two_failures_then_forced_accept() {
        let lm = Arc::new(
            ScriptedLm::new()
                .classify([r#"{"query_type": "general"}"#])
                .generate(["draft one", "draft two", "draft three"])
                .validate([
                    r#"{"relevance_passed": false, "reason": "vague"}"#,
                    r#"{"relevance_passed": false, "reason": "still vague"}"#,
                ]),
        );
        let ctx = TestContext::new(lm.clone()).build();
        let sink = RecordingSink::default();

        let state = run_cycle(&ctx, turn("Tell me about layovers", None), &sink).await.unwrap();

        assert_eq!(lm.calls("validate"), 2);
        assert_eq!(lm.calls("classify"), 3);
        assert_eq!(lm.calls("generate"), 3);
        assert_eq!(state.retry_count, 3);
        assert!(state.validation_passed);
        assert_eq!(sink.texts().concat(), "draft three");
        assert!(sink.thoughts().contains(&"Proceeding with best available information".to_string()));
        // every retry keeps the original query
        assert!(lm.last_prompt("classify").unwrap().contains("Question: Tell me about layovers"));
    }

    #[tokio::test]
    async fn test_empty_drafts_stop_at_ceiling() {
        let lm = Arc::new(ScriptedLm::new().classify([r#"{"query_type": "general"}"#]).generate([""]));
        let ctx = TestContext::new(lm.clone()).build();
        let sink = RecordingSink::default();

        let state = run_cycle(&ctx, turn("hi", None), &sink).await.unwrap();

        assert_eq!(state.retry_count, 5);
        assert_eq!(lm.calls("validate"), 0);
        assert_eq!(lm.calls("generate"), 5);
        assert!(sink.texts().is_empty());
    }

    #[tokio::test]
    async fn test_retry_count_bounded_for_any_verdict_sequence() {
        let verdicts = [
            r#"{"relevance_passed": false, "reason": "x"}"#,
            "garbage",
            r#"{"relevance_passed": true, "reason": "x"}"#,
        ];
        for first in verdicts {
            for second in verdicts {
                let lm = Arc::new(
                    ScriptedLm::new()
                        .classify([r#"{"query_type": "general"}"#])
                        .generate(["answer"])
                        .validate([first, second]),
                );
                let ctx = TestContext::new(lm.clone()).build();
                let state = run_cycle(&ctx, turn("q", None), &RecordingSink::default()).await.unwrap();
                assert!(state.retry_count <= 5);
                assert!(lm.calls("validate") <= 2);
            }
        }
    }

    #[tokio::test]
    async fn test_lm_outage_is_fatal_and_emits_no_text() {
        let ctx = TestContext::new(Arc::new(ScriptedLm::failing())).build();
        let sink = RecordingSink::default();

        let result = run_cycle(&ctx, turn("Do I need a visa?", None), &sink).await;

        assert!(result.is_err());
        assert!(sink.events().iter().all(|p| !matches!(p, Progress::Text(_))));
    }

    #[tokio::test]
    async fn test_web_outage_still_answers() {
        let lm = Arc::new(
            ScriptedLm::new()
                .classify([r#"{"query_type": "weather", "needs_web_search": true}"#])
                .generate(["I couldn't fetch live weather."])
                .validate([r#"{"relevance_passed": true, "reason": "ok"}"#]),
        );
        let ctx = TestContext::new(lm.clone()).web(FakeWeb::failing()).build();

        let state = run_cycle(&ctx, turn("Weather in Rome?", None), &RecordingSink::default()).await.unwrap();

        assert_eq!(state.sources_used, vec![SourceKind::Web]);
        assert!(lm.last_prompt("generate").unwrap().contains("Web search returned no results."));
    }
}
