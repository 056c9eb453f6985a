//! Chat streaming handler

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tracing::{debug, info};
use validator::Validate;

use crate::AppState;
use tripwise_common::errors::{AppError, Result};
use tripwise_common::ChatMessage;
use tripwise_engine::{generate_title, ConversationState, TripContext, TurnOutcome, TurnRequest};

const CHAT_ID_HEADER: HeaderName = HeaderName::from_static("x-chat-id");
const STREAM_PROTOCOL_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-ui-message-stream");

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    /// Existing conversation; a new one is created when absent
    #[serde(default, alias = "chat_id")]
    #[validate(length(min = 1, max = 64))]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub trip_context: Option<TripContext>,
}

/// Run one answer cycle and stream its events as SSE
pub async fn stream_chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Response> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let (conversation_id, title) = match request.conversation_id {
        Some(id) => {
            let record = state.store.get(&id).await?;
            (id, record.title)
        }
        None => {
            let title = generate_title(state.engine.context().llm.as_ref(), &request.message).await;
            let id = state.store.create(title.clone()).await;
            info!(conversation_id = %id, title = %title, "Conversation created");
            (id, title)
        }
    };

    let chat_id = HeaderValue::from_str(&conversation_id).map_err(|_| AppError::InvalidFormat {
        message: "conversation_id contains characters not allowed in a header".to_string(),
    })?;

    // Claimed before any write and held until the assistant turn is stored
    let guard = state.engine.claim(&conversation_id)?;

    let trip_context = state
        .store
        .upsert_trip_context(&conversation_id, request.trip_context)
        .await?;
    state
        .store
        .append(&conversation_id, ChatMessage::user(request.message))
        .await?;
    let history = state
        .store
        .history(&conversation_id, state.config.workflow.history_limit)
        .await?;

    let turn = TurnRequest {
        conversation_id: conversation_id.clone(),
        title,
        state: ConversationState::new(history, trip_context),
    };
    let handle = state.engine.start_turn(turn, guard)?;

    // The assistant turn is persisted only when the cycle completes
    let store = state.store.clone();
    let outcome = handle.outcome;
    tokio::spawn(async move {
        match outcome.await {
            Ok(TurnOutcome { state: finished, guard }) => {
                let answer = finished.draft().to_string();
                if let Err(e) = store.append(&conversation_id, ChatMessage::assistant(answer)).await {
                    tracing::warn!(error = %e, "Failed to persist assistant turn");
                }
                drop(guard);
            }
            Err(_) => debug!(conversation_id = %conversation_id, "Turn ended without an answer"),
        }
    });

    let events = handle
        .events
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.data())));

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (STREAM_PROTOCOL_HEADER, HeaderValue::from_static("v1")),
        (CHAT_ID_HEADER, chat_id),
    ];

    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_router, AppState};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use tripwise_common::config::AppConfig;
    use tripwise_common::connectors::Unconfigured;
    use tripwise_common::llm::TextStream;
    use tripwise_common::{LmGateway, Role};
    use tripwise_engine::{AppContext, Engine, Workflow};

    #[derive(Default)]
    struct StubLm {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl LmGateway for StubLm {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let prompt = messages.iter().map(|m| m.content.as_str()).collect::<String>();
            let answer = if prompt.contains("Generate a short, descriptive title") {
                "\"Tokyo Trip\""
            } else if prompt.contains("Determine what information sources are needed") {
                r#"{"query_type": "general"}"#
            } else if prompt.contains("Evaluate if this response") {
                r#"{"relevance_passed": true, "reason": "ok"}"#
            } else {
                "Enjoy Tokyo!"
            };
            Ok(answer.to_string())
        }

        async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<TextStream> {
            let text = self.complete(messages).await?;
            Ok(futures::stream::iter(vec![Ok(text)]).boxed())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn test_state() -> AppState {
        state_with(StubLm::default())
    }

    fn state_with(lm: StubLm) -> AppState {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        build_state(lm, config)
    }

    fn build_state(lm: StubLm, config: AppConfig) -> AppState {
        let ctx = AppContext::new(
            Arc::new(lm),
            Arc::new(Unconfigured::new("knowledge_base")),
            Arc::new(Unconfigured::new("web")),
            Arc::new(Unconfigured::new("visa")),
            Workflow::default(),
        );
        AppState::new(Arc::new(config), Engine::new(ctx))
    }

    fn chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_conversation_streams_answer() {
        let state = test_state();
        let app = create_router(state.clone());

        let response = app
            .oneshot(chat(serde_json::json!({ "message": "What should I see in Tokyo?" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let chat_id = response.headers()["x-chat-id"].to_str().unwrap().to_string();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#""type":"start""#));
        assert!(body.contains(r#""title":"Tokyo Trip""#));
        assert!(body.contains(r#""type":"finish""#));
        assert!(body.trim_end().ends_with("data: [DONE]"));

        // Assistant turn lands once the outcome is observed
        for _ in 0..50 {
            if state.store.get(&chat_id).await.unwrap().messages.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = state.store.get(&chat_id).await.unwrap();
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[1].content, "Enjoy Tokyo!");
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let app = create_router(test_state());

        let response = app.oneshot(chat(serde_json::json!({ "message": "" }))).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_conversation_not_found() {
        let app = create_router(test_state());

        let response = app
            .oneshot(chat(serde_json::json!({ "message": "hi", "conversation_id": "nope" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_busy_conversation_conflict() {
        let state = test_state();
        let id = state.store.create("Busy".into()).await;
        let _guard = state.engine.claim(&id).unwrap();
        let app = create_router(state.clone());

        let response = app
            .oneshot(chat(serde_json::json!({ "message": "hi", "conversation_id": id })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(state.store.get(&id).await.unwrap().messages.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_requests_leave_no_orphan_user_turns() {
        let state = state_with(StubLm {
            delay: Some(Duration::from_millis(20)),
        });
        let id = state.store.create("Race".into()).await;
        let app = create_router(state.clone());

        let requests = (0..8).map(|i| {
            let app = app.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let response = app
                    .oneshot(chat(serde_json::json!({ "message": format!("question {i}"), "conversation_id": id })))
                    .await
                    .unwrap();
                let status = response.status();
                to_bytes(response.into_body(), usize::MAX).await.unwrap();
                status
            })
        });
        let statuses: Vec<StatusCode> = futures::future::join_all(requests)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let accepted = statuses.iter().filter(|s| **s == StatusCode::OK).count();
        let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
        assert!(accepted >= 1);
        assert_eq!(accepted + conflicts, 8);

        for _ in 0..100 {
            if !state.engine.cycles().is_active(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let record = state.store.get(&id).await.unwrap();
        let users = record.messages.iter().filter(|m| m.role == Role::User).count();
        let answers = record.messages.iter().filter(|m| m.role == Role::Assistant).count();
        assert_eq!(users, accepted);
        assert_eq!(answers, accepted);
    }

    #[tokio::test]
    async fn test_conversation_stays_busy_until_answer_stored() {
        let state = test_state();
        let id = state.store.create("Follow-up".into()).await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(chat(serde_json::json!({ "message": "first", "conversation_id": id })))
            .await
            .unwrap();
        to_bytes(response.into_body(), usize::MAX).await.unwrap();

        // Any follow-up either waits out the claim or sees the stored answer
        let mut answered = false;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(chat(serde_json::json!({ "message": "second", "conversation_id": id })))
                .await
                .unwrap();
            if response.status() == StatusCode::OK {
                to_bytes(response.into_body(), usize::MAX).await.unwrap();
                answered = true;
                break;
            }
            assert_eq!(response.status(), StatusCode::CONFLICT);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(answered);

        let messages = state.store.get(&id).await.unwrap().messages;
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].content, "second");
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = false;
        config.server.request_timeout_secs = 1;
        let state = build_state(
            StubLm {
                delay: Some(Duration::from_secs(3)),
            },
            config,
        );
        let app = create_router(state);

        // Title generation for a new conversation runs before the response
        let response = app.oneshot(chat(serde_json::json!({ "message": "hello" }))).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
