//! Scripted collaborators for engine tests

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tripwise_common::connectors::{KnowledgeSearch, VisaLookup, WebSearch};
use tripwise_common::llm::TextStream;
use tripwise_common::{AppError, ChatMessage, KnowledgeHit, LmGateway, Result, Role, WebPayload, WebResult};

use crate::context::AppContext;
use crate::events::{Progress, ProgressSink};
use crate::workflow::Workflow;

/// LM fake answering each call purpose from its own script.
///
/// The last scripted answer for a purpose repeats once the script runs out.
pub struct ScriptedLm {
    scripts: Mutex<HashMap<&'static str, VecDeque<String>>>,
    prompts: Mutex<Vec<(&'static str, String)>>,
    failing: bool,
    delay: Option<Duration>,
}

impl ScriptedLm {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            failing: false,
            delay: None,
        }
    }

    /// Every call fails as if the provider were unreachable
    pub fn failing() -> Self {
        Self { failing: true, ..Self::new() }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script<'a>(self, purpose: &'static str, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .extend(responses.into_iter().map(String::from));
        self
    }

    pub fn classify<'a>(self, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.script("classify", responses)
    }

    pub fn generate<'a>(self, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.script("generate", responses)
    }

    pub fn validate<'a>(self, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.script("validate", responses)
    }

    pub fn title<'a>(self, responses: impl IntoIterator<Item = &'a str>) -> Self {
        self.script("title", responses)
    }

    pub fn calls(&self, purpose: &str) -> usize {
        self.prompts.lock().unwrap().iter().filter(|(p, _)| *p == purpose).count()
    }

    /// All message contents of the most recent call for `purpose`
    pub fn last_prompt(&self, purpose: &str) -> Option<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| *p == purpose)
            .map(|(_, prompt)| prompt.clone())
    }

    fn purpose_of(messages: &[ChatMessage]) -> &'static str {
        if messages.first().map(|m| m.role) == Some(Role::System) {
            return "generate";
        }
        let text = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        if text.contains("Determine what information sources are needed") {
            "classify"
        } else if text.contains("Evaluate if this response") {
            "validate"
        } else if text.contains("Generate a short, descriptive title") {
            "title"
        } else {
            "generate"
        }
    }

    fn fallback(purpose: &str) -> &'static str {
        match purpose {
            "classify" => r#"{"query_type": "general"}"#,
            "validate" => r#"{"relevance_passed": true, "reason": "ok"}"#,
            "title" => "Travel Chat",
            _ => "OK",
        }
    }

    fn next_response(&self, purpose: &'static str) -> String {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(purpose) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Self::fallback(purpose).to_string(),
        }
    }
}

#[async_trait]
impl LmGateway for ScriptedLm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let purpose = Self::purpose_of(messages);
        let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        self.prompts.lock().unwrap().push((purpose, prompt));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(AppError::LlmUnavailable { message: "connection refused".into() });
        }
        Ok(self.next_response(purpose))
    }

    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let text = self.complete(messages).await?;
        let parts: Vec<Result<String>> = crate::stream::fragments(&text, 4)
            .into_iter()
            .map(|p| Ok(p.to_string()))
            .collect();
        Ok(futures::stream::iter(parts).boxed())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub struct FakeKnowledge {
    hits: Vec<KnowledgeHit>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FakeKnowledge {
    pub fn with(hits: Vec<KnowledgeHit>) -> Self {
        Self { hits, delay: None, calls: Arc::default() }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl KnowledgeSearch for FakeKnowledge {
    async fn search(&self, _query: &str, k: usize, score_threshold: f32) -> Vec<KnowledgeHit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.hits
            .iter()
            .filter(|h| h.score >= score_threshold)
            .take(k)
            .cloned()
            .collect()
    }
}

pub struct FakeWeb {
    payload: Option<WebPayload>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FakeWeb {
    pub fn with(payload: WebPayload) -> Self {
        Self { payload: Some(payload), delay: None, calls: Arc::default() }
    }

    pub fn failing() -> Self {
        Self { payload: None, delay: None, calls: Arc::default() }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl WebSearch for FakeWeb {
    async fn search(&self, _query: &str, _max_results: usize) -> Option<WebPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.payload.clone()
    }
}

pub struct FakeVisa {
    payload: Option<serde_json::Value>,
    calls: Arc<AtomicUsize>,
}

impl FakeVisa {
    pub fn with(payload: serde_json::Value) -> Self {
        Self { payload: Some(payload), calls: Arc::default() }
    }

    pub fn failing() -> Self {
        Self { payload: None, calls: Arc::default() }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl VisaLookup for FakeVisa {
    async fn lookup(&self, _nationality_code: &str, _destination_code: &str) -> Option<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payload.clone()
    }
}

/// Builder for an [`AppContext`] over fakes
pub struct TestContext {
    llm: Arc<ScriptedLm>,
    knowledge: FakeKnowledge,
    web: FakeWeb,
    visa: FakeVisa,
    workflow: Workflow,
}

impl TestContext {
    pub fn new(llm: Arc<ScriptedLm>) -> Self {
        Self {
            llm,
            knowledge: FakeKnowledge::with(Vec::new()),
            web: FakeWeb::failing(),
            visa: FakeVisa::failing(),
            workflow: Workflow::default(),
        }
    }

    pub fn knowledge(mut self, knowledge: FakeKnowledge) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn web(mut self, web: FakeWeb) -> Self {
        self.web = web;
        self
    }

    pub fn visa(mut self, visa: FakeVisa) -> Self {
        self.visa = visa;
        self
    }

    pub fn build(self) -> AppContext {
        AppContext::new(
            self.llm,
            Arc::new(self.knowledge),
            Arc::new(self.web),
            Arc::new(self.visa),
            self.workflow,
        )
    }
}

pub fn context_with(llm: Arc<ScriptedLm>) -> AppContext {
    TestContext::new(llm).build()
}

/// Sink keeping everything it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Progress>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Progress> {
        self.events.lock().unwrap().clone()
    }

    pub fn thoughts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|p| match p {
                Progress::Thought(t) => Some(t.content),
                Progress::Text(_) => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|p| match p {
                Progress::Text(t) => Some(t),
                Progress::Thought(_) => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, progress: Progress) {
        self.events.lock().unwrap().push(progress);
    }
}

pub fn hit(content: &str, source: &str, score: f32) -> KnowledgeHit {
    KnowledgeHit {
        content: content.to_string(),
        source: source.to_string(),
        score,
        metadata: serde_json::json!({ "source": source }),
    }
}

pub fn web_payload(summary: &str, results: usize) -> WebPayload {
    WebPayload {
        summary: summary.to_string(),
        results: (1..=results)
            .map(|i| WebResult {
                title: format!("Result {}", i),
                content: format!("Details for result {}", i),
                url: format!("https://example.com/{}", i),
            })
            .collect(),
    }
}
