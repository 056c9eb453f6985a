//! OpenAI-compatible chat completions client

use super::{ChatMessage, LmGateway, TextStream};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Chat completions client with retry on transient failures
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
    timeout: Duration,
    retry_budget: Duration,
}

impl OpenAiGateway {
    /// Create a new gateway from configuration
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required".to_string(),
        })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            timeout,
            retry_budget: Duration::from_secs(config.retry_budget_secs),
        })
    }

    /// POST the request, retrying connection failures, timeouts, 429 and 5xx
    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.retry_budget))
            .build();

        let client = &self.client;
        let api_key = self.api_key.as_str();
        let url = url.as_str();
        let timeout_ms = self.timeout.as_millis() as u64;

        backoff::future::retry(policy, move || async move {
            let response = client
                .post(url)
                .bearer_auth(api_key)
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    let err = if e.is_timeout() {
                        AppError::LlmTimeout { timeout_ms }
                    } else {
                        AppError::HttpClient(e)
                    };
                    tracing::warn!(error = %err, transient = err.is_transient(), "LM request failed");
                    err.into_backoff()
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let err = AppError::UpstreamStatus {
                service: "llm".to_string(),
                status: status.as_u16(),
                body,
            };
            if err.is_transient() {
                tracing::warn!(status = status.as_u16(), "LM API returned retryable status");
            }
            Err(err.into_backoff())
        })
        .await
    }
}

#[async_trait]
impl LmGateway for OpenAiGateway {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: false,
        };

        let response = self.send(&request).await?;
        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::LlmUnavailable {
                message: format!("Failed to parse LM response: {}", e),
            }
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| AppError::LlmUnavailable {
                message: "Empty response from LM".to_string(),
            })
    }

    async fn stream_complete(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: true,
        };

        let response = self.send(&request).await?;

        let state = StreamState {
            inner: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            lines: LineBuffer::default(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(bytes)) => {
                        for line in st.lines.push(&bytes) {
                            match parse_stream_line(&line) {
                                StreamLine::Delta(text) => st.pending.push_back(Ok(text)),
                                StreamLine::Done => {
                                    st.done = true;
                                    break;
                                }
                                StreamLine::Skip => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        st.pending.push_back(Err(AppError::LlmUnavailable {
                            message: format!("Stream interrupted: {}", e),
                        }));
                    }
                    None => st.done = true,
                }
            }
        });

        Ok(stream.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

struct StreamState {
    inner: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    pending: VecDeque<Result<String>>,
    done: bool,
}

/// Splits a byte stream into complete lines
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_stream_line(line: &str) -> StreamLine {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return StreamLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|t| !t.is_empty())
            .map(StreamLine::Delta)
            .unwrap_or(StreamLine::Skip),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unparsable stream line");
            StreamLine::Skip
        }
    }
}
