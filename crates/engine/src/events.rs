//! Progress notifications and the caller-facing event stream
//!
//! Stages report through a [`ProgressSink`]: advisory thoughts and the text
//! fragments of the accepted answer. The sink never pushes back and never
//! affects control flow. [`ChannelSink`] turns those reports into
//! [`TurnEvent`]s for the caller.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// Terminal sentinel payload of the event stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Stage reporting a thought
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Analysis,
    Search,
    Knowledge,
    Visa,
    Validation,
}

/// Advisory progress notification
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Thought {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub content: String,
    pub phase: Phase,
}

/// What a stage can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Thought(Thought),
    Text(String),
}

impl Progress {
    pub fn thought(phase: Phase, content: impl Into<String>) -> Self {
        Progress::Thought(Thought {
            kind: "thought",
            content: content.into(),
            phase,
        })
    }
}

/// Fire-and-forget progress receiver
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: Progress);
}

/// Conversation identity shown to the caller
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metadata {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub title: String,
}

/// One caller-facing event
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TurnEvent {
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    #[serde(rename = "data-metadata")]
    Metadata { data: Metadata, transient: bool },
    #[serde(rename = "data-thought")]
    Thought { data: Thought, transient: bool },
    #[serde(rename = "text-start")]
    TextStart { id: String },
    #[serde(rename = "text-delta")]
    TextDelta { id: String, delta: String },
    #[serde(rename = "text-end")]
    TextEnd { id: String },
    #[serde(rename = "finish")]
    Finish,
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    /// End of stream marker, framed as the bare sentinel
    #[serde(rename = "done")]
    Done,
}

impl TurnEvent {
    /// Payload of the SSE `data:` field
    pub fn data(&self) -> String {
        match self {
            TurnEvent::Done => DONE_SENTINEL.to_string(),
            event => serde_json::to_string(event).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to serialize turn event");
                String::from(r#"{"type":"error","errorText":"serialization failure"}"#)
            }),
        }
    }

    /// Full SSE frame
    pub fn frame(&self) -> String {
        format!("data: {}\n\n", self.data())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done)
    }
}

/// Sink forwarding progress into an event channel
///
/// The text block is opened lazily so a failed cycle never shows an empty
/// answer block before its error event.
pub struct ChannelSink {
    tx: UnboundedSender<TurnEvent>,
    text_id: String,
    text_open: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<TurnEvent>, text_id: String) -> Self {
        Self {
            tx,
            text_id,
            text_open: AtomicBool::new(false),
        }
    }

    /// Send an event; a departed caller is not an error
    pub fn send(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }

    fn open_text(&self) {
        if !self.text_open.swap(true, Ordering::SeqCst) {
            self.send(TurnEvent::TextStart { id: self.text_id.clone() });
        }
    }

    /// Close the answer block, opening it first if no text was sent
    pub fn close_text(&self) {
        self.open_text();
        self.send(TurnEvent::TextEnd { id: self.text_id.clone() });
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, progress: Progress) {
        match progress {
            Progress::Thought(thought) => self.send(TurnEvent::Thought {
                data: thought,
                transient: true,
            }),
            Progress::Text(delta) => {
                self.open_text();
                self.send(TurnEvent::TextDelta {
                    id: self.text_id.clone(),
                    delta,
                });
            }
        }
    }
}
