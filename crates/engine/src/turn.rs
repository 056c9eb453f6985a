//! Turn execution
//!
//! Each turn runs on its own task and reports through an event stream.
//! Dropping the stream abandons the turn: in-flight connector and LM calls
//! are cancelled and no outcome is produced, so the caller persists nothing
//! beyond the user message it stored before starting.
//!
//! The caller claims the conversation before writing anything and hands the
//! claim to the turn. A completed turn passes the claim back with its
//! outcome, so the conversation stays busy until the caller has stored the
//! answer.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, Instrument};
use tripwise_common::metrics::CycleMetrics;
use tripwise_common::{AppError, Result};
use uuid::Uuid;

use crate::context::AppContext;
use crate::cycle::run_cycle;
use crate::cycles::{ActiveCycles, CycleGuard};
use crate::events::{ChannelSink, Metadata, TurnEvent};
use crate::state::ConversationState;

/// Message shown to the caller when the language model is unreachable
const UNAVAILABLE_MESSAGE: &str = "The assistant is temporarily unavailable. Please try again.";

/// Input for one turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub title: String,
    /// Hydrated state with the user's message already appended
    pub state: ConversationState,
}

/// Caller's view of a running turn
pub struct TurnHandle {
    pub events: TurnEvents,
    /// Sent only when the cycle completes
    pub outcome: oneshot::Receiver<TurnOutcome>,
}

/// Final state of a completed turn, still holding the conversation claim
pub struct TurnOutcome {
    pub state: ConversationState,
    pub guard: CycleGuard,
}

/// Ordered caller-facing events ending with [`TurnEvent::Done`]
pub struct TurnEvents {
    inner: UnboundedReceiverStream<TurnEvent>,
    task: JoinHandle<()>,
}

impl Stream for TurnEvents {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TurnEvents {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Orchestration engine entry point
#[derive(Clone)]
pub struct Engine {
    ctx: AppContext,
    cycles: ActiveCycles,
}

impl Engine {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            cycles: ActiveCycles::new(),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn cycles(&self) -> &ActiveCycles {
        &self.cycles
    }

    /// Claim a conversation; fails with `ConversationBusy` if it is already claimed
    pub fn claim(&self, conversation_id: &str) -> Result<CycleGuard> {
        self.cycles.try_acquire(conversation_id)
    }

    /// Start a turn under a claim obtained from [`Engine::claim`]
    pub fn start_turn(&self, request: TurnRequest, guard: CycleGuard) -> Result<TurnHandle> {
        if guard.conversation_id() != request.conversation_id {
            return Err(AppError::Internal {
                message: format!(
                    "claim for {} used to start a turn on {}",
                    guard.conversation_id(),
                    request.conversation_id
                ),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let span = tracing::info_span!("turn", conversation_id = %request.conversation_id);
        let task = tokio::spawn(drive_turn(self.ctx.clone(), request, tx, outcome_tx, guard).instrument(span));

        Ok(TurnHandle {
            events: TurnEvents {
                inner: UnboundedReceiverStream::new(rx),
                task,
            },
            outcome: outcome_rx,
        })
    }
}

async fn drive_turn(
    ctx: AppContext,
    request: TurnRequest,
    tx: mpsc::UnboundedSender<TurnEvent>,
    outcome_tx: oneshot::Sender<TurnOutcome>,
    guard: CycleGuard,
) {
    let metrics = CycleMetrics::start();
    let turn_id = Uuid::new_v4();
    let sink = ChannelSink::new(tx, format!("text_{}", turn_id));

    sink.send(TurnEvent::Start {
        message_id: format!("msg_{}", turn_id),
    });
    sink.send(TurnEvent::Metadata {
        data: Metadata {
            chat_id: request.conversation_id.clone(),
            title: request.title.clone(),
        },
        transient: true,
    });

    match run_cycle(&ctx, request.state, &sink).await {
        Ok(state) => {
            sink.close_text();
            if outcome_tx.send(TurnOutcome { state, guard }).is_err() {
                info!("Turn outcome receiver dropped");
            }
            sink.send(TurnEvent::Finish);
            metrics.finish("completed");
        }
        Err(e) => {
            error!(error = %e, "Cycle failed");
            sink.send(TurnEvent::Error {
                error_text: UNAVAILABLE_MESSAGE.to_string(),
            });
            metrics.finish("failed");
        }
    }

    sink.send(TurnEvent::Done);
}
