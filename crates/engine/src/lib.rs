//! Tripwise Orchestration Engine
//!
//! Answers travel questions through a bounded stage graph:
//! - Classification of the query into a source selection
//! - Concurrent retrieval from knowledge base, web search and visa lookup
//! - Grounded draft generation
//! - Independent validation with a bounded retry loop
//! - Fragmented delivery of the accepted draft

pub mod classifier;
pub mod context;
pub mod cycle;
pub mod cycles;
pub mod dispatcher;
pub mod events;
pub mod generation;
pub mod retrieval;
pub mod retry;
pub mod state;
pub mod stream;
pub mod title;
pub mod trip;
pub mod turn;
pub mod validation;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use context::AppContext;
pub use cycles::CycleGuard;
pub use events::{ProgressSink, TurnEvent};
pub use state::{ConversationState, Decision, SourceKind};
pub use title::generate_title;
pub use trip::TripContext;
pub use turn::{Engine, TurnEvents, TurnHandle, TurnOutcome, TurnRequest};
pub use workflow::Workflow;
