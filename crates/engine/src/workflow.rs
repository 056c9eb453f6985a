//! Stage graph of the answer cycle
//!
//! The graph is an immutable descriptor built once at startup and shared by
//! every cycle. Receive → Classify → {Retrieve →} Generate → Validate →
//! {Classify | Stream}.

use tripwise_common::config::WorkflowConfig;

use crate::dispatcher::{dispatch, Dispatch};
use crate::retry::{route, Route};
use crate::state::{ConversationState, Decision, SourceKind};

/// Tunables read by the stages
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    /// Skip the validation call once this many passes happened
    pub force_accept_after: u32,
    /// Accept regardless once this many passes happened
    pub max_retries: u32,
    pub stream_chunk_chars: usize,
    pub knowledge_top_k: usize,
    pub knowledge_score_threshold: f32,
    pub web_max_results: usize,
    pub web_results_shown: usize,
    pub web_snippet_chars: usize,
}

impl From<&WorkflowConfig> for CycleSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            force_accept_after: config.force_accept_after,
            max_retries: config.max_retries,
            stream_chunk_chars: config.stream_chunk_chars.max(1),
            knowledge_top_k: config.knowledge_top_k,
            knowledge_score_threshold: config.knowledge_score_threshold,
            web_max_results: config.web_max_results,
            web_results_shown: config.web_results_shown,
            web_snippet_chars: config.web_snippet_chars,
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

/// Node of the stage graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Receive,
    Classify,
    /// Concurrent connector tasks
    Retrieve(Vec<SourceKind>),
    Generate,
    Validate,
    Stream,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Receive => "receive",
            Stage::Classify => "classify",
            Stage::Retrieve(_) => "retrieve",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Stream => "stream",
        }
    }
}

/// Immutable workflow descriptor
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    pub settings: CycleSettings,
}

impl Workflow {
    pub fn new(settings: CycleSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(CycleSettings::from(config))
    }

    pub fn entry(&self) -> Stage {
        Stage::Receive
    }

    /// Next stage after `stage` has run, `None` once the answer is delivered.
    ///
    /// `decision` is the classification of the current cycle and is only read
    /// after the classify stage.
    pub fn successor(&self, stage: &Stage, state: &ConversationState, decision: &Decision) -> Option<Stage> {
        match stage {
            Stage::Receive => Some(Stage::Classify),
            Stage::Classify => match dispatch(decision) {
                Dispatch::Direct => Some(Stage::Generate),
                Dispatch::FanOut(tasks) => Some(Stage::Retrieve(tasks)),
            },
            Stage::Retrieve(_) => Some(Stage::Generate),
            Stage::Generate => Some(Stage::Validate),
            Stage::Validate => match route(state, &self.settings) {
                Route::Accept => Some(Stage::Stream),
                Route::Retry => Some(Stage::Classify),
            },
            Stage::Stream => None,
        }
    }
}
