//! Application context shared by every cycle

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use tripwise_common::config::AppConfig;
use tripwise_common::connectors::{
    KnowledgeBase, KnowledgeSearch, PgVectorIndex, RapidApiVisa, TavilySearch, Unconfigured, VisaLookup,
    WebSearch,
};
use tripwise_common::embeddings::OpenAiEmbedder;
use tripwise_common::llm::OpenAiGateway;
use tripwise_common::{metrics, ChatMessage, LmGateway, Result};

use crate::workflow::Workflow;

/// Collaborators and the workflow descriptor, cheap to clone
#[derive(Clone)]
pub struct AppContext {
    pub llm: Arc<dyn LmGateway>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub web: Arc<dyn WebSearch>,
    pub visa: Arc<dyn VisaLookup>,
    pub workflow: Arc<Workflow>,
}

impl AppContext {
    pub fn new(
        llm: Arc<dyn LmGateway>,
        knowledge: Arc<dyn KnowledgeSearch>,
        web: Arc<dyn WebSearch>,
        visa: Arc<dyn VisaLookup>,
        workflow: Workflow,
    ) -> Self {
        Self {
            llm,
            knowledge,
            web,
            visa,
            workflow: Arc::new(workflow),
        }
    }

    /// Build production collaborators.
    ///
    /// The LM gateway is required. A connector without credentials, or a
    /// knowledge base that cannot be reached, is replaced by a stand-in that
    /// returns empty results.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let llm = Arc::new(OpenAiGateway::new(&config.llm)?);
        info!(model = %llm.model_name(), "LM gateway ready");

        let knowledge = Self::knowledge_from_config(config).await;

        let web: Arc<dyn WebSearch> = match TavilySearch::new(&config.web_search) {
            Ok(web) => Arc::new(web),
            Err(e) => {
                warn!(error = %e, "Web search disabled");
                Arc::new(Unconfigured::new("web"))
            }
        };

        let visa: Arc<dyn VisaLookup> = match RapidApiVisa::new(&config.visa) {
            Ok(visa) => Arc::new(visa),
            Err(e) => {
                warn!(error = %e, "Visa lookup disabled");
                Arc::new(Unconfigured::new("visa"))
            }
        };

        Ok(Self::new(llm, knowledge, web, visa, Workflow::from_config(&config.workflow)))
    }

    async fn knowledge_from_config(config: &AppConfig) -> Arc<dyn KnowledgeSearch> {
        let Some(api_key) = config.embedding_api_key() else {
            warn!("Knowledge base disabled: no embedding API key");
            return Arc::new(Unconfigured::new("knowledge_base"));
        };

        let embedder = match OpenAiEmbedder::new(&config.embedding, api_key.to_string()) {
            Ok(embedder) => Arc::new(embedder),
            Err(e) => {
                warn!(error = %e, "Knowledge base disabled");
                return Arc::new(Unconfigured::new("knowledge_base"));
            }
        };

        match PgVectorIndex::connect(&config.knowledge_base, embedder).await {
            Ok(index) => {
                info!(collection = %config.knowledge_base.collection, "Knowledge base ready");
                Arc::new(KnowledgeBase::new(
                    Arc::new(index),
                    config.workflow.knowledge_overfetch_factor,
                    config.workflow.knowledge_dedup_prefix_chars,
                ))
            }
            Err(e) => {
                warn!(error = %e, "Knowledge base disabled");
                Arc::new(Unconfigured::new("knowledge_base"))
            }
        }
    }
}

/// One-shot completion with latency and outcome recorded under `purpose`
pub(crate) async fn complete_timed(
    llm: &dyn LmGateway,
    purpose: &'static str,
    messages: &[ChatMessage],
) -> Result<String> {
    let start = Instant::now();
    let result = llm.complete(messages).await;
    metrics::record_llm(purpose, start.elapsed().as_secs_f64(), result.is_ok());
    if let Err(e) = &result {
        tracing::error!(purpose, error = %e, "LM call failed");
    }
    result
}
