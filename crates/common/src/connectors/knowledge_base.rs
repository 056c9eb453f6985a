//! Knowledge base search over a pgvector collection
//!
//! Over-fetches from the index, drops low-relevance documents and
//! collapses near-duplicate chunks by content prefix.

use super::{KnowledgeHit, KnowledgeSearch};
use crate::config::KnowledgeBaseConfig;
use crate::embeddings::{to_vector_literal, Embedder};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Raw similarity hit before filtering
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub content: String,
    pub metadata: serde_json::Value,
    /// Relevance in [0, 1], higher is closer
    pub score: f32,
}

/// Similarity search primitive; may fail
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>>;
}

/// Knowledge base connector wrapping a vector index
pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    overfetch_factor: usize,
    dedup_prefix_chars: usize,
}

impl KnowledgeBase {
    pub fn new(index: Arc<dyn VectorIndex>, overfetch_factor: usize, dedup_prefix_chars: usize) -> Self {
        Self {
            index,
            overfetch_factor: overfetch_factor.max(1),
            dedup_prefix_chars,
        }
    }

    /// Threshold, dedup and truncate raw hits in rank order
    fn select(&self, documents: Vec<ScoredDocument>, k: usize, score_threshold: f32) -> Vec<KnowledgeHit> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut hits = Vec::with_capacity(k);

        for doc in documents {
            if hits.len() >= k {
                break;
            }
            if doc.score < score_threshold {
                continue;
            }

            let key: String = doc.content.chars().take(self.dedup_prefix_chars).collect();
            if !seen.insert(key) {
                continue;
            }

            let source = doc
                .metadata
                .get("source")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();

            hits.push(KnowledgeHit {
                content: doc.content,
                source,
                score: doc.score,
                metadata: doc.metadata,
            });
        }

        hits
    }
}

#[async_trait]
impl KnowledgeSearch for KnowledgeBase {
    async fn search(&self, query: &str, k: usize, score_threshold: f32) -> Vec<KnowledgeHit> {
        let start = Instant::now();
        let limit = k * self.overfetch_factor;

        match self.index.similarity_search(query, limit).await {
            Ok(documents) => {
                let fetched = documents.len();
                let hits = self.select(documents, k, score_threshold);
                debug!(fetched, kept = hits.len(), "Knowledge base search");
                let outcome = if hits.is_empty() { "empty" } else { "hit" };
                metrics::record_connector("knowledge_base", outcome, start.elapsed().as_secs_f64());
                hits
            }
            Err(e) => {
                warn!(error = %e, "Knowledge base search failed");
                metrics::record_connector("knowledge_base", "failed", start.elapsed().as_secs_f64());
                Vec::new()
            }
        }
    }
}

/// Vector index backed by a pgvector collection
pub struct PgVectorIndex {
    db: DatabaseConnection,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl PgVectorIndex {
    /// Connect to the database holding the collection
    pub async fn connect(config: &KnowledgeBaseConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "knowledge_base.database_url is required".to_string(),
        })?;

        info!(collection = %config.collection, "Connecting to knowledge base...");

        let mut opts = ConnectOptions::new(url);
        opts
            .max_connections(config.max_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let db = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to knowledge base: {}", e),
            })?;

        Ok(Self {
            db,
            embedder,
            collection: config.collection.clone(),
        })
    }

}

#[derive(Debug, FromQueryResult)]
struct DocumentRow {
    content: Option<String>,
    metadata: Option<serde_json::Value>,
    score: f64,
}

impl From<DocumentRow> for ScoredDocument {
    fn from(row: DocumentRow) -> Self {
        Self {
            content: row.content.unwrap_or_default(),
            metadata: row.metadata.unwrap_or(serde_json::Value::Null),
            score: row.score as f32,
        }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn similarity_search(&self, query: &str, limit: usize) -> Result<Vec<ScoredDocument>> {
        let embedding = self.embedder.embed(query).await?;
        let embedding = to_vector_literal(&embedding);

        let sql = format!(
            r#"
            SELECT
                e.document AS content,
                e.cmetadata AS metadata,
                1 - (e.embedding <=> '{embedding}'::vector) AS score
            FROM langchain_pg_embedding e
            INNER JOIN langchain_pg_collection c ON e.collection_id = c.uuid
            WHERE c.name = $1
            ORDER BY e.embedding <=> '{embedding}'::vector
            LIMIT $2
            "#,
            embedding = embedding
        );

        let rows = DocumentRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![self.collection.clone().into(), (limit as i64).into()],
        ))
        .all(&self.db)
        .await?;

        Ok(rows.into_iter().map(ScoredDocument::from).collect())
    }
}
