//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub model: String,
    pub active_cycles: usize,
    pub conversations: usize,
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: tripwise_common::VERSION.to_string(),
    })
}

/// Readiness check - reports the configured model and current load
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready".to_string(),
        model: state.engine.context().llm.model_name().to_string(),
        active_cycles: state.engine.cycles().len(),
        conversations: state.store.len().await,
    })
}
