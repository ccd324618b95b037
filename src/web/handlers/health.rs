//! Health and cache statistics handlers

use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use crate::services::OrchestratorStats;
use crate::web::{AppState, responses::ok};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: i64,
    pub transformer_available: bool,
}

/// Liveness check
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.start_time;
    ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
        transformer_available: state.orchestrator.transformer_available(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    pub tenancy_enabled: bool,
    #[serde(flatten)]
    pub stats: OrchestratorStats,
}

/// Memory tier and in-flight statistics
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    ok(CacheStatsResponse {
        tenancy_enabled: state.config.tenancy.enabled,
        stats: state.orchestrator.stats().await,
    })
}
