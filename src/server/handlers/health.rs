use crate::server::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub profiles: usize,
    pub cached_tokens: usize,
}

/// Liveness plus a few numbers worth eyeballing.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
        profiles: state.profiles.len(),
        cached_tokens: state.tokens.cached_count(),
    })
}
