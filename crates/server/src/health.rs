use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone, Copy)]
pub struct HealthState {
    model_configured: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_configured: bool,
    pub checked_at: String,
}

pub fn router(model_configured: bool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { model_configured })
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        model_configured: state.model_configured,
        checked_at: Utc::now().to_rfc3339(),
    })
}
