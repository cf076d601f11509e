//! Interpret endpoint: signature verification over the raw body bytes,
//! then delegation to the interpretation service.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::warn;

use hearth_core::interpret::InterpretRequest;
use hearth_core::signing::{verify_hmac_hex, SIGNATURE_HEADER};
use hearth_interpret::InterpretationService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InterpretationService>,
    pub shared_secret: Option<SecretString>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/interpret", post(interpret)).with_state(state)
}

async fn interpret(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.shared_secret {
        let provided = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
        let Some(provided) = provided else {
            warn!(event_name = "interpret.signature_missing");
            return unauthorized("Missing signature");
        };
        if !verify_hmac_hex(secret.expose_secret().as_bytes(), &body, provided) {
            warn!(event_name = "interpret.signature_invalid");
            return unauthorized("Invalid signature");
        }
    }

    let request = match serde_json::from_slice::<InterpretRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            warn!(event_name = "interpret.bad_request", error = %error);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "Invalid request body"})),
            )
                .into_response();
        }
    };

    let response = state
        .service
        .interpret(&request.utterance, &request.catalog, &request.intents)
        .await;
    (StatusCode::OK, Json(response)).into_response()
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail}))).into_response()
}
