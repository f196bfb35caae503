//! REST endpoints for the participant chat.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use super::engine::ConversationEngine;
use crate::error::EngineError;

/// Shared state for participant routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub engine: Arc<ConversationEngine>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    message: String,
}

/// GET /api/participant/{id}/boot
///
/// Loads or creates the participant and returns their transcript.
async fn boot(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
) -> Response {
    match state.engine.boot(&id).await {
        Ok(boot) => Json(boot).into_response(),
        Err(e) => engine_error(&id, e),
    }
}

/// POST /api/participant/{id}/chat
///
/// Always 200: failures come back as a safe reply with a `notice`.
async fn chat(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> impl IntoResponse {
    Json(state.engine.chat(&id, &body.message).await)
}

/// POST /api/participant/{id}/end
async fn end(State(state): State<OnboardingRouteState>, Path(id): Path<String>) -> Response {
    match state.engine.end_conversation(&id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => engine_error(&id, e),
    }
}

fn engine_error(id: &str, e: EngineError) -> Response {
    let status = match e {
        EngineError::ParticipantNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::EmptyMessage => StatusCode::BAD_REQUEST,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    warn!(participant = %id, error = %e, status = status.as_u16(), "Participant request failed");
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

/// Build the participant REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/participant/{id}/boot", get(boot))
        .route("/api/participant/{id}/chat", post(chat))
        .route("/api/participant/{id}/end", post(end))
        .with_state(state)
}
