//! REST endpoints for group co-creation chats.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use super::cocreation::CoCreationService;
use crate::error::CoCreationError;

#[derive(Clone)]
pub struct GroupRouteState {
    pub cocreation: Arc<CoCreationService>,
}

#[derive(Debug, Deserialize)]
struct GroupChatBody {
    #[serde(default)]
    message: String,
}

/// GET /api/group/{n}/boot
async fn group_boot(State(state): State<GroupRouteState>, Path(number): Path<u32>) -> Response {
    match state.cocreation.group_boot(number).await {
        Ok(boot) => Json(boot).into_response(),
        Err(e) => cocreation_error(number, e),
    }
}

/// POST /api/group/{n}/chat
async fn group_chat(
    State(state): State<GroupRouteState>,
    Path(number): Path<u32>,
    Json(body): Json<GroupChatBody>,
) -> Response {
    match state.cocreation.group_chat(number, &body.message).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => cocreation_error(number, e),
    }
}

fn cocreation_error(number: u32, e: CoCreationError) -> Response {
    let status = match e {
        CoCreationError::GroupNotFound(_) => StatusCode::NOT_FOUND,
        CoCreationError::EmptyMessage => StatusCode::BAD_REQUEST,
        CoCreationError::Upstream(_) | CoCreationError::Database(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    if status == StatusCode::SERVICE_UNAVAILABLE {
        warn!(group = number, error = %e, "Group request failed");
    }
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

pub fn group_routes(state: GroupRouteState) -> Router {
    Router::new()
        .route("/api/group/{number}/boot", get(group_boot))
        .route("/api/group/{number}/chat", post(group_chat))
        .with_state(state)
}
