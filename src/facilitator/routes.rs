//! REST endpoints for the facilitator dashboard, the group sharing screen
//! and the research export.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, warn};

use super::service::FacilitatorService;
use crate::error::FacilitatorError;

#[derive(Clone)]
pub struct FacilitatorRouteState {
    pub facilitator: Arc<FacilitatorService>,
}

#[derive(Debug, Default, Deserialize)]
struct FormGroupsBody {
    target_group_size: Option<i64>,
}

/// GET /api/facilitator/participants
async fn participants(State(state): State<FacilitatorRouteState>) -> Response {
    match state.facilitator.list_participants().await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => facilitator_error("participants", e),
    }
}

/// POST /api/facilitator/new_session
async fn new_session(State(state): State<FacilitatorRouteState>) -> Response {
    match state.facilitator.rotate_session().await {
        Ok(session) => Json(session).into_response(),
        Err(e) => facilitator_error("new_session", e),
    }
}

/// GET /api/facilitator/current_session
async fn current_session(State(state): State<FacilitatorRouteState>) -> impl IntoResponse {
    Json(state.facilitator.current_session())
}

/// POST /api/facilitator/form_groups
///
/// The body is optional; without `target_group_size` the configured size
/// is used.
async fn form_groups(State(state): State<FacilitatorRouteState>, body: Bytes) -> Response {
    let body: FormGroupsBody = if body.iter().all(u8::is_ascii_whitespace) {
        FormGroupsBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": format!("invalid body: {e}")})),
                )
                    .into_response();
            }
        }
    };

    match state.facilitator.form_groups(body.target_group_size).await {
        Ok(groups) => Json(serde_json::json!({ "groups": groups })).into_response(),
        Err(e) => facilitator_error("form_groups", e),
    }
}

/// POST /api/facilitator/themes
async fn themes(State(state): State<FacilitatorRouteState>) -> Response {
    match state.facilitator.themes().await {
        Ok(themes) => Json(serde_json::json!({ "themes": themes })).into_response(),
        Err(e) => facilitator_error("themes", e),
    }
}

/// GET /api/groups
async fn groups(State(state): State<FacilitatorRouteState>) -> Response {
    match state.facilitator.list_groups().await {
        Ok(groups) => Json(serde_json::json!({ "groups": groups })).into_response(),
        Err(e) => facilitator_error("groups", e),
    }
}

/// GET /export_json
async fn export_json(State(state): State<FacilitatorRouteState>) -> Response {
    match state.facilitator.export().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => facilitator_error("export_json", e),
    }
}

fn facilitator_error(action: &str, e: FacilitatorError) -> Response {
    let status = match e {
        FacilitatorError::Grouping(_) => {
            warn!(action, error = %e, "Facilitator request rejected");
            StatusCode::BAD_REQUEST
        }
        FacilitatorError::Database(_) => {
            error!(action, error = %e, "Facilitator request failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

pub fn facilitator_routes(state: FacilitatorRouteState) -> Router {
    Router::new()
        .route("/api/facilitator/participants", get(participants))
        .route("/api/facilitator/new_session", post(new_session))
        .route("/api/facilitator/current_session", get(current_session))
        .route("/api/facilitator/form_groups", post(form_groups))
        .route("/api/facilitator/themes", post(themes))
        .route("/api/groups", get(groups))
        .route("/export_json", get(export_json))
        .with_state(state)
}
