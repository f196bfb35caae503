//! Service wiring and the merged HTTP router.

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::WorkshopConfig;
use crate::error::DatabaseError;
use crate::facilitator::{FacilitatorRouteState, FacilitatorService, ThemeSummarizer, facilitator_routes};
use crate::grouping::{CoCreationService, GroupRouteState, RationaleWriter, group_routes};
use crate::llm::LlmProvider;
use crate::onboarding::{ConversationEngine, EngineSettings, OnboardingRouteState, onboarding_routes};
use crate::session::{SessionRegistry, WorkshopSession};
use crate::store::Database;

/// Every long-lived service, sharing one store, one AI collaborator and one
/// session registry.
#[derive(Clone)]
pub struct AppServices {
    pub sessions: Arc<SessionRegistry>,
    pub engine: Arc<ConversationEngine>,
    pub cocreation: Arc<CoCreationService>,
    pub facilitator: Arc<FacilitatorService>,
}

impl AppServices {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        sessions: Arc<SessionRegistry>,
        config: &WorkshopConfig,
    ) -> Self {
        let engine = ConversationEngine::new(
            Arc::clone(&db),
            Arc::clone(&llm),
            Arc::clone(&sessions),
            EngineSettings::from(config),
        );
        let cocreation = CoCreationService::new(
            Arc::clone(&db),
            Arc::clone(&llm),
            Arc::clone(&sessions),
            config.llm_timeout,
        );
        let rationale = if config.ai_rationale {
            RationaleWriter::with_ai(Arc::clone(&llm), config.llm_timeout)
        } else {
            RationaleWriter::deterministic()
        };
        let facilitator = FacilitatorService::new(
            db,
            Arc::clone(&sessions),
            rationale,
            ThemeSummarizer::new(llm, config.llm_timeout),
            config.target_group_size,
        );

        Self {
            sessions,
            engine: Arc::new(engine),
            cocreation: Arc::new(cocreation),
            facilitator: Arc::new(facilitator),
        }
    }
}

/// The newest persisted session, or a freshly created and persisted one.
pub async fn restore_session(db: &dyn Database) -> Result<WorkshopSession, DatabaseError> {
    if let Some(session) = db.latest_session().await? {
        info!(session = %session.id, "Restored workshop session");
        return Ok(session);
    }
    let session = WorkshopSession::new();
    db.insert_session(&session).await?;
    info!(session = %session.id, "Created first workshop session");
    Ok(session)
}

/// Build the full router: participant, group and facilitator routes plus
/// `/health`, with permissive CORS for the dashboard.
pub fn app_router(services: &AppServices) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(onboarding_routes(OnboardingRouteState {
            engine: Arc::clone(&services.engine),
        }))
        .merge(group_routes(GroupRouteState {
            cocreation: Arc::clone(&services.cocreation),
        }))
        .merge(facilitator_routes(FacilitatorRouteState {
            facilitator: Arc::clone(&services.facilitator),
        }))
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "workshop-assist"
    }))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse};
    use crate::store::LibSqlBackend;

    struct NoLlm;

    #[async_trait]
    impl LlmProvider for NoLlm {
        fn model_name(&self) -> &str {
            "none"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::AuthFailed {
                provider: "none".into(),
            })
        }
    }

    async fn services() -> AppServices {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let session = restore_session(db.as_ref()).await.unwrap();
        AppServices::new(
            db,
            Arc::new(NoLlm),
            Arc::new(SessionRegistry::new(session)),
            &WorkshopConfig::default(),
        )
    }

    #[tokio::test]
    async fn restore_creates_then_reuses_session() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let first = restore_session(&db).await.unwrap();
        let second = restore_session(&db).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn router_mounts_every_area() {
        let services = services().await;
        let cases = [
            ("GET", "/health", StatusCode::OK),
            ("GET", "/api/participant/p1/boot", StatusCode::OK),
            ("GET", "/api/facilitator/participants", StatusCode::OK),
            ("GET", "/api/facilitator/current_session", StatusCode::OK),
            ("GET", "/api/groups", StatusCode::OK),
            ("GET", "/api/group/1/boot", StatusCode::NOT_FOUND),
            ("GET", "/export_json", StatusCode::OK),
            ("POST", "/api/participant/ghost/end", StatusCode::NOT_FOUND),
        ];

        for (method, uri, expected) in cases {
            let response = app_router(&services)
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn chat_failure_is_still_ok_with_notice() {
        let services = services().await;
        let response = app_router(&services)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/participant/p1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["notice"], "upstream_unavailable");
        assert_eq!(body["turn"], 1);
    }
}
