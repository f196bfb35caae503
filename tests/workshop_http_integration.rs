//! Integration tests for the workshop HTTP surface.
//!
//! Each test spins up the full Axum app on a random port backed by an
//! in-memory database and a stub AI, then drives it with reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use workshop_assist::app::{AppServices, app_router, restore_session};
use workshop_assist::config::WorkshopConfig;
use workshop_assist::error::LlmError;
use workshop_assist::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use workshop_assist::session::SessionRegistry;
use workshop_assist::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub AI that answers each kind of call with a well-formed reply.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt().unwrap_or_default();
        let content = if system.starts_with("You are a data extraction assistant") {
            json!({
                "skill_level": "intermediate",
                "goals": "faster storyboards",
                "barriers": "copyright worries",
                "summary": "Filmmaker exploring AI for pre-production.",
                "name": "Ada",
                "creative_role": "filmmaker"
            })
            .to_string()
        } else if system.starts_with("You turn multiple") {
            json!({"themes": [{"name": "Pre-production", "rationale": "shared", "representative_quotes": []}]})
                .to_string()
        } else if request.json_response {
            json!({"reply": "Tell me more.", "ready_to_conclude": false, "name": "Ada", "creative_role": "filmmaker"})
                .to_string()
        } else {
            "Let's sketch three ideas.".to_string()
        };

        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Start the app on a random port, return its base URL.
async fn start_server() -> String {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let session = restore_session(db.as_ref()).await.unwrap();
    let sessions = Arc::new(SessionRegistry::new(session));
    let config = WorkshopConfig {
        llm_timeout: Duration::from_secs(2),
        ..WorkshopConfig::default()
    };
    let services = AppServices::new(db, Arc::new(StubLlm), sessions, &config);
    let app = app_router(&services);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

async fn get_json(client: &reqwest::Client, url: String) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn onboard(client: &reqwest::Client, base: &str, id: &str) -> Value {
    let mut last = Value::Null;
    for i in 1..=6 {
        let (status, body) = post_json(
            client,
            format!("{base}/api/participant/{id}/chat"),
            json!({"message": format!("answer {i}")}),
        )
        .await;
        assert_eq!(status, 200);
        last = body;
    }
    last
}

#[tokio::test]
async fn health_reports_ok() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let (status, body) = get_json(&reqwest::Client::new(), format!("{base}/health")).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn boot_is_idempotent_over_http() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let (status, first) = get_json(&client, format!("{base}/api/participant/p1/boot")).await;
        assert_eq!(status, 200);
        assert_eq!(first["participant"]["state"], "onboarding");
        assert_eq!(first["messages"].as_array().unwrap().len(), 1);
        assert_eq!(first["session_mismatch"], false);

        let (_, second) = get_json(&client, format!("{base}/api/participant/p1/boot")).await;
        assert_eq!(first, second);

        let (_, listing) = get_json(&client, format!("{base}/api/facilitator/participants")).await;
        assert_eq!(listing["participants"].as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn onboarding_reaches_profile_ready_at_budget() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        let last = onboard(&client, &base, "p1").await;
        assert_eq!(last["state"], "profile_ready");
        assert_eq!(last["profile"]["skill_level"], "intermediate");

        let (_, boot) = get_json(&client, format!("{base}/api/participant/p1/boot")).await;
        assert_eq!(boot["participant"]["name"], "Ada");
        assert_eq!(boot["profile"]["goals"], "faster storyboards");

        let (_, empty) = post_json(
            &client,
            format!("{base}/api/participant/p1/chat"),
            json!({"message": "   "}),
        )
        .await;
        assert_eq!(empty["notice"], "empty_message");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rotation_hides_previous_participants() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        get_json(&client, format!("{base}/api/participant/old/boot")).await;
        let (status, rotated) =
            post_json(&client, format!("{base}/api/facilitator/new_session"), json!({})).await;
        assert_eq!(status, 200);

        let (_, current) = get_json(&client, format!("{base}/api/facilitator/current_session")).await;
        assert_eq!(current["session_id"], rotated["session_id"]);

        let (_, listing) = get_json(&client, format!("{base}/api/facilitator/participants")).await;
        assert_eq!(listing["session_id"], rotated["session_id"]);
        assert!(listing["participants"].as_array().unwrap().is_empty());

        let (_, export) = get_json(&client, format!("{base}/export_json")).await;
        assert_eq!(export["participants"].as_array().unwrap().len(), 1);
        assert_eq!(export["sessions"].as_array().unwrap().len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn groups_form_and_chat() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();

        for id in ["a", "b", "c"] {
            onboard(&client, &base, id).await;
        }

        let (status, _) = post_json(
            &client,
            format!("{base}/api/facilitator/form_groups"),
            json!({"target_group_size": 0}),
        )
        .await;
        assert_eq!(status, 400);

        // No body: the configured size (3) applies.
        let resp = client
            .post(format!("{base}/api/facilitator/form_groups"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let formed: Value = resp.json().await.unwrap();
        let groups = formed["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["url"], "/group1");
        assert_eq!(groups[0]["members"].as_array().unwrap().len(), 3);

        let (_, listed) = get_json(&client, format!("{base}/api/groups")).await;
        assert_eq!(listed["groups"], formed["groups"]);

        let (_, redirect) = post_json(
            &client,
            format!("{base}/api/participant/a/chat"),
            json!({"message": "what now?"}),
        )
        .await;
        assert_eq!(redirect["state"], "group_phase");

        let (status, boot) = get_json(&client, format!("{base}/api/group/1/boot")).await;
        assert_eq!(status, 200);
        assert_eq!(boot["messages"].as_array().unwrap().len(), 1);

        let (status, reply) = post_json(
            &client,
            format!("{base}/api/group/1/chat"),
            json!({"message": "A short film!"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(reply["reply"], "Let's sketch three ideas.");

        let (status, _) = get_json(&client, format!("{base}/api/group/9/boot")).await;
        assert_eq!(status, 404);

        let (_, themes) =
            post_json(&client, format!("{base}/api/facilitator/themes"), json!({})).await;
        assert_eq!(themes["themes"][0]["name"], "Pre-production");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ending_unknown_participant_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let (status, _) =
            post_json(&client, format!("{base}/api/participant/ghost/end"), json!({})).await;
        assert_eq!(status, 404);

        get_json(&client, format!("{base}/api/participant/p1/boot")).await;
        let (status, ended) =
            post_json(&client, format!("{base}/api/participant/p1/end"), json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(ended["state"], "closed");
    })
    .await
    .expect("test timed out");
}
