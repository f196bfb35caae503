//! `ProfileExtractor` turns a finished transcript into a validated profile.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::llm::json::extract_json_object;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_within};

use super::model::{ConversationTurn, ParticipantProfile, SkillLevel};
use super::prompts::{EXTRACTION_SYSTEM, extraction_prompt, render_transcript};

/// A validated extraction: the profile plus any identity the transcript
/// revealed.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub profile: ParticipantProfile,
    pub name: Option<String>,
    pub creative_role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractionWire {
    skill_level: Option<String>,
    goals: Option<String>,
    barriers: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    creative_role: Option<String>,
}

pub struct ProfileExtractor {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl ProfileExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Extract a profile, retrying once with a stricter instruction when the
    /// first answer fails validation. Upstream failures are not retried.
    pub async fn extract(
        &self,
        participant_id: &str,
        transcript: &[ConversationTurn],
    ) -> Result<Extraction, ExtractionError> {
        let conversation = render_transcript(transcript);

        match self.attempt(participant_id, &conversation, false).await {
            Err(ExtractionError::MalformedOutput(reason)) => {
                warn!(
                    participant = %participant_id,
                    reason = %reason,
                    "Profile extraction malformed, retrying with strict prompt"
                );
                self.attempt(participant_id, &conversation, true).await
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        participant_id: &str,
        conversation: &str,
        strict: bool,
    ) -> Result<Extraction, ExtractionError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(EXTRACTION_SYSTEM),
            ChatMessage::user(extraction_prompt(conversation, strict)),
        ])
        .with_max_tokens(600)
        .with_temperature(0.0)
        .with_json_response();

        let response = complete_within(self.llm.as_ref(), request, self.timeout).await?;
        debug!(participant = %participant_id, strict, "Extraction response received");
        parse_extraction(participant_id, &response.content)
    }
}

/// Validate raw extraction output against the profile schema.
pub fn parse_extraction(participant_id: &str, raw: &str) -> Result<Extraction, ExtractionError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| ExtractionError::MalformedOutput("no JSON object in output".to_string()))?;
    let wire: ExtractionWire = serde_json::from_str(json)
        .map_err(|e| ExtractionError::MalformedOutput(format!("invalid JSON: {e}")))?;

    let skill_level = wire
        .skill_level
        .as_deref()
        .ok_or_else(|| ExtractionError::MalformedOutput("missing skill_level".to_string()))?
        .parse::<SkillLevel>()
        .map_err(ExtractionError::MalformedOutput)?;

    Ok(Extraction {
        profile: ParticipantProfile {
            participant_id: participant_id.to_string(),
            skill_level,
            goals: required_text(wire.goals, "goals")?,
            barriers: required_text(wire.barriers, "barriers")?,
            summary: required_text(wire.summary, "summary")?,
            created_at: Utc::now(),
        },
        name: wire.name,
        creative_role: wire.creative_role,
    })
}

fn required_text(value: Option<String>, field: &str) -> Result<String, ExtractionError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ExtractionError::MalformedOutput(format!("missing or empty {field}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::onboarding::model::Participant;

    const VALID: &str = r#"{"skill_level":"intermediate","goals":"storyboards","barriers":"copyright worries","summary":"Filmmaker who wants faster pre-production.","name":"Ada","creative_role":"filmmaker"}"#;

    /// Replays scripted outputs and records the prompts it saw.
    struct ScriptedLlm {
        outputs: Mutex<Vec<Result<String, ()>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(outputs: Vec<Result<&str, ()>>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into_iter().rev().map(|o| o.map(str::to_string)).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            match self.outputs.lock().unwrap().pop() {
                Some(Ok(content)) => Ok(CompletionResponse {
                    content,
                    input_tokens: 0,
                    output_tokens: 0,
                    finish_reason: FinishReason::Stop,
                }),
                _ => Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "down".into(),
                }),
            }
        }
    }

    fn transcript() -> Vec<ConversationTurn> {
        let p = Participant::new("p1", "s1");
        vec![
            ConversationTurn::from_assistant(&p, "Your name?"),
            ConversationTurn::from_participant(&p, "Ada, I make films"),
        ]
    }

    fn extractor(llm: Arc<ScriptedLlm>) -> ProfileExtractor {
        ProfileExtractor::new(llm, Duration::from_secs(5))
    }

    #[test]
    fn parse_valid_output() {
        let extraction = parse_extraction("p1", VALID).unwrap();
        assert_eq!(extraction.profile.participant_id, "p1");
        assert_eq!(extraction.profile.skill_level, SkillLevel::Intermediate);
        assert_eq!(extraction.profile.goals, "storyboards");
        assert_eq!(extraction.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn parse_rejects_schema_violations() {
        let cases = [
            "no json at all",
            r#"{"skill_level":"guru","goals":"a","barriers":"b","summary":"c"}"#,
            r#"{"goals":"a","barriers":"b","summary":"c"}"#,
            r#"{"skill_level":"beginner","goals":"  ","barriers":"b","summary":"c"}"#,
            r#"{"skill_level":"beginner","goals":"a","barriers":"b"}"#,
            r#"{"skill_level": 3}"#,
        ];
        for raw in cases {
            assert!(
                matches!(parse_extraction("p1", raw), Err(ExtractionError::MalformedOutput(_))),
                "should reject: {raw}"
            );
        }
    }

    #[tokio::test]
    async fn extract_succeeds_first_time() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(VALID)]));
        let extraction = extractor(Arc::clone(&llm))
            .extract("p1", &transcript())
            .await
            .unwrap();
        assert_eq!(extraction.creative_role.as_deref(), Some("filmmaker"));
        assert_eq!(llm.calls(), 1);
        assert!(llm.prompts.lock().unwrap()[0].contains("Ada, I make films"));
    }

    #[tokio::test]
    async fn malformed_output_retries_once_with_strict_prompt() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("sure! here you go"), Ok(VALID)]));
        let extraction = extractor(Arc::clone(&llm)).extract("p1", &transcript()).await;
        assert!(extraction.is_ok());
        assert_eq!(llm.calls(), 2);
        assert!(llm.prompts.lock().unwrap()[1].contains("could not be parsed"));
    }

    #[tokio::test]
    async fn repeated_malformed_output_fails() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("nope"), Ok("{}"), Ok(VALID)]));
        let result = extractor(Arc::clone(&llm)).extract("p1", &transcript()).await;
        assert!(matches!(result, Err(ExtractionError::MalformedOutput(_))));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn upstream_errors_are_not_retried() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(()), Ok(VALID)]));
        let result = extractor(Arc::clone(&llm)).extract("p1", &transcript()).await;
        assert!(matches!(result, Err(ExtractionError::Upstream(_))));
        assert_eq!(llm.calls(), 1);
    }
}
