//! `ConversationEngine` drives each participant's onboarding dialogue to a
//! deterministic completion point and hands the transcript to the
//! `ProfileExtractor`.
//!
//! Every operation on a participant runs under that participant's lock, so
//! double-submits serialize while different participants proceed in
//! parallel. The turn counter only moves together with a committed
//! assistant reply: a failed AI call leaves the stored inbound turn in place
//! and the next message resumes from there.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::WorkshopConfig;
use crate::error::EngineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_within};
use crate::session::SessionRegistry;
use crate::store::{Database, UpsertOutcome};

use super::extractor::ProfileExtractor;
use super::locks::KeyedLocks;
use super::model::{
    ConversationTurn, Participant, ParticipantProfile, ParticipantSummary, TurnPhase, TurnRole,
};
use super::prompts::{
    CLOSED_REPLY, EMPTY_MESSAGE_REPLY, GREETING, PROFILE_PROCESSING_REPLY, PROFILE_READY_REPLY,
    SESSION_MISMATCH_REPLY, UPSTREAM_REPLY, group_phase_reply, onboarding_system_prompt,
    parse_turn_reply,
};
use super::state::ConversationState;

/// Tunables for the state machine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Hard turn ceiling K.
    pub turn_budget: u32,
    /// Earliest turn at which an AI completion signal is honoured.
    pub min_turns: u32,
    pub llm_timeout: Duration,
    /// Reject turns from participants bound to a superseded session.
    pub strict_isolation: bool,
}

impl From<&WorkshopConfig> for EngineSettings {
    fn from(config: &WorkshopConfig) -> Self {
        Self {
            turn_budget: config.turn_budget,
            min_turns: config.min_turns,
            llm_timeout: config.llm_timeout,
            strict_isolation: config.strict_isolation,
        }
    }
}

/// Out-of-band signal attached to a chat reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatNotice {
    UpstreamUnavailable,
    ProfileProcessing,
    SessionMismatch,
    EmptyMessage,
}

/// Participant-safe result of one chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConversationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<ChatNotice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ParticipantProfile>,
}

impl ChatResponse {
    fn for_participant(reply: impl Into<String>, participant: &Participant) -> Self {
        Self {
            reply: reply.into(),
            state: Some(participant.state),
            turn: Some(participant.turn),
            notice: None,
            profile: None,
        }
    }
}

/// One visible transcript line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptMessage {
    pub role: TurnRole,
    pub content: String,
}

impl From<ConversationTurn> for TranscriptMessage {
    fn from(turn: ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.content,
        }
    }
}

/// What a participant's page needs on (re)load.
#[derive(Debug, Clone, Serialize)]
pub struct BootResponse {
    pub participant: ParticipantSummary,
    pub session_id: String,
    /// True when the participant is bound to a superseded session.
    pub session_mismatch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ParticipantProfile>,
    pub messages: Vec<TranscriptMessage>,
}

pub struct ConversationEngine {
    db: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    sessions: Arc<SessionRegistry>,
    extractor: ProfileExtractor,
    locks: KeyedLocks,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        sessions: Arc<SessionRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let extractor = ProfileExtractor::new(Arc::clone(&llm), settings.llm_timeout);
        Self {
            db,
            llm,
            sessions,
            extractor,
            locks: KeyedLocks::new(),
            settings,
        }
    }

    /// Load or create a participant and return their visible state.
    ///
    /// The first call binds the participant to the current session and seeds
    /// the greeting; later calls never rebind or re-greet.
    pub async fn boot(&self, external_id: &str) -> Result<BootResponse, EngineError> {
        let session_id = self.sessions.current_id();
        let _guard = self.locks.acquire(external_id).await;

        let UpsertOutcome {
            mut participant,
            created,
        } = self.db.upsert_participant(external_id, &session_id).await?;
        if created {
            info!(participant = %external_id, session = %session_id, "Participant booted");
        }

        if participant.state == ConversationState::New {
            participant.state = ConversationState::Onboarding;
            let greeting = ConversationTurn::from_assistant(&participant, GREETING);
            self.db.commit_turns(&participant, &[greeting]).await?;
        }

        let profile = if participant.state.has_profile() {
            self.db.get_profile(external_id).await?
        } else {
            None
        };
        let messages = self
            .db
            .list_turns(external_id, Some(TurnPhase::Onboarding))
            .await?
            .into_iter()
            .map(TranscriptMessage::from)
            .collect();

        Ok(BootResponse {
            session_mismatch: participant.session_id != session_id,
            session_id: participant.session_id.clone(),
            participant: participant.summary(),
            profile,
            messages,
        })
    }

    /// Handle a chat message under the current session.
    pub async fn chat(&self, external_id: &str, text: &str) -> ChatResponse {
        let session_ctx = self.sessions.current_id();
        self.handle_message(external_id, &session_ctx, text).await
    }

    /// Advance a participant's conversation by one inbound message.
    ///
    /// Never fails: every error is translated into a participant-safe reply
    /// with a `notice`.
    pub async fn handle_message(
        &self,
        external_id: &str,
        session_ctx: &str,
        text: &str,
    ) -> ChatResponse {
        let text = text.trim();
        if text.is_empty() {
            return self.degrade(external_id, EngineError::EmptyMessage).await;
        }

        let _guard = self.locks.acquire(external_id).await;
        match self.try_handle_message(external_id, session_ctx, text).await {
            Ok(response) => response,
            Err(e) => self.degrade(external_id, e).await,
        }
    }

    /// Move a participant to `closed`. Idempotent.
    pub async fn end_conversation(
        &self,
        external_id: &str,
    ) -> Result<ParticipantSummary, EngineError> {
        let _guard = self.locks.acquire(external_id).await;
        let mut participant = self
            .db
            .get_participant(external_id)
            .await?
            .ok_or_else(|| EngineError::ParticipantNotFound(external_id.to_string()))?;

        if !participant.state.is_terminal() {
            let from = participant.state;
            participant.state = ConversationState::Closed;
            self.db.update_participant(&participant).await?;
            info!(participant = %external_id, from = %from, "Conversation closed");
        }
        Ok(participant.summary())
    }

    async fn try_handle_message(
        &self,
        external_id: &str,
        session_ctx: &str,
        text: &str,
    ) -> Result<ChatResponse, EngineError> {
        let UpsertOutcome {
            mut participant,
            created,
        } = self.db.upsert_participant(external_id, session_ctx).await?;
        if created {
            info!(participant = %external_id, session = %session_ctx, "Participant created on first message");
        }

        if participant.session_id != session_ctx {
            if self.settings.strict_isolation {
                return Err(EngineError::SessionMismatch {
                    participant: external_id.to_string(),
                    bound: participant.session_id.clone(),
                    current: session_ctx.to_string(),
                });
            }
            debug!(
                participant = %external_id,
                bound = %participant.session_id,
                current = %session_ctx,
                "Participant from a superseded session is still chatting"
            );
        }

        if participant.state == ConversationState::New {
            participant.state = ConversationState::Onboarding;
        }

        if !participant.state.is_onboarding() {
            // Only the turn is stored: group formation may advance the state
            // concurrently, and this copy must not write it back.
            let inbound = ConversationTurn::from_participant(&participant, text);
            self.db.append_turn(&inbound).await?;
            let latest = self.db.get_participant(external_id).await?.unwrap_or(participant);
            return self.settled_reply(&latest).await;
        }

        // A retried message after a failed AI call is already stored.
        let mut transcript = self
            .db
            .list_turns(external_id, Some(TurnPhase::Onboarding))
            .await?;
        let is_retry = transcript
            .last()
            .is_some_and(|last| last.role == TurnRole::Participant && last.content == text);
        if is_retry {
            debug!(participant = %external_id, "Inbound message already stored, resuming");
            self.db.update_participant(&participant).await?;
        } else {
            let inbound = ConversationTurn::from_participant(&participant, text);
            self.db
                .commit_turns(&participant, std::slice::from_ref(&inbound))
                .await?;
            transcript.push(inbound);
        }

        if participant.state == ConversationState::ProfilePending {
            self.finish_profile(participant, &transcript).await
        } else {
            self.onboarding_turn(participant, transcript).await
        }
    }

    /// Canned reply for a participant past onboarding; no AI call.
    async fn settled_reply(&self, participant: &Participant) -> Result<ChatResponse, EngineError> {
        let reply = match participant.state {
            ConversationState::Closed => CLOSED_REPLY.to_string(),
            ConversationState::GroupPhase => {
                match self.db.group_for_participant(&participant.external_id).await? {
                    Some(group) => group_phase_reply(group.number, &group.name),
                    None => PROFILE_READY_REPLY.to_string(),
                }
            }
            _ => PROFILE_READY_REPLY.to_string(),
        };
        Ok(ChatResponse::for_participant(reply, participant))
    }

    /// One AI exchange. Commits the reply and the state advance together.
    async fn onboarding_turn(
        &self,
        mut participant: Participant,
        mut transcript: Vec<ConversationTurn>,
    ) -> Result<ChatResponse, EngineError> {
        let turn = participant.turn;
        let conclude_now = turn >= self.settings.turn_budget;

        let mut messages = vec![ChatMessage::system(onboarding_system_prompt(
            &participant,
            turn,
            self.settings.turn_budget,
            conclude_now,
        ))];
        messages.extend(transcript.iter().map(to_chat_message));
        let request = CompletionRequest::new(messages)
            .with_max_tokens(700)
            .with_temperature(0.7)
            .with_json_response();

        let response = complete_within(self.llm.as_ref(), request, self.settings.llm_timeout).await?;
        let parsed = parse_turn_reply(&response.content);
        if !parsed.structured {
            debug!(participant = %participant.external_id, turn, "Unstructured onboarding reply");
        }
        participant.absorb_identity(parsed.name.as_deref(), parsed.creative_role.as_deref());

        let concluding =
            conclude_now || (parsed.ready_to_conclude && turn >= self.settings.min_turns);
        if concluding {
            participant.state = ConversationState::ProfilePending;
        } else {
            participant.turn += 1;
        }

        let assistant = ConversationTurn::from_assistant(&participant, parsed.reply.as_str());
        self.db
            .commit_turns(&participant, std::slice::from_ref(&assistant))
            .await?;

        if !concluding {
            debug!(participant = %participant.external_id, turn = participant.turn, "Onboarding turn committed");
            return Ok(ChatResponse::for_participant(parsed.reply, &participant));
        }

        info!(
            participant = %participant.external_id,
            turn,
            ai_signalled = parsed.ready_to_conclude,
            "Onboarding concluded, extracting profile"
        );
        transcript.push(assistant);
        let mut response = self.finish_profile(participant, &transcript).await?;
        response.reply = parsed.reply;
        Ok(response)
    }

    /// Extract and store the profile; on success the participant becomes
    /// `profile_ready`, otherwise stays `profile_pending`.
    async fn finish_profile(
        &self,
        mut participant: Participant,
        transcript: &[ConversationTurn],
    ) -> Result<ChatResponse, EngineError> {
        let extraction = self
            .extractor
            .extract(&participant.external_id, transcript)
            .await
            .map_err(|e| EngineError::ProfileExtractionFailed {
                participant: participant.external_id.clone(),
                reason: e.to_string(),
            })?;

        participant.absorb_identity(
            extraction.name.as_deref(),
            extraction.creative_role.as_deref(),
        );
        participant.state = ConversationState::ProfileReady;
        self.db
            .complete_profile(&participant, &extraction.profile)
            .await?;
        info!(
            participant = %participant.external_id,
            skill_level = %extraction.profile.skill_level,
            "Profile ready"
        );

        let mut response = ChatResponse::for_participant(
            extraction
                .profile
                .to_closing_message(participant.name.as_deref()),
            &participant,
        );
        response.profile = Some(extraction.profile);
        Ok(response)
    }

    /// Translate an engine error into a safe reply, reporting the
    /// participant's stored state when it can be read.
    async fn degrade(&self, external_id: &str, err: EngineError) -> ChatResponse {
        let (reply, notice) = match &err {
            EngineError::SessionMismatch { .. } => {
                info!(participant = %external_id, error = %err, "Turn rejected by strict isolation");
                (SESSION_MISMATCH_REPLY, ChatNotice::SessionMismatch)
            }
            EngineError::Upstream(_) => {
                warn!(participant = %external_id, error = %err, "AI collaborator failed");
                (UPSTREAM_REPLY, ChatNotice::UpstreamUnavailable)
            }
            EngineError::Database(_) | EngineError::ParticipantNotFound(_) => {
                error!(participant = %external_id, error = %err, "Persistence failed during chat");
                (UPSTREAM_REPLY, ChatNotice::UpstreamUnavailable)
            }
            EngineError::ProfileExtractionFailed { .. } => {
                warn!(participant = %external_id, error = %err, "Profile extraction failed");
                (PROFILE_PROCESSING_REPLY, ChatNotice::ProfileProcessing)
            }
            EngineError::EmptyMessage => (EMPTY_MESSAGE_REPLY, ChatNotice::EmptyMessage),
        };

        let participant = self.db.get_participant(external_id).await.ok().flatten();
        ChatResponse {
            reply: reply.to_string(),
            state: participant.as_ref().map(|p| p.state),
            turn: participant.as_ref().map(|p| p.turn),
            notice: Some(notice),
            profile: None,
        }
    }
}

fn to_chat_message(turn: &ConversationTurn) -> ChatMessage {
    match turn.role {
        TurnRole::Participant => ChatMessage::user(turn.content.as_str()),
        TurnRole::Assistant => ChatMessage::assistant(turn.content.as_str()),
    }
}
