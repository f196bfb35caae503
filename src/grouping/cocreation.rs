//! Group co-creation chat: an AI chair guiding a fast concepting session
//! for one formed group.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::model::{Group, GroupTurn};
use crate::error::CoCreationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_within};
use crate::onboarding::engine::{ChatNotice, TranscriptMessage};
use crate::onboarding::locks::KeyedLocks;
use crate::onboarding::model::TurnRole;
use crate::onboarding::prompts::UPSTREAM_REPLY;
use crate::session::SessionRegistry;
use crate::store::Database;

const GROUP_CHAIR: &str = "\
You are a creative sparring partner guiding a fast concepting session (fail fast, lean prototyping).
Be encouraging and playful, keep energy high and momentum fast.
Use short, motivating messages, propose concrete drafts, and celebrate progress.

Ask only one playful question at a time, and always build on their answers. Move the group through:
- Ideation: spark many raw, fun ideas
- Choosing: help them quickly pick one
- Refining: add purpose, audience, key features
- Finalising: shape it into a clear, exciting concept";

const OPENING_QUESTION: &str = "Which concept do you want to create now \
(e.g., short film script, song lyrics, software idea, event concept, game plot)?";

/// System prompt for a group, carrying its rationale when there is one.
pub fn group_system_prompt(rationale: &str) -> String {
    let rationale = rationale.trim();
    if rationale.is_empty() {
        return GROUP_CHAIR.to_string();
    }
    format!(
        "{GROUP_CHAIR}\n\nIMPORTANT CONTEXT: This group was formed because: {rationale}\n\
         Leverage these synergies and guide the team to build on their complementary strengths \
         and shared interests."
    )
}

/// First assistant message of a group chat.
pub fn welcome_message(rationale: &str) -> String {
    let rationale = rationale.trim();
    if rationale.is_empty() {
        return OPENING_QUESTION.to_string();
    }
    format!(
        "Welcome to your co-creation group! Based on your profiles, you were grouped together \
         because: {rationale}\n\nThis alignment gives you unique synergy opportunities. Let's \
         leverage these connections as we work together.\n\n{OPENING_QUESTION}"
    )
}

/// Group page state on (re)load.
#[derive(Debug, Clone, Serialize)]
pub struct GroupBoot {
    pub number: u32,
    pub name: String,
    pub rationale: String,
    /// Member display names in group order.
    pub members: Vec<String>,
    pub messages: Vec<TranscriptMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupChatResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<ChatNotice>,
}

pub struct CoCreationService {
    db: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    sessions: Arc<SessionRegistry>,
    locks: KeyedLocks,
    timeout: Duration,
}

impl CoCreationService {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        sessions: Arc<SessionRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            llm,
            sessions,
            locks: KeyedLocks::new(),
            timeout,
        }
    }

    /// Load a current-session group's chat, seeding the welcome message on
    /// first boot.
    pub async fn group_boot(&self, number: u32) -> Result<GroupBoot, CoCreationError> {
        let group = self.find_group(number).await?;
        let _guard = self.locks.acquire(&group.id.to_string()).await;

        let mut turns = self.db.list_group_turns(group.id).await?;
        if turns.is_empty() {
            let welcome = GroupTurn::new(group.id, TurnRole::Assistant, welcome_message(&group.rationale));
            self.db.append_group_turn(&welcome).await?;
            info!(group = number, session = %group.session_id, "Group chat opened");
            turns.push(welcome);
        }

        let mut members = Vec::with_capacity(group.members.len());
        for id in &group.members {
            let name = self
                .db
                .get_participant(id)
                .await?
                .and_then(|p| p.name)
                .unwrap_or_else(|| id.clone());
            members.push(name);
        }

        Ok(GroupBoot {
            number: group.number,
            name: group.name,
            rationale: group.rationale,
            members,
            messages: turns.into_iter().map(group_transcript_message).collect(),
        })
    }

    /// Append a group message and return the chair's reply.
    ///
    /// AI failures become a retryable reply with a notice; the inbound
    /// message stays stored and an identical retry is not duplicated.
    pub async fn group_chat(
        &self,
        number: u32,
        text: &str,
    ) -> Result<GroupChatResponse, CoCreationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoCreationError::EmptyMessage);
        }
        let group = self.find_group(number).await?;
        let _guard = self.locks.acquire(&group.id.to_string()).await;

        match self.exchange(&group, text).await {
            Ok(reply) => Ok(GroupChatResponse {
                reply,
                notice: None,
            }),
            Err(CoCreationError::Upstream(e)) => {
                warn!(group = number, error = %e, "Group chair unavailable");
                Ok(GroupChatResponse {
                    reply: UPSTREAM_REPLY.to_string(),
                    notice: Some(ChatNotice::UpstreamUnavailable),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange(&self, group: &Group, text: &str) -> Result<String, CoCreationError> {
        let mut turns = self.db.list_group_turns(group.id).await?;
        let is_retry = turns
            .last()
            .is_some_and(|last| last.role == TurnRole::Participant && last.content == text);
        if !is_retry {
            let inbound = GroupTurn::new(group.id, TurnRole::Participant, text);
            self.db.append_group_turn(&inbound).await?;
            turns.push(inbound);
        }

        let mut messages = vec![ChatMessage::system(group_system_prompt(&group.rationale))];
        messages.extend(turns.iter().map(|t| match t.role {
            TurnRole::Participant => ChatMessage::user(t.content.as_str()),
            TurnRole::Assistant => ChatMessage::assistant(t.content.as_str()),
        }));
        let request = CompletionRequest::new(messages)
            .with_max_tokens(900)
            .with_temperature(0.5);

        let response = complete_within(self.llm.as_ref(), request, self.timeout).await?;
        let reply = response.content.trim().to_string();
        let assistant = GroupTurn::new(group.id, TurnRole::Assistant, reply.as_str());
        self.db.append_group_turn(&assistant).await?;
        debug!(group = group.number, turns = turns.len() + 1, "Group turn committed");
        Ok(reply)
    }

    async fn find_group(&self, number: u32) -> Result<Group, CoCreationError> {
        let session_id = self.sessions.current_id();
        self.db
            .get_group(&session_id, number)
            .await?
            .ok_or(CoCreationError::GroupNotFound(number))
    }
}

fn group_transcript_message(turn: GroupTurn) -> TranscriptMessage {
    TranscriptMessage {
        role: turn.role,
        content: turn.content,
    }
}
