//! `Database` trait — the narrow persistence contract the workshop core uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::grouping::model::{Group, GroupTurn};
use crate::onboarding::model::{ConversationTurn, Participant, ParticipantProfile, TurnPhase};
use crate::session::WorkshopSession;

/// Result of an upsert-if-absent on a participant.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The stored row (existing or newly inserted).
    pub participant: Participant,
    /// Whether this call inserted it.
    pub created: bool,
}

/// Full research dump across every session.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSnapshot {
    pub exported_at: DateTime<Utc>,
    pub sessions: Vec<WorkshopSession>,
    pub participants: Vec<Participant>,
    pub turns: Vec<ConversationTurn>,
    pub profiles: Vec<ParticipantProfile>,
    pub groups: Vec<Group>,
    pub group_turns: Vec<GroupTurn>,
}

/// Backend-agnostic persistence for sessions, participants, transcripts,
/// profiles and groups.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Record a new workshop session.
    async fn insert_session(&self, session: &WorkshopSession) -> Result<(), DatabaseError>;

    /// The most recently created session, if any.
    async fn latest_session(&self) -> Result<Option<WorkshopSession>, DatabaseError>;

    // ── Participants ────────────────────────────────────────────────

    /// Create the participant bound to `session_id` unless it already exists.
    ///
    /// Atomic: concurrent calls with the same id yield exactly one row, and an
    /// existing row's session binding is never rewritten.
    async fn upsert_participant(
        &self,
        external_id: &str,
        session_id: &str,
    ) -> Result<UpsertOutcome, DatabaseError>;

    async fn get_participant(&self, external_id: &str)
    -> Result<Option<Participant>, DatabaseError>;

    /// Persist name, role, state and turn. The session binding is immutable.
    async fn update_participant(&self, participant: &Participant) -> Result<(), DatabaseError>;

    /// Participants bound to `session_id`, in first-contact order.
    async fn list_participants(&self, session_id: &str) -> Result<Vec<Participant>, DatabaseError>;

    // ── Conversation turns ──────────────────────────────────────────

    /// Append a single turn.
    async fn append_turn(&self, turn: &ConversationTurn) -> Result<(), DatabaseError>;

    /// A participant's transcript in append order, optionally by phase.
    async fn list_turns(
        &self,
        participant_id: &str,
        phase: Option<TurnPhase>,
    ) -> Result<Vec<ConversationTurn>, DatabaseError>;

    /// Append `turns` and persist `participant` in one transaction.
    async fn commit_turns(
        &self,
        participant: &Participant,
        turns: &[ConversationTurn],
    ) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Create or overwrite a participant's profile.
    async fn save_profile(&self, profile: &ParticipantProfile) -> Result<(), DatabaseError>;

    async fn get_profile(
        &self,
        participant_id: &str,
    ) -> Result<Option<ParticipantProfile>, DatabaseError>;

    /// Save the profile and persist `participant` (normally now
    /// `profile_ready`) in one transaction.
    async fn complete_profile(
        &self,
        participant: &Participant,
        profile: &ParticipantProfile,
    ) -> Result<(), DatabaseError>;

    /// Participants of `session_id` in `profile_ready` or `group_phase`,
    /// with their profiles, in first-contact order.
    async fn list_profiled_participants(
        &self,
        session_id: &str,
    ) -> Result<Vec<(Participant, ParticipantProfile)>, DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Supersede the session's active groups, insert `groups` and move their
    /// members to `group_phase`, atomically.
    ///
    /// Members whose stored state is no longer `profile_ready` or
    /// `group_phase` are left out. Returns the groups as stored.
    async fn replace_groups(
        &self,
        session_id: &str,
        groups: &[Group],
    ) -> Result<Vec<Group>, DatabaseError>;

    /// Active groups of a session, ordered by number.
    async fn list_groups(&self, session_id: &str) -> Result<Vec<Group>, DatabaseError>;

    async fn get_group(&self, session_id: &str, number: u32)
    -> Result<Option<Group>, DatabaseError>;

    /// The active group a participant belongs to within their own session.
    async fn group_for_participant(
        &self,
        participant_id: &str,
    ) -> Result<Option<Group>, DatabaseError>;

    async fn append_group_turn(&self, turn: &GroupTurn) -> Result<(), DatabaseError>;

    async fn list_group_turns(&self, group_id: Uuid) -> Result<Vec<GroupTurn>, DatabaseError>;

    // ── Export ──────────────────────────────────────────────────────

    /// Everything, across all sessions, for offline research.
    async fn export_snapshot(&self) -> Result<ExportSnapshot, DatabaseError>;
}
