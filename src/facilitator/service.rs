//! Facilitator actions: live participant view, session rotation, group
//! formation, themes and research export.
//!
//! Every read is scoped by the session identifier captured once at the
//! start of the call, so a listing never mixes two sessions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use super::themes::{Theme, ThemeSummarizer};
use crate::error::FacilitatorError;
use crate::grouping::model::{Group, GroupCandidate, GroupListing};
use crate::grouping::partition::form_groups;
use crate::grouping::rationale::{RationaleWriter, group_name, rationale_bullets};
use crate::onboarding::model::ParticipantSummary;
use crate::session::{SessionRegistry, WorkshopSession};
use crate::store::{Database, ExportSnapshot};

/// The current session as reported to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkshopSession> for SessionInfo {
    fn from(session: &WorkshopSession) -> Self {
        Self {
            session_id: session.id.clone(),
            created_at: session.created_at,
        }
    }
}

/// Participants of one session.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantListing {
    pub session_id: String,
    pub participants: Vec<ParticipantSummary>,
}

pub struct FacilitatorService {
    db: Arc<dyn Database>,
    sessions: Arc<SessionRegistry>,
    rationale: RationaleWriter,
    themes: ThemeSummarizer,
    default_group_size: u32,
    /// Serializes group formation so two requests cannot interleave.
    formation: Mutex<()>,
    /// Keeps the persisted order of sessions equal to the install order.
    rotation: Mutex<()>,
}

impl FacilitatorService {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: Arc<SessionRegistry>,
        rationale: RationaleWriter,
        themes: ThemeSummarizer,
        default_group_size: u32,
    ) -> Self {
        Self {
            db,
            sessions,
            rationale,
            themes,
            default_group_size,
            formation: Mutex::new(()),
            rotation: Mutex::new(()),
        }
    }

    pub fn current_session(&self) -> SessionInfo {
        SessionInfo::from(self.sessions.current().as_ref())
    }

    /// Participants bound to the current session, in first-contact order.
    pub async fn list_participants(&self) -> Result<ParticipantListing, FacilitatorError> {
        let session_id = self.sessions.current_id();
        let participants = self
            .db
            .list_participants(&session_id)
            .await?
            .iter()
            .map(|p| p.summary())
            .collect();
        Ok(ParticipantListing {
            session_id,
            participants,
        })
    }

    /// Persist a fresh session and make it current. Existing rows are left
    /// untouched.
    pub async fn rotate_session(&self) -> Result<SessionInfo, FacilitatorError> {
        let _rotation = self.rotation.lock().await;
        let session = WorkshopSession::new();
        self.db.insert_session(&session).await?;
        let installed = self.sessions.install(session);
        Ok(SessionInfo::from(installed.as_ref()))
    }

    /// Partition the current session's profiled participants and replace
    /// the session's group set.
    ///
    /// `target_group_size` defaults to the configured size.
    pub async fn form_groups(
        &self,
        target_group_size: Option<i64>,
    ) -> Result<Vec<GroupListing>, FacilitatorError> {
        let size = target_group_size.unwrap_or(i64::from(self.default_group_size));
        let _formation = self.formation.lock().await;
        let session_id = self.sessions.current_id();

        let profiled = self.db.list_profiled_participants(&session_id).await?;
        let candidates: Vec<GroupCandidate> = profiled
            .iter()
            .map(|(participant, profile)| GroupCandidate::from_profile(participant, profile))
            .collect();
        let plans = form_groups(&candidates, size)?;

        let sections: HashMap<&str, String> = profiled
            .iter()
            .map(|(participant, profile)| {
                (
                    participant.external_id.as_str(),
                    profile.to_prompt_section(&participant.summary()),
                )
            })
            .collect();

        let rationales = join_all(plans.iter().map(|plan| {
            let member_sections: Vec<String> = plan
                .members
                .iter()
                .filter_map(|m| sections.get(m.participant_id.as_str()).cloned())
                .collect();
            async move { self.rationale.write(plan, &member_sections).await }
        }))
        .await;
        let groups: Vec<Group> = plans
            .iter()
            .zip(rationales)
            .map(|(plan, rationale)| {
                Group::new(&session_id, plan, group_name(plan.number), rationale)
            })
            .collect();

        let groups = self.db.replace_groups(&session_id, &groups).await?;
        info!(
            session = %session_id,
            participants = candidates.len(),
            groups = groups.len(),
            target_group_size = size,
            "Groups formed"
        );

        let names: HashMap<&str, &str> = plans
            .iter()
            .flat_map(|p| p.members.iter())
            .map(|m| (m.participant_id.as_str(), m.display_name()))
            .collect();
        Ok(groups
            .iter()
            .map(|g| listing(g, |id| names.get(id).map(|n| n.to_string())))
            .collect())
    }

    /// Active groups of the current session for the sharing screen.
    pub async fn list_groups(&self) -> Result<Vec<GroupListing>, FacilitatorError> {
        let session_id = self.sessions.current_id();
        let groups = self.db.list_groups(&session_id).await?;
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let names: HashMap<String, String> = self
            .db
            .list_participants(&session_id)
            .await?
            .into_iter()
            .filter_map(|p| p.name.map(|name| (p.external_id, name)))
            .collect();
        Ok(groups
            .iter()
            .map(|g| listing(g, |id| names.get(id).cloned()))
            .collect())
    }

    /// Shared themes across the current session's profile summaries.
    pub async fn themes(&self) -> Result<Vec<Theme>, FacilitatorError> {
        let session_id = self.sessions.current_id();
        let summaries: Vec<String> = self
            .db
            .list_profiled_participants(&session_id)
            .await?
            .into_iter()
            .map(|(_, profile)| profile.summary)
            .collect();
        Ok(self.themes.summarize(&summaries).await)
    }

    /// Everything ever recorded, across sessions.
    pub async fn export(&self) -> Result<ExportSnapshot, FacilitatorError> {
        Ok(self.db.export_snapshot().await?)
    }
}

fn listing(group: &Group, name_of: impl Fn(&str) -> Option<String>) -> GroupListing {
    GroupListing {
        number: group.number,
        name: group.name.clone(),
        members: group
            .members
            .iter()
            .map(|id| name_of(id).unwrap_or_else(|| id.clone()))
            .collect(),
        rationale: group.rationale.clone(),
        bullets: rationale_bullets(&group.rationale),
        url: group.url(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{GroupingError, LlmError};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::onboarding::model::{ParticipantProfile, SkillLevel};
    use crate::onboarding::state::ConversationState;
    use crate::store::LibSqlBackend;

    struct OfflineLlm;

    #[async_trait]
    impl LlmProvider for OfflineLlm {
        fn model_name(&self) -> &str {
            "offline"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "offline".into(),
                reason: "no network in tests".into(),
            })
        }
    }

    struct Fixture {
        service: FacilitatorService,
        db: Arc<LibSqlBackend>,
        sessions: Arc<SessionRegistry>,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sessions = Arc::new(SessionRegistry::default());
        db.insert_session(&sessions.current()).await.unwrap();
        let service = FacilitatorService::new(
            db.clone(),
            Arc::clone(&sessions),
            RationaleWriter::deterministic(),
            ThemeSummarizer::new(Arc::new(OfflineLlm), Duration::from_secs(1)),
            3,
        );
        Fixture {
            service,
            db,
            sessions,
        }
    }

    async fn profiled(db: &LibSqlBackend, id: &str, session: &str, role: &str) {
        let mut p = db.upsert_participant(id, session).await.unwrap().participant;
        p.name = Some(format!("Name {id}"));
        p.creative_role = Some(role.to_string());
        p.state = ConversationState::ProfileReady;
        let profile = ParticipantProfile {
            participant_id: id.to_string(),
            skill_level: SkillLevel::Intermediate,
            goals: "goals".into(),
            barriers: "barriers".into(),
            summary: format!("{id} summary"),
            created_at: Utc::now(),
        };
        db.complete_profile(&p, &profile).await.unwrap();
    }

    async fn seven_profiles(f: &Fixture) {
        let session = f.sessions.current_id();
        let roles = ["musician", "musician", "designer", "writer", "writer", "writer", "chef"];
        for (i, role) in roles.iter().enumerate() {
            profiled(&f.db, &format!("p{i}"), &session, role).await;
        }
    }

    #[tokio::test]
    async fn listing_after_rotation_shows_only_newest_session() {
        let f = fixture().await;
        for round in 0..4 {
            let session = f.sessions.current_id();
            for i in 0..3 {
                f.db.upsert_participant(&format!("r{round}-{i}"), &session)
                    .await
                    .unwrap();
            }

            let rotated = f.service.rotate_session().await.unwrap();
            let listing = f.service.list_participants().await.unwrap();
            assert_eq!(listing.session_id, rotated.session_id);
            assert!(listing.participants.is_empty(), "round {round}");

            f.db.upsert_participant(&format!("fresh-{round}"), &rotated.session_id)
                .await
                .unwrap();
            let listing = f.service.list_participants().await.unwrap();
            let ids: Vec<_> = listing.participants.iter().map(|p| p.external_id.as_str()).collect();
            assert_eq!(ids, vec![format!("fresh-{round}")]);
        }

        // History is preserved and the newest session is persisted.
        let snapshot = f.service.export().await.unwrap();
        assert_eq!(snapshot.participants.len(), 4 * 4);
        assert_eq!(snapshot.sessions.len(), 5);
        assert_eq!(
            f.db.latest_session().await.unwrap().unwrap().id,
            f.service.current_session().session_id
        );
    }

    #[tokio::test]
    async fn concurrent_rotations_persist_the_installed_session_last() {
        let f = fixture().await;
        let service = Arc::new(f.service);
        let rotations: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.rotate_session().await.unwrap() })
            })
            .collect();
        for rotation in rotations {
            rotation.await.unwrap();
        }

        assert_eq!(
            f.db.latest_session().await.unwrap().unwrap().id,
            service.current_session().session_id
        );
    }

    /// Counts overlapping calls; each one takes a while to answer.
    struct SlowLlm {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for SlowLlm {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: "Complementary roles. Shared goals.".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn rationales_are_written_concurrently() {
        let f = fixture().await;
        seven_profiles(&f).await;
        let llm = Arc::new(SlowLlm {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let service = FacilitatorService::new(
            f.db.clone(),
            Arc::clone(&f.sessions),
            RationaleWriter::with_ai(llm.clone(), Duration::from_secs(2)),
            ThemeSummarizer::new(Arc::new(OfflineLlm), Duration::from_secs(1)),
            2,
        );

        let groups = service.form_groups(None).await.unwrap();
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.rationale.starts_with("Complementary roles")));
        assert!(llm.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn forms_balanced_groups_for_current_session() {
        let f = fixture().await;
        seven_profiles(&f).await;
        // A profiled participant from an older session is never grouped.
        profiled(&f.db, "old", "session_old", "writer").await;

        let groups = f.service.form_groups(None).await.unwrap();
        let sizes: Vec<usize> = groups.iter().map(|g| g.members.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(groups[0].name, "Group 1");
        assert_eq!(groups[0].url, "/group1");
        assert!(groups[0].members.contains(&"Name p3".to_string()));
        assert!(!groups[0].bullets.is_empty());
        assert!(groups.iter().all(|g| !g.members.contains(&"Name old".to_string())));

        for i in 0..7 {
            let p = f.db.get_participant(&format!("p{i}")).await.unwrap().unwrap();
            assert_eq!(p.state, ConversationState::GroupPhase);
        }
        assert_eq!(f.service.list_groups().await.unwrap(), groups);
    }

    #[tokio::test]
    async fn regrouping_is_deterministic_and_supersedes() {
        let f = fixture().await;
        seven_profiles(&f).await;

        let first = f.service.form_groups(Some(3)).await.unwrap();
        let second = f.service.form_groups(Some(3)).await.unwrap();
        let members = |gs: &[GroupListing]| gs.iter().map(|g| g.members.clone()).collect::<Vec<_>>();
        assert_eq!(members(&first), members(&second));

        let regrouped = f.service.form_groups(Some(2)).await.unwrap();
        assert_eq!(regrouped.len(), 4);
        assert_eq!(f.service.list_groups().await.unwrap().len(), 4);

        let all: HashSet<String> = regrouped.iter().flat_map(|g| g.members.clone()).collect();
        assert_eq!(all.len(), 7);
    }

    #[tokio::test]
    async fn invalid_size_leaves_groups_untouched() {
        let f = fixture().await;
        seven_profiles(&f).await;
        f.service.form_groups(None).await.unwrap();

        let err = f.service.form_groups(Some(0)).await.unwrap_err();
        assert!(matches!(
            err,
            FacilitatorError::Grouping(GroupingError::InvalidConfiguration(_))
        ));
        assert_eq!(f.service.list_groups().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn no_profiles_means_no_groups() {
        let f = fixture().await;
        f.db.upsert_participant("chatting", &f.sessions.current_id())
            .await
            .unwrap();
        assert!(f.service.form_groups(None).await.unwrap().is_empty());
        assert!(f.service.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn themes_degrade_to_empty() {
        let f = fixture().await;
        seven_profiles(&f).await;
        assert!(f.service.themes().await.unwrap().is_empty());
    }
}
