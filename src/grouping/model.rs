//! Group data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::onboarding::model::{Participant, ParticipantProfile, SkillLevel, TurnRole};

/// Bucket key used when a participant never declared a role.
pub const UNSPECIFIED_ROLE: &str = "unspecified";

/// A profiled participant eligible for grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCandidate {
    pub participant_id: String,
    pub name: Option<String>,
    pub creative_role: Option<String>,
    pub skill_level: SkillLevel,
}

impl GroupCandidate {
    pub fn from_profile(participant: &Participant, profile: &ParticipantProfile) -> Self {
        Self {
            participant_id: participant.external_id.clone(),
            name: participant.name.clone(),
            creative_role: participant.creative_role.clone(),
            skill_level: profile.skill_level,
        }
    }

    /// Normalized diversity-bucket key (lowercased, trimmed role).
    pub fn diversity_key(&self) -> String {
        self.creative_role
            .as_deref()
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| UNSPECIFIED_ROLE.to_string())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.participant_id)
    }
}

/// Deterministic output of the partition step; carries no rationale yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    /// 1-based group number.
    pub number: u32,
    pub members: Vec<GroupCandidate>,
}

impl GroupPlan {
    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.participant_id.clone()).collect()
    }
}

/// A persisted group in one workshop session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub session_id: String,
    pub number: u32,
    pub name: String,
    pub rationale: String,
    /// Ordered member external identifiers.
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Set when a later formation in the same session replaced this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn new(
        session_id: impl Into<String>,
        plan: &GroupPlan,
        name: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            number: plan.number,
            name: name.into(),
            rationale: rationale.into(),
            members: plan.member_ids(),
            created_at: Utc::now(),
            superseded_at: None,
        }
    }

    /// Relative URL of the group's co-creation chat.
    pub fn url(&self) -> String {
        format!("/group{}", self.number)
    }
}

/// One message in a group's co-creation chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTurn {
    pub id: Uuid,
    pub group_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl GroupTurn {
    pub fn new(group_id: Uuid, role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Sharing-screen view of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupListing {
    pub number: u32,
    pub name: String,
    pub members: Vec<String>,
    pub rationale: String,
    pub bullets: Vec<String>,
    pub url: String,
}
