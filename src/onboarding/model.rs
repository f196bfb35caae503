//! Participant, transcript and profile data models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::ConversationState;

/// Longest display name accepted from the conversation.
pub const MAX_NAME_CHARS: usize = 120;
/// Longest creative role accepted from the conversation.
pub const MAX_ROLE_CHARS: usize = 200;

/// A workshop participant, keyed by a stable external identifier.
///
/// `session_id` is stamped at first contact and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub external_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative_role: Option<String>,
    pub state: ConversationState,
    /// 1-based onboarding turn; advances only after a committed exchange.
    pub turn: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(external_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            external_id: external_id.into(),
            session_id: session_id.into(),
            name: None,
            creative_role: None,
            state: ConversationState::New,
            turn: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill name/role from conversation output when not yet known.
    ///
    /// Returns true if anything changed.
    pub fn absorb_identity(&mut self, name: Option<&str>, creative_role: Option<&str>) -> bool {
        let mut changed = false;
        if self.name.is_none() {
            if let Some(name) = name.and_then(|n| clean_identity(n, MAX_NAME_CHARS)) {
                self.name = Some(name);
                changed = true;
            }
        }
        if self.creative_role.is_none() {
            if let Some(role) = creative_role.and_then(|r| clean_identity(r, MAX_ROLE_CHARS)) {
                self.creative_role = Some(role);
                changed = true;
            }
        }
        changed
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            creative_role: self.creative_role.clone(),
            state: self.state,
            turn: self.turn,
        }
    }
}

/// Trim and bound a name or role; rejects blanks, one-character values and
/// over-long strings.
fn clean_identity(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len <= 1 || len > max_chars {
        return None;
    }
    if trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("unknown") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Facilitator read model for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub external_id: String,
    pub name: Option<String>,
    pub creative_role: Option<String>,
    pub state: ConversationState,
    pub turn: u32,
}

impl ParticipantSummary {
    /// Name for dashboards; placeholder while it is still unknown.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(chatting...)")
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Participant,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "participant" => Ok(Self::Participant),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown turn role: {other}")),
        }
    }
}

/// Which conversation a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Onboarding,
    Group,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Onboarding => "onboarding",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(Self::Onboarding),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown turn phase: {other}")),
        }
    }
}

/// One append-only transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub participant_id: String,
    /// Session context the turn was written under.
    pub session_id: String,
    pub role: TurnRole,
    pub content: String,
    pub phase: TurnPhase,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(participant: &Participant, role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant.external_id.clone(),
            session_id: participant.session_id.clone(),
            role,
            content: content.into(),
            phase: TurnPhase::Onboarding,
            created_at: Utc::now(),
        }
    }

    pub fn from_participant(participant: &Participant, content: impl Into<String>) -> Self {
        Self::new(participant, TurnRole::Participant, content)
    }

    pub fn from_assistant(participant: &Participant, content: impl Into<String>) -> Self {
        Self::new(participant, TurnRole::Assistant, content)
    }
}

/// Self-assessed experience with AI tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl SkillLevel {
    pub const ALL: [SkillLevel; 4] = [
        SkillLevel::Beginner,
        SkillLevel::Intermediate,
        SkillLevel::Advanced,
        SkillLevel::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Expert => "expert",
        }
    }
}

impl std::fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            "expert" => Ok(Self::Expert),
            other => Err(format!("unknown skill level: {other}")),
        }
    }
}

/// Structured profile derived from a finished onboarding conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub participant_id: String,
    pub skill_level: SkillLevel,
    pub goals: String,
    /// Stated barriers to AI adoption.
    pub barriers: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl ParticipantProfile {
    /// Render the profile as the closing message shown to the participant.
    pub fn to_closing_message(&self, name: Option<&str>) -> String {
        let greeting = match name {
            Some(name) => format!("Thanks {name}! Here's your upskilling profile:"),
            None => "Thanks! Here's your upskilling profile:".to_string(),
        };
        [
            greeting,
            String::new(),
            format!("- **Experience with AI:** {}", self.skill_level),
            format!("- **Goals:** {}", self.goals),
            format!("- **Barriers:** {}", self.barriers),
            format!("- **Summary:** {}", self.summary),
            String::new(),
            "You're ready to connect with others for co-creation! \
             The facilitator will form groups soon."
                .to_string(),
        ]
        .join("\n")
    }

    /// Compact markdown block used inside facilitator-side prompts.
    pub fn to_prompt_section(&self, participant: &ParticipantSummary) -> String {
        let mut parts = vec![format!("## {}", participant.display_name())];
        if let Some(ref role) = participant.creative_role {
            parts.push(format!("- Role: {role}"));
        }
        parts.push(format!("- Skill level: {}", self.skill_level));
        parts.push(format!("- Goals: {}", self.goals));
        parts.push(format!("- Barriers: {}", self.barriers));
        parts.push(format!("- Summary: {}", self.summary));
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ParticipantProfile {
        ParticipantProfile {
            participant_id: "p1".to_string(),
            skill_level: SkillLevel::Intermediate,
            goals: "Generate mood boards".to_string(),
            barriers: "Worried about originality".to_string(),
            summary: "Illustrator exploring image models".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_participant_starts_at_turn_one() {
        let p = Participant::new("p1", "session_a");
        assert_eq!(p.state, ConversationState::New);
        assert_eq!(p.turn, 1);
        assert!(p.name.is_none());
    }

    #[test]
    fn absorb_identity_fills_only_missing_fields() {
        let mut p = Participant::new("p1", "s");
        assert!(p.absorb_identity(Some("  Ada  "), None));
        assert_eq!(p.name.as_deref(), Some("Ada"));

        // Name already known: ignored. Role fills.
        assert!(p.absorb_identity(Some("Grace"), Some("composer")));
        assert_eq!(p.name.as_deref(), Some("Ada"));
        assert_eq!(p.creative_role.as_deref(), Some("composer"));

        assert!(!p.absorb_identity(Some("Other"), Some("painter")));
    }

    #[test]
    fn absorb_identity_rejects_junk() {
        let mut p = Participant::new("p1", "s");
        assert!(!p.absorb_identity(Some("A"), Some("   ")));
        assert!(!p.absorb_identity(Some("null"), Some("unknown")));
        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(!p.absorb_identity(Some(&long), None));
        assert!(p.name.is_none());
        assert!(p.creative_role.is_none());
    }

    #[test]
    fn summary_display_name_placeholder() {
        let p = Participant::new("p1", "s");
        assert_eq!(p.summary().display_name(), "(chatting...)");
    }

    #[test]
    fn skill_level_parse_and_order() {
        assert_eq!("Advanced".parse::<SkillLevel>().unwrap(), SkillLevel::Advanced);
        assert_eq!(" beginner ".parse::<SkillLevel>().unwrap(), SkillLevel::Beginner);
        assert!("guru".parse::<SkillLevel>().is_err());
        assert!(SkillLevel::Beginner < SkillLevel::Expert);
    }

    #[test]
    fn enums_round_trip_through_str() {
        for role in [TurnRole::Participant, TurnRole::Assistant] {
            assert_eq!(role.to_string().parse::<TurnRole>().unwrap(), role);
        }
        for phase in [TurnPhase::Onboarding, TurnPhase::Group] {
            assert_eq!(phase.to_string().parse::<TurnPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn turns_inherit_participant_session() {
        let p = Participant::new("p1", "session_a");
        let turn = ConversationTurn::from_participant(&p, "hello");
        assert_eq!(turn.session_id, "session_a");
        assert_eq!(turn.role, TurnRole::Participant);
        assert_eq!(turn.phase, TurnPhase::Onboarding);
    }

    #[test]
    fn closing_message_mentions_name_and_fields() {
        let msg = profile().to_closing_message(Some("Ada"));
        assert!(msg.starts_with("Thanks Ada!"));
        assert!(msg.contains("intermediate"));
        assert!(msg.contains("mood boards"));
        assert!(msg.contains("form groups soon"));
    }

    #[test]
    fn prompt_section_includes_role() {
        let mut p = Participant::new("p1", "s");
        p.name = Some("Ada".to_string());
        p.creative_role = Some("illustrator".to_string());
        let section = profile().to_prompt_section(&p.summary());
        assert!(section.starts_with("## Ada"));
        assert!(section.contains("- Role: illustrator"));
    }
}
