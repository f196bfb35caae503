//! Conversation state machine — tracks where a participant is.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The states of a participant's conversation.
///
/// Progresses linearly: New → Onboarding → ProfilePending → ProfileReady →
/// GroupPhase, with Closed reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    New,
    Onboarding,
    ProfilePending,
    ProfileReady,
    GroupPhase,
    Closed,
}

impl ConversationState {
    pub const ALL: [ConversationState; 6] = [
        Self::New,
        Self::Onboarding,
        Self::ProfilePending,
        Self::ProfileReady,
        Self::GroupPhase,
        Self::Closed,
    ];

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        use ConversationState::*;
        match (self, target) {
            (Closed, _) => false,
            (_, Closed) => true,
            _ => matches!(
                (self, target),
                (New, Onboarding)
                    | (Onboarding, ProfilePending)
                    | (ProfilePending, ProfileReady)
                    | (ProfileReady, GroupPhase)
            ),
        }
    }

    /// Whether a stored `self` may be overwritten with `target`.
    ///
    /// Allows staying put and moving forward (possibly several steps), never
    /// moving backward or leaving Closed.
    pub fn may_advance_to(&self, target: ConversationState) -> bool {
        if *self == target {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        target.is_terminal() || self.position() < target.position()
    }

    fn position(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Onboarding => 1,
            Self::ProfilePending => 2,
            Self::ProfileReady => 3,
            Self::GroupPhase => 4,
            Self::Closed => 5,
        }
    }

    /// Whether inbound messages still drive the AI conversation.
    pub fn is_onboarding(&self) -> bool {
        matches!(self, Self::New | Self::Onboarding | Self::ProfilePending)
    }

    /// Whether the conversation is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether a stored profile accompanies this state.
    pub fn has_profile(&self) -> bool {
        matches!(self, Self::ProfileReady | Self::GroupPhase)
    }

    /// Whether the participant can be placed into a group.
    pub fn is_groupable(&self) -> bool {
        self.has_profile()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Onboarding => "onboarding",
            Self::ProfilePending => "profile_pending",
            Self::ProfileReady => "profile_ready",
            Self::GroupPhase => "group_phase",
            Self::Closed => "closed",
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::New
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "onboarding" => Ok(Self::Onboarding),
            "profile_pending" => Ok(Self::ProfilePending),
            "profile_ready" => Ok(Self::ProfileReady),
            "group_phase" => Ok(Self::GroupPhase),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown conversation state: {other}")),
        }
    }
}
