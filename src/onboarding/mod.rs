//! Participant onboarding: the conversational flow that turns a few
//! exchanges into an upskilling profile.
//!
//! `ConversationEngine` drives each participant from first contact through
//! a bounded number of AI exchanges to `profile_ready`. The transcript is
//! then handed to `ProfileExtractor`, whose validated output is what group
//! formation consumes.

pub mod engine;
pub mod extractor;
pub mod locks;
pub mod model;
pub mod prompts;
pub mod routes;
pub mod state;

pub use engine::{
    BootResponse, ChatNotice, ChatResponse, ConversationEngine, EngineSettings, TranscriptMessage,
};
pub use extractor::{Extraction, ProfileExtractor};
pub use locks::KeyedLocks;
pub use model::{
    ConversationTurn, Participant, ParticipantProfile, ParticipantSummary, SkillLevel, TurnPhase,
    TurnRole,
};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::ConversationState;
