//! Workshop Assist: AI-guided participant onboarding, session-scoped
//! facilitation and balanced group formation.

pub mod app;
pub mod config;
pub mod error;
pub mod facilitator;
pub mod grouping;
pub mod llm;
pub mod onboarding;
pub mod session;
pub mod store;
