//! Error types for the workshop backend.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Conversation error: {0}")]
    Engine(#[from] EngineError),

    #[error("Grouping error: {0}")]
    Grouping(#[from] GroupingError),

    #[error("Facilitator error: {0}")]
    Facilitator(#[from] FacilitatorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Stale write for participant {id}: stored state {stored} cannot move to {attempted}")]
    StaleState {
        id: String,
        stored: String,
        attempted: String,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors. Every variant is an upstream failure from the
/// conversation's point of view and is retryable by the participant.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Profile extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction output failed validation: {0}")]
    MalformedOutput(String),

    #[error("Extraction call failed: {0}")]
    Upstream(#[from] LlmError),
}

/// Conversation engine errors. None of these escape
/// `ConversationEngine::handle_message`; they are translated into a
/// participant-safe reply there.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Participant {participant} is bound to session {bound}, not {current}")]
    SessionMismatch {
        participant: String,
        bound: String,
        current: String,
    },

    #[error("AI collaborator unavailable: {0}")]
    Upstream(#[from] LlmError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Profile extraction failed for {participant}: {reason}")]
    ProfileExtractionFailed { participant: String, reason: String },

    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    #[error("Message is empty")]
    EmptyMessage,
}

/// Group formation errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupingError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors surfaced to facilitator-facing callers.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    #[error(transparent)]
    Grouping(#[from] GroupingError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),
}

/// Group co-creation chat errors.
#[derive(Debug, thiserror::Error)]
pub enum CoCreationError {
    #[error("Group {0} not found in the current session")]
    GroupNotFound(u32),

    #[error("AI collaborator unavailable: {0}")]
    Upstream(#[from] LlmError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Message is empty")]
    EmptyMessage,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
