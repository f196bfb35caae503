//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Allowed range for the onboarding turn ceiling.
pub const TURN_BUDGET_RANGE: std::ops::RangeInclusive<u32> = 5..=7;

/// Workshop backend configuration.
#[derive(Debug, Clone)]
pub struct WorkshopConfig {
    /// Hard ceiling on onboarding exchanges (K).
    pub turn_budget: u32,
    /// Earliest exchange at which an AI completion signal is honoured.
    pub min_turns: u32,
    /// Default target group size for group formation.
    pub target_group_size: u32,
    /// Upper bound on any single AI call.
    pub llm_timeout: Duration,
    /// Reject turns from participants bound to a superseded session.
    pub strict_isolation: bool,
    /// Ask the AI to phrase group rationales.
    pub ai_rationale: bool,
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Model name passed to the provider.
    pub model: String,
    /// OpenAI-compatible API base URL.
    pub api_base_url: String,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            turn_budget: 6,
            min_turns: 3,
            target_group_size: 3,
            llm_timeout: Duration::from_secs(30),
            strict_isolation: false,
            ai_rationale: true,
            port: 8000,
            db_path: PathBuf::from("./data/workshop.db"),
            model: "gpt-4o-mini".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            log_dir: None,
        }
    }
}

impl WorkshopConfig {
    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparsable values fall back to
    /// defaults; out-of-range values are rejected by [`validate`](Self::validate).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u32 = |key: &str, default: u32| {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        let parse_bool = |key: &str, default: bool| {
            lookup(key)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        let llm_timeout_secs = lookup("WORKSHOP_LLM_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(defaults.llm_timeout.as_secs());

        let config = Self {
            turn_budget: parse_u32("WORKSHOP_TURN_BUDGET", defaults.turn_budget),
            min_turns: parse_u32("WORKSHOP_MIN_TURNS", defaults.min_turns),
            target_group_size: parse_u32("WORKSHOP_GROUP_SIZE", defaults.target_group_size),
            llm_timeout: Duration::from_secs(llm_timeout_secs),
            strict_isolation: parse_bool("WORKSHOP_STRICT_ISOLATION", defaults.strict_isolation),
            ai_rationale: parse_bool("WORKSHOP_AI_RATIONALE", defaults.ai_rationale),
            port: lookup("WORKSHOP_PORT")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            db_path: lookup("WORKSHOP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            model: lookup("WORKSHOP_MODEL").unwrap_or(defaults.model),
            api_base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.api_base_url),
            log_dir: lookup("WORKSHOP_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the conversation and grouping engines cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TURN_BUDGET_RANGE.contains(&self.turn_budget) {
            return Err(ConfigError::InvalidValue {
                key: "WORKSHOP_TURN_BUDGET".to_string(),
                message: format!(
                    "must be between {} and {}, got {}",
                    TURN_BUDGET_RANGE.start(),
                    TURN_BUDGET_RANGE.end(),
                    self.turn_budget
                ),
            });
        }
        if self.min_turns == 0 || self.min_turns > self.turn_budget {
            return Err(ConfigError::InvalidValue {
                key: "WORKSHOP_MIN_TURNS".to_string(),
                message: format!(
                    "must be between 1 and the turn budget ({}), got {}",
                    self.turn_budget, self.min_turns
                ),
            });
        }
        if self.target_group_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WORKSHOP_GROUP_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.llm_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "WORKSHOP_LLM_TIMEOUT_SECS".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}
