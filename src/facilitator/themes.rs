//! Shared themes across the current session's profiles.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::json::extract_json_object;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_within};

const THEMES_SYSTEM: &str = "\
You turn multiple participant need-summaries into 5-10 shared themes for co-creation.
Output JSON with keys: themes:[{name, rationale, representative_quotes[]}]. Keep it concise.";

/// One shared theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub representative_quotes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ThemesWire {
    #[serde(default)]
    themes: Vec<Theme>,
}

/// Parse the AI's themes JSON; `None` when it is unusable.
pub fn parse_themes(raw: &str) -> Option<Vec<Theme>> {
    let json = extract_json_object(raw)?;
    let wire: ThemesWire = serde_json::from_str(json).ok()?;
    Some(
        wire.themes
            .into_iter()
            .filter(|t| !t.name.trim().is_empty())
            .collect(),
    )
}

pub struct ThemeSummarizer {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl ThemeSummarizer {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Summarize profile summaries into themes. Any failure yields an empty
    /// list.
    pub async fn summarize(&self, summaries: &[String]) -> Vec<Theme> {
        if summaries.is_empty() {
            return Vec::new();
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(THEMES_SYSTEM),
            ChatMessage::user(summaries.join("\n---\n")),
        ])
        .with_max_tokens(800)
        .with_temperature(0.2)
        .with_json_response();

        match complete_within(self.llm.as_ref(), request, self.timeout).await {
            Ok(response) => match parse_themes(&response.content) {
                Some(themes) => {
                    info!(summaries = summaries.len(), themes = themes.len(), "Themes generated");
                    themes
                }
                None => {
                    warn!("Themes output was not valid JSON");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Themes call failed");
                Vec::new()
            }
        }
    }
}
