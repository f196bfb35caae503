//! Human-readable rationales for formed groups.
//!
//! The deterministic description is always available; the AI phrasing is
//! optional and cosmetic, and never influences membership.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::model::GroupPlan;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, complete_within};
use crate::onboarding::model::SkillLevel;

const RATIONALE_SYSTEM: &str = "\
You explain why a small group of workshop participants was put together for a creative \
co-creation sprint. Consider topical alignment, skill complementarity and learning synergy. \
Answer in two or three short sentences of plain text addressed to the group. No lists, no markdown.";

/// Maximum number of bullets shown on the sharing screen.
pub const MAX_BULLETS: usize = 3;

/// Default group name for a 1-based group number.
pub fn group_name(number: u32) -> String {
    format!("Group {number}")
}

/// Describe a plan from its role and skill spread.
pub fn describe_group(plan: &GroupPlan) -> String {
    if plan.members.is_empty() {
        return "No members yet.".to_string();
    }

    let mut roles: Vec<String> = Vec::new();
    for member in &plan.members {
        let role = member.diversity_key();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    let role_sentence = if plan.members.len() == 1 {
        format!("A solo seat for a {} background", roles[0])
    } else if roles.len() == 1 {
        format!("Everyone shares a {} background", roles[0])
    } else if roles.len() == plan.members.len() {
        format!("Brings together {} for a mix of creative backgrounds", join_list(&roles))
    } else {
        format!("Combines {} backgrounds", join_list(&roles))
    };

    let skills = plan.members.iter().map(|m| m.skill_level);
    let (min, max) = match (skills.clone().min(), skills.max()) {
        (Some(min), Some(max)) => (min, max),
        _ => (SkillLevel::Beginner, SkillLevel::Beginner),
    };
    let skill_sentence = if min == max {
        format!("All members are at the {min} level with AI, so they can learn side by side")
    } else {
        format!(
            "AI experience ranges from {min} to {max}, so more experienced members can support the others"
        )
    };

    format!("{role_sentence}. {skill_sentence}.")
}

/// Split a rationale into at most three sentence bullets.
pub fn rationale_bullets(rationale: &str) -> Vec<String> {
    rationale
        .split(". ")
        .map(|s| s.trim().trim_end_matches('.').trim())
        .filter(|s| !s.is_empty())
        .take(MAX_BULLETS)
        .map(str::to_string)
        .collect()
}

fn join_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

/// Produces the rationale attached to each group.
pub struct RationaleWriter {
    llm: Option<Arc<dyn LlmProvider>>,
    timeout: Duration,
}

impl RationaleWriter {
    /// Rationales from [`describe_group`] only.
    pub fn deterministic() -> Self {
        Self {
            llm: None,
            timeout: Duration::ZERO,
        }
    }

    /// Ask the AI to phrase rationales, falling back to [`describe_group`].
    pub fn with_ai(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self {
            llm: Some(llm),
            timeout,
        }
    }

    /// `member_sections` are the members' profile blocks in plan order.
    pub async fn write(&self, plan: &GroupPlan, member_sections: &[String]) -> String {
        let fallback = describe_group(plan);
        let Some(ref llm) = self.llm else {
            return fallback;
        };
        if plan.members.is_empty() {
            return fallback;
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(RATIONALE_SYSTEM),
            ChatMessage::user(format!(
                "{}\n\nStructural notes: {fallback}",
                member_sections.join("\n\n")
            )),
        ])
        .with_max_tokens(200)
        .with_temperature(0.4);

        match complete_within(llm.as_ref(), request, self.timeout).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.is_empty() {
                    debug!(group = plan.number, "Empty AI rationale, using description");
                    fallback
                } else {
                    text.to_string()
                }
            }
            Err(e) => {
                warn!(group = plan.number, error = %e, "AI rationale failed, using description");
                fallback
            }
        }
    }
}
