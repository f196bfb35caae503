//! System prompts, extraction prompts and canned replies for onboarding.

use serde::Deserialize;

use crate::llm::json::extract_json_object;

use super::model::{ConversationTurn, Participant, TurnRole};

/// First assistant message of every onboarding conversation.
pub const GREETING: &str = "Hi! Let's get started.\n\
1) Your name?\n\
2) What kind of creative work do you do (profession or hobby)?";

/// Standard reply once a conversation is closed.
pub const CLOSED_REPLY: &str =
    "This conversation has ended. Thanks for taking part! Please wait for the facilitator.";

/// Reply for participants whose profile is done but who are not yet grouped.
pub const PROFILE_READY_REPLY: &str = "Your profile is complete. \
You're ready to connect with others for co-creation! The facilitator will form groups soon.";

/// Generic retryable reply for AI or storage failures.
pub const UPSTREAM_REPLY: &str =
    "Sorry, I'm having trouble responding right now. Please try sending that again.";

/// Reply while the profile could not yet be extracted.
pub const PROFILE_PROCESSING_REPLY: &str =
    "Thanks! Your profile is still processing, please continue chatting.";

/// Reply when strict isolation rejects a participant from a previous session.
pub const SESSION_MISMATCH_REPLY: &str =
    "This workshop session has ended. Please ask the facilitator for a new link.";

pub const EMPTY_MESSAGE_REPLY: &str = "Please type a message.";

/// Used when the AI returned structured output without any reply text.
pub const FALLBACK_FOLLOW_UP: &str = "Thanks! Could you tell me a bit more about that?";

/// System framing for every extraction call.
pub const EXTRACTION_SYSTEM: &str =
    "You are a data extraction assistant. Output only valid JSON.";

/// Redirect for participants who already have a group.
pub fn group_phase_reply(number: u32, name: &str) -> String {
    format!(
        "You're in {name}! Head over to /group{number} to start co-creating with your group."
    )
}

/// Build the system prompt for one onboarding turn.
///
/// `turn` is the 1-based exchange about to happen; `conclude_now` forces the
/// closing message.
pub fn onboarding_system_prompt(
    participant: &Participant,
    turn: u32,
    turn_budget: u32,
    conclude_now: bool,
) -> String {
    let base = "\
You are an expert facilitator helping a creative professional reflect on their AI usage \
and upskilling needs. Work in short, clear messages, but be kind. Ask one question at a time.
Language: mirror the participant's language; if unclear, default to English.

If you don't know them yet, first learn their name and what kind of creative work they do \
(profession or hobby). Then map, briefly:
- Creative tasks they already use AI for (concrete examples)
- Creative tasks they would like to learn to use AI for in the next 6 months
- Perceived blockers (skills, tools, ethics, IP, organisational)";

    let pacing = if conclude_now {
        "\n\nThis is the final exchange. Conclude now: thank them by name, give a compact bullet \
summary of their needs, and tell them they're ready to connect with others for co-creation. \
Set ready_to_conclude to true."
            .to_string()
    } else {
        format!(
            "\n\nThis is exchange {turn} of at most {turn_budget}. Set ready_to_conclude to true \
only once you have learned enough about their uses, goals and blockers."
        )
    };

    let mut known = Vec::new();
    if let Some(ref name) = participant.name {
        known.push(format!("- Name: {name}"));
    }
    if let Some(ref role) = participant.creative_role {
        known.push(format!("- Creative work: {role}"));
    }
    let known = if known.is_empty() {
        String::new()
    } else {
        format!("\n\nWhat you've learned so far:\n{}", known.join("\n"))
    };

    let format = r#"

Respond with ONLY a JSON object:
{
  "reply": "your message to the participant",
  "ready_to_conclude": true | false,
  "name": "their name if known, else null",
  "creative_role": "their creative work if known, else null"
}"#;

    format!("{base}{pacing}{known}{format}")
}

/// Render a transcript as plain text for extraction prompts.
pub fn render_transcript(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            let speaker = match t.role {
                TurnRole::Participant => "Participant",
                TurnRole::Assistant => "Facilitator",
            };
            format!("{speaker}: {}", t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the profile extraction prompt. `strict` is used for the retry after
/// a malformed first answer.
pub fn extraction_prompt(conversation_text: &str, strict: bool) -> String {
    let schema = r#"{
  "skill_level": "beginner" | "intermediate" | "advanced" | "expert",
  "goals": "what they want to learn to use AI for",
  "barriers": "what holds them back from adopting AI",
  "summary": "two or three sentence summary of their upskilling needs",
  "name": "string or null",
  "creative_role": "string or null"
}"#;

    let strictness = if strict {
        "\n\nYour previous answer could not be parsed. Return exactly one JSON object with every \
key above. skill_level MUST be one of the four listed values. goals, barriers and summary MUST \
be non-empty strings. Do not wrap the JSON in markdown."
    } else {
        ""
    };

    format!(
        "Given this onboarding conversation:\n\n\
         {conversation_text}\n\n\
         Extract the participant's upskilling profile:\n\
         {schema}{strictness}\n\n\
         Respond with ONLY valid JSON, no explanation or markdown formatting."
    )
}

#[derive(Debug, Deserialize)]
struct TurnReplyWire {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    ready_to_conclude: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    creative_role: Option<String>,
}

/// Result of parsing an assistant's onboarding turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTurnReply {
    /// Text safe to show the participant.
    pub reply: String,
    pub ready_to_conclude: bool,
    pub name: Option<String>,
    pub creative_role: Option<String>,
    /// Whether the output matched the structured format.
    pub structured: bool,
}

/// Parse an assistant turn.
///
/// Unstructured output is shown verbatim and never signals completion, so
/// the turn ceiling stays the only way out when parsing fails.
pub fn parse_turn_reply(raw: &str) -> ParsedTurnReply {
    let parsed = extract_json_object(raw)
        .and_then(|json| serde_json::from_str::<TurnReplyWire>(json).ok());

    match parsed {
        Some(wire) => {
            let reply = wire
                .reply
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());
            ParsedTurnReply {
                structured: reply.is_some(),
                ready_to_conclude: wire.ready_to_conclude && reply.is_some(),
                reply: reply.unwrap_or_else(|| FALLBACK_FOLLOW_UP.to_string()),
                name: wire.name,
                creative_role: wire.creative_role,
            }
        }
        None => ParsedTurnReply {
            reply: raw.trim().to_string(),
            ready_to_conclude: false,
            name: None,
            creative_role: None,
            structured: false,
        },
    }
}
