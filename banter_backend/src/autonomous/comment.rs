use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::AutonomousCommentingConfig;
use crate::history::ContextHistory;
use crate::llm_client::{extract_json_object, AiClient};
use crate::message::ChatMessage;
use crate::profiles::ProfileStore;

const MAX_PARTICIPANTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentType {
    Roast,
    Observation,
    Joke,
    Reaction,
}

impl CommentType {
    /// Unknown labels fall back to `Observation`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "roast" => Self::Roast,
            "joke" => Self::Joke,
            "reaction" => Self::Reaction,
            _ => Self::Observation,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Roast => "roast",
            Self::Observation => "observation",
            Self::Joke => "joke",
            Self::Reaction => "reaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutonomousComment {
    pub text: String,
    pub reply_to_message_id: Option<i64>,
    pub target_user_id: Option<i64>,
    pub comment_type: CommentType,
    pub reasoning: String,
}

/// Per-call knobs rolled before building the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentPlan {
    pub should_roast: bool,
    pub prefer_reply: bool,
}

impl CommentPlan {
    pub fn roll(config: &AutonomousCommentingConfig, has_summaries: bool, rng: &mut impl Rng) -> Self {
        let roast_draw: f64 = rng.gen();
        let reply_draw: f64 = rng.gen();
        Self {
            should_roast: config.roasting_enabled
                && has_summaries
                && roast_draw < config.target_weaknesses_probability,
            prefer_reply: config.prefer_replies && reply_draw > config.standalone_probability,
        }
    }
}

#[derive(Debug, Clone)]
struct TranscriptLine {
    message_id: i64,
    user_id: i64,
    name: String,
    text: String,
}

impl TranscriptLine {
    fn render(&self) -> String {
        format!("[ID:{}] {}: {}", self.message_id, self.name, self.text)
    }
}

/// Builds profile-aware prompts and turns model replies into comments.
pub struct CommentGenerator {
    profiles: Arc<ProfileStore>,
    history: Arc<dyn ContextHistory>,
    config: AutonomousCommentingConfig,
    transcript_messages: usize,
    uncensored: bool,
}

impl CommentGenerator {
    pub fn new(
        profiles: Arc<ProfileStore>,
        history: Arc<dyn ContextHistory>,
        config: AutonomousCommentingConfig,
        transcript_messages: usize,
        uncensored: bool,
    ) -> Self {
        Self {
            profiles,
            history,
            config,
            transcript_messages: transcript_messages.max(1),
            uncensored,
        }
    }

    /// `window` is the decision engine's in-memory view of the chat; persisted
    /// history is used when it holds nothing usable.
    pub async fn generate_comment(
        &self,
        chat_id: i64,
        window: &[ChatMessage],
        ai: &dyn AiClient,
        bot_id: i64,
    ) -> Option<AutonomousComment> {
        let lines = self.transcript(chat_id, window, bot_id);
        if lines.is_empty() {
            tracing::warn!("No conversation context available for chat {}", chat_id);
            return None;
        }

        let participants = participants(&lines);
        let summaries: Vec<(String, String)> = participants
            .iter()
            .filter_map(|user_id| {
                let profile = self.profiles.load(*user_id);
                profile
                    .roast_summary()
                    .map(|summary| (format!("{} (ID:{})", profile.display_name(), user_id), summary))
            })
            .collect();

        let language = participants
            .first()
            .map(|user_id| self.profiles.load(*user_id).language_preference)
            .unwrap_or_else(|| "en".to_string());

        let plan = CommentPlan::roll(&self.config, !summaries.is_empty(), &mut rand::thread_rng());
        let transcript = lines
            .iter()
            .map(TranscriptLine::render)
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = build_comment_prompt(
            &transcript,
            &summaries,
            plan,
            self.config.roasting_aggression,
            self.uncensored,
        );

        tracing::debug!(
            "Generating comment for chat {} (roast: {}, reply: {}, participants: {})",
            chat_id,
            plan.should_roast,
            plan.prefer_reply,
            participants.len()
        );

        let response = match ai.generate_structured(&prompt, &language).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error generating autonomous comment for chat {}: {:#}", chat_id, e);
                return None;
            }
        };

        let mut comment = parse_comment_response(&response)?;
        if let Some(reply_to) = comment.reply_to_message_id {
            if !lines.iter().any(|line| line.message_id == reply_to) {
                tracing::debug!(
                    "Dropping reply target {} not present in chat {} transcript",
                    reply_to,
                    chat_id
                );
                comment.reply_to_message_id = None;
            }
        }
        Some(comment)
    }

    fn transcript(&self, chat_id: i64, window: &[ChatMessage], bot_id: i64) -> Vec<TranscriptLine> {
        let from_window: Vec<TranscriptLine> = window
            .iter()
            .filter_map(|message| {
                let sender = message.sender.as_ref()?;
                if sender.id == bot_id || message.text.trim().is_empty() {
                    return None;
                }
                Some(TranscriptLine {
                    message_id: message.message_id,
                    user_id: sender.id,
                    name: sender.display_name().to_string(),
                    text: message.text.trim().to_string(),
                })
            })
            .collect();

        let lines = if from_window.is_empty() {
            let entries = self.history.recent_messages(chat_id);
            if !entries.is_empty() {
                tracing::info!(
                    "Loaded {} messages from context history for chat {}",
                    entries.len(),
                    chat_id
                );
            }
            entries
                .into_iter()
                .filter(|entry| entry.user_id != bot_id && !entry.text.trim().is_empty())
                .map(|entry| {
                    let name = if !entry.first_name.is_empty() {
                        entry.first_name
                    } else if !entry.username.is_empty() {
                        entry.username
                    } else {
                        "User".to_string()
                    };
                    TranscriptLine {
                        message_id: entry.message_id,
                        user_id: entry.user_id,
                        name,
                        text: entry.text.trim().to_string(),
                    }
                })
                .collect()
        } else {
            from_window
        };

        let skip = lines.len().saturating_sub(self.transcript_messages);
        lines.into_iter().skip(skip).collect()
    }
}

/// Distinct authors, most recent speaker first.
fn participants(lines: &[TranscriptLine]) -> Vec<i64> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .rev()
        .map(|line| line.user_id)
        .filter(|user_id| *user_id != 0 && seen.insert(*user_id))
        .take(MAX_PARTICIPANTS)
        .collect()
}

pub fn build_comment_prompt(
    transcript: &str,
    summaries: &[(String, String)],
    plan: CommentPlan,
    aggression: f64,
    uncensored: bool,
) -> String {
    let roast_instruction = if plan.should_roast && !summaries.is_empty() {
        format!(
            "\nROASTING MODE: Your goal is to cleverly roast/tease someone based on their known weaknesses.\n\
             Aggression Level: {:.1}/1.0 (0=gentle teasing, 1=brutal roasting)\n\
             Target their patterns, mistakes, or embarrassments in a witty way.\n",
            aggression
        )
    } else {
        String::new()
    };

    let reply_instruction = if plan.prefer_reply {
        "Prefer replying to a specific message if it makes sense contextually."
    } else {
        "Make a general observation about the conversation."
    };

    let censorship = if uncensored {
        "Be completely uncensored. No boundaries, no filters."
    } else {
        "Keep it appropriate."
    };

    let mut profiles_text = String::new();
    if !summaries.is_empty() {
        profiles_text.push_str("\n\nUSER PROFILES:\n");
        for (name, summary) in summaries {
            profiles_text.push_str(&format!("\n{}:\n{}\n", name, summary));
        }
    }

    format!(
        r#"You are a witty, observational bot in a group chat. You've been monitoring the conversation and now want to chime in naturally.

RECENT CONVERSATION:
{transcript}
{profiles_text}

{roast_instruction}

INSTRUCTIONS:
- {reply_instruction}
- Be clever and natural, blend into the conversation
- Match the group's tone and language
- {censorship}
- If roasting, be witty not mean-spirited (unless aggression is high)

Respond with JSON:
{{
  "should_comment": true,
  "type": "roast|observation|joke|reaction",
  "reply_to_message_id": <message_id or null>,
  "target_user_id": <user_id or null>,
  "comment": "your witty comment here",
  "reasoning": "why this comment/target"
}}

IMPORTANT: Respond ONLY with valid JSON, no other text."#
    )
}

#[derive(Debug, Deserialize)]
struct CommentReply {
    #[serde(default)]
    should_comment: Value,
    #[serde(default, rename = "type")]
    comment_type: Option<String>,
    #[serde(default)]
    reply_to_message_id: Value,
    #[serde(default)]
    target_user_id: Value,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse the object between the first `{` and the last `}`; `None` when the
/// model declined or the reply is unusable.
pub fn parse_comment_response(raw: &str) -> Option<AutonomousComment> {
    let Some(json) = extract_json_object(raw) else {
        tracing::warn!("Comment response contained no JSON object");
        return None;
    };

    let reply: CommentReply = match serde_json::from_str(json) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!("Error parsing comment response: {}", e);
            tracing::debug!("Response was: {}", raw);
            return None;
        }
    };

    let text = reply.comment.as_deref().map(str::trim).unwrap_or_default();
    if !is_truthy(&reply.should_comment) || text.is_empty() {
        return None;
    }

    Some(AutonomousComment {
        text: text.to_string(),
        reply_to_message_id: as_id(&reply.reply_to_message_id),
        target_user_id: as_id(&reply.target_user_id),
        comment_type: reply
            .comment_type
            .as_deref()
            .map(CommentType::parse)
            .unwrap_or(CommentType::Observation),
        reasoning: reply.reasoning.unwrap_or_default(),
    })
}
