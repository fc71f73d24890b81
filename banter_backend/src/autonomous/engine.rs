use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::{AutonomousCommentingConfig, BotConfig};
use crate::history::ContextHistory;
use crate::lexicon;
use crate::llm_client::{is_affirmative, AiClient};
use crate::lock_unpoisoned;
use crate::message::ChatMessage;
use crate::reactions::{Mood, MoodSource};

/// Messages inspected by the contextual gate.
const GATE_WINDOW: usize = 5;
const GATE_REPLY_WINDOW: usize = 2;
const GATE_TROUBLE_WINDOW: usize = 3;

/// Per-chat counters governing when an unsolicited comment is allowed.
#[derive(Debug, Clone)]
pub struct ChatEngagementState {
    pub messages_since_last_comment: u32,
    pub last_comment_time: Option<Instant>,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub next_comment_threshold: u32,
    pub recent_messages: VecDeque<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatStats {
    pub messages_since_comment: u32,
    pub last_comment: Option<DateTime<Utc>>,
    pub next_threshold: u32,
    pub recent_messages_count: usize,
}

pub fn mood_factor(mood: Mood) -> f64 {
    match mood {
        Mood::VeryPositive => 1.2,
        Mood::Negative => 0.7,
        Mood::Mixed => 0.9,
        _ => 1.0,
    }
}

pub struct DecisionEngine {
    config: AutonomousCommentingConfig,
    excluded_chats: Vec<i64>,
    context_window_size: usize,
    gate_context_messages: usize,
    mood: Arc<dyn MoodSource>,
    chats: Mutex<HashMap<i64, ChatEngagementState>>,
}

impl DecisionEngine {
    pub fn new(config: &BotConfig, mood: Arc<dyn MoodSource>) -> Self {
        Self {
            config: config.autonomous_commenting.clone(),
            excluded_chats: config.excluded_chats.clone(),
            context_window_size: config.conversation_monitoring.context_window_size.max(1),
            gate_context_messages: config.ai.context_messages_count.max(1),
            mood,
            chats: Mutex::new(HashMap::new()),
        }
    }

    fn roll_threshold(&self) -> u32 {
        let mut low = self.config.min_messages_between_comments;
        let mut high = self.config.max_messages_between_comments;
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }
        rand::thread_rng().gen_range(low..=high)
    }

    fn with_state<R>(&self, chat_id: i64, f: impl FnOnce(&mut ChatEngagementState) -> R) -> R {
        let mut chats = lock_unpoisoned(&self.chats);
        let state = chats.entry(chat_id).or_insert_with(|| ChatEngagementState {
            messages_since_last_comment: 0,
            last_comment_time: None,
            last_comment_at: None,
            next_comment_threshold: self.roll_threshold(),
            recent_messages: VecDeque::new(),
        });
        f(state)
    }

    pub fn add_message(&self, chat_id: i64, message: &ChatMessage) {
        let window = self.context_window_size;
        self.with_state(chat_id, |state| {
            state.messages_since_last_comment += 1;
            state.recent_messages.push_back(message.clone());
            while state.recent_messages.len() > window {
                state.recent_messages.pop_front();
            }
        });
    }

    pub fn should_comment(&self, chat_id: i64, bot_id: i64) -> bool {
        if !self.config.enabled || self.excluded_chats.contains(&chat_id) {
            return false;
        }

        let min_messages = self.config.min_messages_between_comments;
        let cooldown = Duration::from_secs(self.config.min_time_between_comments_seconds);
        let eligible = self.with_state(chat_id, |state| {
            if state.messages_since_last_comment < min_messages {
                return false;
            }
            if let Some(last) = state.last_comment_time {
                if last.elapsed() < cooldown {
                    return false;
                }
            }
            state.messages_since_last_comment >= state.next_comment_threshold
        });
        if !eligible {
            return false;
        }

        let probability = self.mood_adjusted_probability(chat_id);
        let draw: f64 = rand::random();
        if draw > probability {
            let threshold = self.roll_threshold();
            self.with_state(chat_id, |state| state.next_comment_threshold = threshold);
            tracing::debug!(
                "Comment draw {:.2} > {:.2} in chat {}; snoozing until {} messages",
                draw,
                probability,
                chat_id,
                threshold
            );
            return false;
        }

        if self.config.use_intelligent_decision {
            return self.with_state(chat_id, |state| {
                is_good_time_to_comment(&state.recent_messages, bot_id)
            });
        }

        true
    }

    /// Base probability scaled by the chat's mood, clamped to [0, 1].
    pub fn mood_adjusted_probability(&self, chat_id: i64) -> f64 {
        let base = self.config.comment_probability;
        match self.mood.group_mood(chat_id) {
            Ok(report) => (base * mood_factor(report.overall_mood)).clamp(0.0, 1.0),
            Err(e) => {
                tracing::warn!("Mood lookup failed for chat {}: {:#}", chat_id, e);
                base
            }
        }
    }

    /// Optional model gate consulted after `should_comment` passes. The
    /// transcript is the last `ai.context_messages_count` history lines.
    pub async fn should_comment_ai_check(
        &self,
        chat_id: i64,
        history: &dyn ContextHistory,
        ai: &dyn AiClient,
    ) -> bool {
        if !self.config.use_ai_decision {
            return true;
        }

        let transcript = history.context(chat_id, self.gate_context_messages);
        if transcript.trim().is_empty() {
            return false;
        }

        let prompt = format!(
            "## Recent group conversation\n{}\n\n\
             You are a participant in this chat and have not been addressed directly. \
             Would an unprompted, witty comment from you fit naturally right now, \
             without interrupting a private exchange?\n\n\
             Answer with a single word: YES or NO.",
            transcript
        );

        match ai.decide_yes_no(&prompt).await {
            Ok(answer) => {
                let yes = is_affirmative(&answer);
                tracing::info!(
                    "AI comment gate for chat {} answered {:?} ({})",
                    chat_id,
                    answer.trim(),
                    if yes { "go" } else { "hold" }
                );
                yes
            }
            Err(e) => {
                tracing::warn!("AI comment gate failed for chat {}: {:#}", chat_id, e);
                false
            }
        }
    }

    pub fn mark_commented(&self, chat_id: i64) {
        let threshold = self.roll_threshold();
        self.with_state(chat_id, |state| {
            state.messages_since_last_comment = 0;
            state.last_comment_time = Some(Instant::now());
            // Successive marks stay strictly ordered even within one clock tick.
            let now = Utc::now();
            state.last_comment_at = Some(match state.last_comment_at {
                Some(previous) if now <= previous => previous + chrono::Duration::microseconds(1),
                _ => now,
            });
            state.next_comment_threshold = threshold;
        });
    }

    /// Forget the in-memory window and counters for a chat.
    pub fn reset_chat(&self, chat_id: i64) {
        if lock_unpoisoned(&self.chats).remove(&chat_id).is_some() {
            tracing::info!("Reset engagement state for chat {}", chat_id);
        }
    }

    pub fn chat_stats(&self, chat_id: i64) -> Option<ChatStats> {
        lock_unpoisoned(&self.chats)
            .get(&chat_id)
            .map(|state| ChatStats {
                messages_since_comment: state.messages_since_last_comment,
                last_comment: state.last_comment_at,
                next_threshold: state.next_comment_threshold,
                recent_messages_count: state.recent_messages.len(),
            })
    }

    pub fn recent_messages(&self, chat_id: i64) -> Vec<ChatMessage> {
        lock_unpoisoned(&self.chats)
            .get(&chat_id)
            .map(|state| state.recent_messages.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Contextual check: avoid cutting into a direct exchange with the bot,
/// favor busy conversations and visible trouble.
pub fn is_good_time_to_comment(messages: &VecDeque<ChatMessage>, bot_id: i64) -> bool {
    let start = messages.len().saturating_sub(GATE_WINDOW);
    let recent: Vec<&ChatMessage> = messages.iter().skip(start).collect();
    if recent.is_empty() {
        return false;
    }

    let reply_start = recent.len().saturating_sub(GATE_REPLY_WINDOW);
    if recent[reply_start..]
        .iter()
        .any(|m| m.reply_to_user_id == Some(bot_id))
    {
        return false;
    }

    let active_users: HashSet<i64> = recent
        .iter()
        .filter_map(|m| m.sender_id())
        .filter(|id| *id != bot_id)
        .collect();
    if active_users.len() >= 2 {
        return true;
    }

    let trouble_start = recent.len().saturating_sub(GATE_TROUBLE_WINDOW);
    if recent[trouble_start..].iter().any(|m| {
        let lower = m.text.to_lowercase();
        lexicon::contains_trouble_keyword(&lower) || lexicon::has_typo_pattern(&m.text)
    }) {
        return true;
    }

    true
}
