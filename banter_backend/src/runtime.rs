use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::autonomous::{AutonomousComment, ChatStats, CommentGenerator, CommentType, DecisionEngine};
use crate::config::BotConfig;
use crate::history::MessageHistory;
use crate::llm_client::AiClient;
use crate::lock_unpoisoned;
use crate::message::ChatMessage;
use crate::profiles::{self, ProfileStore, RegenerationReport};
use crate::reactions::{MoodReport, ReactionAnalytics, ReactionSelector, ReactionStats};
use crate::transport::MessageTransport;

const ENRICHMENT_SAMPLE: usize = 30;
const ROAST_TOPIC_MAX_CHARS: usize = 80;

/// What the bot did in response to one incoming message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandledMessage {
    pub reaction: Option<String>,
    pub comment: Option<AutonomousComment>,
}

pub struct BotRuntime {
    config: BotConfig,
    bot_id: i64,
    ai: Arc<dyn AiClient>,
    transport: Arc<dyn MessageTransport>,
    profiles: Arc<ProfileStore>,
    history: Arc<MessageHistory>,
    analytics: Arc<ReactionAnalytics>,
    engine: DecisionEngine,
    generator: CommentGenerator,
    selector: ReactionSelector,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct BotRuntimeBuilder {
    config: BotConfig,
    ai: Arc<dyn AiClient>,
    transport: Arc<dyn MessageTransport>,
    bot_id: i64,
}

impl BotRuntimeBuilder {
    pub fn new(config: BotConfig, ai: Arc<dyn AiClient>, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            config,
            ai,
            transport,
            bot_id: 0,
        }
    }

    pub fn with_bot_id(mut self, bot_id: i64) -> Self {
        self.bot_id = bot_id;
        self
    }

    pub fn build(self) -> Result<BotRuntime> {
        let config = self.config;

        let profiles = Arc::new(
            ProfileStore::open(&config.user_profiling.profile_directory)
                .context("Failed to open profile store")?,
        );
        let monitoring = &config.conversation_monitoring;
        let history = Arc::new(
            MessageHistory::open(
                &monitoring.history_directory,
                monitoring.history_max_messages,
                monitoring.history_expiration_hours,
            )
            .context("Failed to open message history")?,
        );

        let analytics = Arc::new(ReactionAnalytics::new(profiles.clone()));
        let engine = DecisionEngine::new(&config, analytics.clone());
        let generator = CommentGenerator::new(
            profiles.clone(),
            history.clone(),
            config.autonomous_commenting.clone(),
            config.ai.context_messages_count,
            monitoring.uncensored_mode,
        );
        let selector = ReactionSelector::new(config.reaction_system.clone());

        tracing::info!(
            "Bot runtime ready (bot id: {}, autonomous commenting: {}, reactions: {})",
            self.bot_id,
            config.autonomous_commenting.enabled,
            config.reaction_system.enabled
        );

        Ok(BotRuntime {
            config,
            bot_id: self.bot_id,
            ai: self.ai,
            transport: self.transport,
            profiles,
            history,
            analytics,
            engine,
            generator,
            selector,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl BotRuntime {
    pub fn bootstrap(
        config: BotConfig,
        ai: Arc<dyn AiClient>,
        transport: Arc<dyn MessageTransport>,
        bot_id: i64,
    ) -> Result<Self> {
        BotRuntimeBuilder::new(config, ai, transport)
            .with_bot_id(bot_id)
            .build()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    fn is_tracked(&self, message: &ChatMessage) -> bool {
        !message.is_private
            && !message.text.trim().is_empty()
            && !self.config.is_excluded_chat(message.chat_id)
            && message.sender_id().is_some_and(|id| id != self.bot_id)
    }

    /// Full pipeline for one incoming message: track, maybe react, maybe comment.
    pub async fn handle_message(&self, message: &ChatMessage) -> HandledMessage {
        if !self.is_tracked(message) {
            return HandledMessage::default();
        }

        self.track_message(message).await;
        if message.is_command() {
            return HandledMessage::default();
        }

        HandledMessage {
            reaction: self.maybe_react(message).await,
            comment: self.maybe_comment(message.chat_id).await,
        }
    }

    /// Bookkeeping for a non-empty group message from someone other than the bot.
    pub async fn track_message(&self, message: &ChatMessage) {
        if !self.is_tracked(message) {
            return;
        }

        self.history.add_message(message);

        if self.config.user_profiling.enabled {
            if let Some(count) = self.profiles.update_from_message(message) {
                let interval = self.config.user_profiling.enrichment_interval_messages;
                if profiles::should_enrich(count, interval) {
                    self.enrich_sender(message).await;
                }
            }
        }

        self.engine.add_message(message.chat_id, message);
    }

    async fn enrich_sender(&self, message: &ChatMessage) {
        let Some(user_id) = message.sender_id() else {
            return;
        };

        let sample = ENRICHMENT_SAMPLE.min(self.config.conversation_monitoring.context_window_size);
        let recent = self.history.user_messages(message.chat_id, user_id, sample);
        tracing::info!("Triggering AI enrichment for user {}", user_id);

        let changed = profiles::enrich(
            &self.profiles,
            user_id,
            &recent,
            self.ai.as_ref(),
            &self.config.system_prompts.profile_analysis,
        )
        .await;
        if changed {
            self.profiles.save(user_id);
        }
    }

    /// Counters, mood and context gates, then the optional model gate.
    pub async fn should_comment(&self, chat_id: i64) -> bool {
        self.engine.should_comment(chat_id, self.bot_id)
            && self
                .engine
                .should_comment_ai_check(chat_id, self.history.as_ref(), self.ai.as_ref())
                .await
    }

    pub async fn generate_comment(&self, chat_id: i64) -> Option<AutonomousComment> {
        let window = self.engine.recent_messages(chat_id);
        self.generator
            .generate_comment(chat_id, &window, self.ai.as_ref(), self.bot_id)
            .await
    }

    pub fn mark_commented(&self, chat_id: i64) {
        self.engine.mark_commented(chat_id);
    }

    /// Decide, generate and deliver an unsolicited comment.
    pub async fn maybe_comment(&self, chat_id: i64) -> Option<AutonomousComment> {
        if !self.should_comment(chat_id).await {
            return None;
        }

        let comment = self.generate_comment(chat_id).await?;
        if let Err(e) = self
            .transport
            .send_message(chat_id, &comment.text, comment.reply_to_message_id)
            .await
        {
            tracing::warn!("Failed to deliver autonomous comment to chat {}: {:#}", chat_id, e);
            return None;
        }

        self.mark_commented(chat_id);
        tracing::info!(
            "Posted {} comment in chat {}: {}",
            comment.comment_type.as_str(),
            chat_id,
            comment.reasoning
        );

        if comment.comment_type == CommentType::Roast {
            if let Some(target) = comment.target_user_id {
                self.profiles.record_roast(target, &roast_topic(&comment), true);
            }
        }

        Some(comment)
    }

    pub async fn maybe_react(&self, message: &ChatMessage) -> Option<String> {
        if !self.selector.should_react(message.chat_id) {
            return None;
        }

        let emoji = self.selector.choose_reaction(&message.text);
        match self
            .transport
            .set_reaction(message.chat_id, message.message_id, &emoji)
            .await
        {
            Ok(()) => {
                self.selector.mark_reacted(message.chat_id);
                tracing::debug!(
                    "Reacted {} to message {} in chat {}",
                    emoji,
                    message.message_id,
                    message.chat_id
                );
                Some(emoji)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to react to message {} in chat {}: {:#}",
                    message.message_id,
                    message.chat_id,
                    e
                );
                None
            }
        }
    }

    /// Record a user's reaction to a message, resolving its text from history.
    pub fn track_reaction(&self, chat_id: i64, user_id: i64, message_id: i64, emoji: &str) {
        let reactions = &self.config.reaction_system;
        if !reactions.enabled
            || !reactions.track_reactions
            || user_id == self.bot_id
            || self.config.is_excluded_chat(chat_id)
        {
            return;
        }

        let target_text = self.history.find_text(chat_id, message_id).unwrap_or_default();
        self.profiles
            .track_reaction_in_chat(chat_id, user_id, emoji, &target_text);
    }

    pub fn group_mood(&self, chat_id: i64) -> MoodReport {
        self.analytics.group_mood(chat_id)
    }

    pub fn user_reaction_stats(&self, user_id: i64) -> ReactionStats {
        self.analytics.user_reaction_stats(user_id)
    }

    pub fn chat_stats(&self, chat_id: i64) -> Option<ChatStats> {
        self.engine.chat_stats(chat_id)
    }

    pub fn profile_summary(&self, user_id: i64) -> String {
        self.profiles.profile_summary(user_id)
    }

    /// Forget the chat's conversation context, in memory and on disk.
    pub fn reset_chat(&self, chat_id: i64) {
        self.engine.reset_chat(chat_id);
        self.history.clear_chat_history(chat_id);
    }

    /// Admin-only. Returns false when refused or when nothing was logged.
    pub fn clear_chat_reactions(&self, chat_id: i64, requested_by: i64) -> bool {
        if !self.config.is_admin(requested_by) {
            tracing::warn!(
                "User {} is not an admin; refusing to clear reactions for chat {}",
                requested_by,
                chat_id
            );
            return false;
        }
        self.profiles.clear_chat_reactions(chat_id)
    }

    /// Admin-only re-enrichment of every profile with enough history.
    pub async fn regenerate_profiles(&self, requested_by: i64) -> Option<RegenerationReport> {
        if !self.config.is_admin(requested_by) {
            tracing::warn!("User {} is not an admin; refusing profile regeneration", requested_by);
            return None;
        }

        let report = profiles::regenerate_all(
            &self.profiles,
            &self.history,
            self.ai.as_ref(),
            &self.config.system_prompts.profile_analysis,
        )
        .await;
        tracing::info!(
            "Profile regeneration finished: {} processed, {} skipped, {} failed of {}",
            report.processed,
            report.skipped,
            report.failed,
            report.total
        );
        Some(report)
    }

    /// Start the periodic profile and history savers. Must run inside a tokio runtime.
    pub fn spawn_background_tasks(&self) {
        let profile_every =
            Duration::from_secs(self.config.user_profiling.auto_save_interval_seconds.max(1));
        let history_every = Duration::from_secs(
            self.config
                .conversation_monitoring
                .history_autosave_interval_seconds
                .max(1),
        );

        let profiles = self.profiles.clone();
        let profile_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(profile_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let saved = profiles.save_all();
                tracing::debug!("Auto-saved {} profiles", saved);
            }
        });

        let history = self.history.clone();
        let history_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(history_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                history.cleanup_expired();
                history.save_all();
            }
        });

        lock_unpoisoned(&self.tasks).extend([profile_task, history_task]);
        tracing::info!(
            "Background auto-save started (profiles every {:?}, history every {:?})",
            profile_every,
            history_every
        );
    }

    /// Stop background tasks and flush everything to disk.
    pub fn shutdown(&self) {
        for task in lock_unpoisoned(&self.tasks).drain(..) {
            task.abort();
        }

        let profiles = self.profiles.save_all();
        let chats = self.history.save_all();
        tracing::info!(
            "Shutdown flush complete ({} profiles, {} chat histories)",
            profiles,
            chats
        );
    }
}

fn roast_topic(comment: &AutonomousComment) -> String {
    let reasoning = comment.reasoning.trim();
    if reasoning.is_empty() {
        "roast".to_string()
    } else {
        reasoning.chars().take(ROAST_TOPIC_MAX_CHARS).collect()
    }
}
