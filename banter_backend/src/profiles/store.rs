use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{UserProfile, CURRENT_SCHEMA_VERSION};
use crate::lexicon;
use crate::lock_unpoisoned;
use crate::message::ChatMessage;
use crate::persist::{read_json, write_json};

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReaction {
    pub user_id: i64,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub target_message_text: String,
}

/// Append-only record of reactions seen in one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReactionLog {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub chat_id: i64,
    #[serde(default)]
    pub reactions: Vec<ChatReaction>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ChatReactionLog {
    fn new(chat_id: i64) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            chat_id,
            reactions: Vec::new(),
            last_updated: None,
        }
    }
}

/// Owns every user profile and per-chat reaction log, cached in memory and
/// persisted as one JSON file each.
pub struct ProfileStore {
    users_dir: PathBuf,
    chats_dir: PathBuf,
    profiles: Mutex<HashMap<i64, UserProfile>>,
    reaction_logs: Mutex<HashMap<i64, ChatReactionLog>>,
}

impl ProfileStore {
    pub fn open(profile_directory: impl AsRef<Path>) -> Result<Self> {
        let root = profile_directory.as_ref();
        let users_dir = root.join("users");
        let chats_dir = root.join("chats");

        fs::create_dir_all(&users_dir)
            .with_context(|| format!("Failed to create {:?}", users_dir))?;
        fs::create_dir_all(&chats_dir)
            .with_context(|| format!("Failed to create {:?}", chats_dir))?;

        tracing::info!("Profile store initialized at {:?}", root);
        Ok(Self {
            users_dir,
            chats_dir,
            profiles: Mutex::new(HashMap::new()),
            reaction_logs: Mutex::new(HashMap::new()),
        })
    }

    fn user_path(&self, user_id: i64) -> PathBuf {
        self.users_dir.join(format!("user_{}.json", user_id))
    }

    fn chat_path(&self, chat_id: i64) -> PathBuf {
        self.chats_dir.join(format!("chat_{}.json", chat_id))
    }

    /// Returns a snapshot of the profile, creating it if it was never seen.
    pub fn load(&self, user_id: i64) -> UserProfile {
        self.with_profile(user_id, |profile| profile.clone())
    }

    /// Run `f` against the cached profile, loading or creating it first.
    pub fn with_profile<R>(&self, user_id: i64, f: impl FnOnce(&mut UserProfile) -> R) -> R {
        let mut profiles = lock_unpoisoned(&self.profiles);
        let profile = profiles
            .entry(user_id)
            .or_insert_with(|| self.read_profile(user_id));
        f(profile)
    }

    fn read_profile(&self, user_id: i64) -> UserProfile {
        let path = self.user_path(user_id);
        match read_json::<UserProfile>(&path) {
            Ok(Some(mut profile)) => {
                if profile.schema_version > CURRENT_SCHEMA_VERSION {
                    tracing::warn!(
                        "Profile for user {} has schema version {} (newer than {}); loading best-effort",
                        user_id,
                        profile.schema_version,
                        CURRENT_SCHEMA_VERSION
                    );
                }
                if profile.user_id != user_id {
                    tracing::warn!(
                        "Profile file {:?} names user {}; keeping {}",
                        path,
                        profile.user_id,
                        user_id
                    );
                    profile.user_id = user_id;
                }
                tracing::debug!("Loaded profile for user {}", user_id);
                return profile;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Error loading profile for user {}: {:#}", user_id, e);
            }
        }

        tracing::info!("Created new profile for user {}", user_id);
        UserProfile::new(user_id)
    }

    pub fn save(&self, user_id: i64) -> bool {
        let profile = lock_unpoisoned(&self.profiles).get(&user_id).cloned();
        let Some(profile) = profile else {
            tracing::warn!("No profile to save for user {}", user_id);
            return false;
        };

        match write_json(&self.user_path(user_id), &profile) {
            Ok(()) => {
                tracing::debug!("Saved profile for user {}", user_id);
                true
            }
            Err(e) => {
                tracing::error!("Error saving profile for user {}: {:#}", user_id, e);
                false
            }
        }
    }

    pub fn save_all(&self) -> usize {
        let saved = self
            .cached_user_ids()
            .into_iter()
            .filter(|user_id| self.save(*user_id))
            .count();
        tracing::info!("Saved {} profiles to disk", saved);
        saved
    }

    pub fn cached_user_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock_unpoisoned(&self.profiles).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cheap per-message bookkeeping. Returns the sender's new message count.
    pub fn update_from_message(&self, message: &ChatMessage) -> Option<u64> {
        let sender = message.sender.as_ref()?;

        let count = self.with_profile(sender.id, |profile| {
            profile.username = sender.username.clone().unwrap_or_default();
            profile.first_name = sender.first_name.clone().unwrap_or_default();
            profile.last_name = sender.last_name.clone().unwrap_or_default();
            profile.last_seen = Some(Utc::now());
            profile.message_count += 1;

            if !profile.chats.contains(&message.chat_id) {
                profile.chats.push(message.chat_id);
            }

            if lexicon::contains_cyrillic(&message.text) {
                profile.language_preference = "ru".to_string();
            } else if profile.language_preference.is_empty() {
                profile.language_preference = "en".to_string();
            }

            profile.message_count
        });

        Some(count)
    }

    pub fn track_reaction(&self, user_id: i64, emoji: &str, target_text: &str) {
        let emoji = lexicon::normalize_emoji(emoji);
        let total = self.with_profile(user_id, |profile| {
            let patterns = &mut profile.reaction_patterns;
            *patterns
                .favorite_reactions
                .entry(emoji.to_string())
                .or_insert(0) += 1;
            patterns.total_reactions += 1;

            if let Some(target) = lexicon::classify_reaction_target(target_text) {
                if !patterns.reaction_targets.iter().any(|t| t == target) {
                    patterns.reaction_targets.push(target.to_string());
                }
            }

            let emotion = lexicon::classify_reaction_emotion(emoji);
            *patterns
                .emotional_responses
                .entry(emotion.as_str().to_string())
                .or_insert(0) += 1;

            patterns.total_reactions
        });

        tracing::debug!(
            "Tracked reaction {} for user {} (total: {})",
            emoji,
            user_id,
            total
        );
    }

    /// Track the reaction on the user's profile and in the chat's reaction log.
    pub fn track_reaction_in_chat(&self, chat_id: i64, user_id: i64, emoji: &str, target_text: &str) {
        self.track_reaction(user_id, emoji, target_text);
        self.record_chat_reaction(
            chat_id,
            ChatReaction {
                user_id,
                emoji: lexicon::normalize_emoji(emoji).to_string(),
                timestamp: Utc::now(),
                target_message_text: target_text.to_string(),
            },
        );
    }

    pub fn record_chat_reaction(&self, chat_id: i64, reaction: ChatReaction) {
        let snapshot = self.with_reaction_log(chat_id, |log| {
            log.reactions.push(reaction);
            log.last_updated = Some(Utc::now());
            log.clone()
        });
        self.persist_reaction_log(&snapshot);
    }

    fn with_reaction_log<R>(&self, chat_id: i64, f: impl FnOnce(&mut ChatReactionLog) -> R) -> R {
        let mut logs = lock_unpoisoned(&self.reaction_logs);
        let log = logs
            .entry(chat_id)
            .or_insert_with(|| self.read_reaction_log(chat_id));
        f(log)
    }

    fn read_reaction_log(&self, chat_id: i64) -> ChatReactionLog {
        match read_json::<ChatReactionLog>(&self.chat_path(chat_id)) {
            Ok(Some(log)) => {
                if log.schema_version > CURRENT_SCHEMA_VERSION {
                    tracing::warn!(
                        "Reaction log for chat {} has schema version {}; loading best-effort",
                        chat_id,
                        log.schema_version
                    );
                }
                log
            }
            Ok(None) => ChatReactionLog::new(chat_id),
            Err(e) => {
                tracing::error!("Error loading reaction log for chat {}: {:#}", chat_id, e);
                ChatReactionLog::new(chat_id)
            }
        }
    }

    fn persist_reaction_log(&self, log: &ChatReactionLog) -> bool {
        match write_json(&self.chat_path(log.chat_id), log) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error saving reaction log for chat {}: {:#}", log.chat_id, e);
                false
            }
        }
    }

    /// Reactions logged in the chat within the last `hours`.
    pub fn recent_chat_reactions(&self, chat_id: i64, hours: i64) -> Vec<ChatReaction> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.with_reaction_log(chat_id, |log| {
            log.reactions
                .iter()
                .filter(|reaction| reaction.timestamp >= cutoff)
                .cloned()
                .collect()
        })
    }

    /// Admin reset: drops every logged reaction for the chat.
    pub fn clear_chat_reactions(&self, chat_id: i64) -> bool {
        let snapshot = self.with_reaction_log(chat_id, |log| {
            let cleared = log.reactions.len();
            log.reactions.clear();
            log.last_updated = Some(Utc::now());
            tracing::info!("Cleared {} reactions for chat {}", cleared, chat_id);
            log.clone()
        });
        self.persist_reaction_log(&snapshot)
    }

    pub fn record_roast(&self, target_user_id: i64, topic: &str, success: bool) {
        self.with_profile(target_user_id, |profile| {
            let history = &mut profile.roast_history;
            if success {
                history.successful_roasts += 1;
                if !history.topics_hit.iter().any(|t| t == topic) {
                    history.topics_hit.push(topic.to_string());
                }
            }
            history.last_roasted = Some(Utc::now());
        });
    }

    pub fn profile_summary(&self, user_id: i64) -> String {
        self.with_profile(user_id, |profile| profile.summary())
    }

    #[cfg(test)]
    pub(crate) fn clear_cache(&self) {
        lock_unpoisoned(&self.profiles).clear();
        lock_unpoisoned(&self.reaction_logs).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatUser;

    fn message(chat_id: i64, user_id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            message_id: 1,
            chat_id,
            is_private: false,
            sender: Some(ChatUser {
                id: user_id,
                username: Some("nick".to_string()),
                first_name: Some("Nick".to_string()),
                last_name: None,
            }),
            text: text.to_string(),
            reply_to_user_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn load_creates_fresh_profile_and_save_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");

        store.update_from_message(&message(-1, 42, "hello"));
        store.track_reaction(42, "👍", "why does this happen");
        store.record_roast(42, "git", true);
        let before = store.load(42);
        assert!(store.save(42));

        store.clear_cache();
        let after = store.load(42);
        assert_eq!(before, after);
        assert!(dir.path().join("users/user_42.json").exists());
    }

    #[test]
    fn save_unknown_user_returns_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");
        assert!(!store.save(99));
    }

    #[test]
    fn corrupt_profile_file_falls_back_to_fresh_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");
        fs::write(dir.path().join("users/user_3.json"), "{broken").expect("write");

        let profile = store.load(3);
        assert_eq!(profile.user_id, 3);
        assert_eq!(profile.message_count, 0);
    }

    #[test]
    fn newer_schema_version_is_loaded_best_effort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");
        let raw = r#"{"schema_version": 9, "user_id": 4, "first_seen": "2024-01-01T00:00:00Z", "message_count": 12, "future_field": true}"#;
        fs::write(dir.path().join("users/user_4.json"), raw).expect("write");

        let profile = store.load(4);
        assert_eq!(profile.message_count, 12);
        assert_eq!(profile.schema_version, 9);
    }

    #[test]
    fn update_from_message_tracks_identity_chats_and_language() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");

        assert_eq!(store.update_from_message(&message(-1, 7, "hi")), Some(1));
        assert_eq!(store.update_from_message(&message(-2, 7, "привет")), Some(2));
        assert_eq!(store.update_from_message(&message(-1, 7, "back to english")), Some(3));

        let profile = store.load(7);
        assert_eq!(profile.chats, vec![-1, -2]);
        assert_eq!(profile.language_preference, "ru");
        assert_eq!(profile.first_name, "Nick");
        assert!(profile.last_seen.is_some());

        let mut anonymous = message(-1, 0, "x");
        anonymous.sender = None;
        assert_eq!(store.update_from_message(&anonymous), None);
    }

    #[test]
    fn thumbs_up_on_question_updates_all_counters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");

        store.track_reaction(1, "👍", "why does this happen");
        store.track_reaction(1, "👍", "another question?");

        let patterns = store.load(1).reaction_patterns;
        assert_eq!(patterns.favorite_reactions.get("👍"), Some(&2));
        assert_eq!(patterns.emotional_responses.get("positive"), Some(&2));
        assert_eq!(patterns.reaction_targets, vec!["questions".to_string()]);
        assert_eq!(patterns.total_reactions, 2);
    }

    #[test]
    fn record_roast_only_counts_successes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");

        store.record_roast(5, "typos", false);
        let history = store.load(5).roast_history;
        assert_eq!(history.successful_roasts, 0);
        assert!(history.topics_hit.is_empty());
        assert!(history.last_roasted.is_some());

        store.record_roast(5, "typos", true);
        store.record_roast(5, "typos", true);
        let history = store.load(5).roast_history;
        assert_eq!(history.successful_roasts, 2);
        assert_eq!(history.topics_hit, vec!["typos".to_string()]);
    }

    #[test]
    fn chat_reaction_log_persists_filters_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");

        store.track_reaction_in_chat(-10, 1, "🔥", "fire release");
        store.record_chat_reaction(
            -10,
            ChatReaction {
                user_id: 2,
                emoji: "👎".to_string(),
                timestamp: Utc::now() - Duration::hours(30),
                target_message_text: String::new(),
            },
        );

        store.clear_cache();
        assert_eq!(store.recent_chat_reactions(-10, 24).len(), 1);
        assert_eq!(store.recent_chat_reactions(-10, 48).len(), 2);

        assert!(store.clear_chat_reactions(-10));
        store.clear_cache();
        assert!(store.recent_chat_reactions(-10, 48).is_empty());
    }

    #[test]
    fn summary_mentions_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProfileStore::open(dir.path()).expect("open");
        store.update_from_message(&message(-1, 8, "hello"));

        let summary = store.profile_summary(8);
        assert!(summary.contains("User: Nick (@nick)"));
        assert!(summary.contains("Messages: 1"));
        assert_eq!(store.cached_user_ids(), vec![8]);
        assert_eq!(store.save_all(), 1);
    }
}
