use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::lock_unpoisoned;
use crate::message::ChatMessage;
use crate::persist::{read_json, write_json};

pub const HISTORY_SCHEMA_VERSION: u32 = 1;

const SAVE_EVERY_MESSAGES: u64 = 10;
const CONTEXT_LINE_MAX_CHARS: usize = 200;

/// Read access to per-chat conversation history.
pub trait ContextHistory: Send + Sync {
    /// Every retained entry for the chat, oldest first.
    fn recent_messages(&self, chat_id: i64) -> Vec<HistoryEntry>;

    /// `name: text` lines for the last `count` entries, commands skipped.
    fn context(&self, chat_id: i64, count: usize) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub text: String,
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_message(message: &ChatMessage) -> Self {
        let (user_id, username, first_name) = match &message.sender {
            Some(sender) => (
                sender.id,
                sender.username.clone().unwrap_or_default(),
                sender
                    .first_name
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string()),
            ),
            None => (0, String::new(), "Unknown".to_string()),
        };

        Self {
            user_id,
            username,
            first_name,
            text: message.text.clone(),
            message_id: message.message_id,
            timestamp: message.timestamp,
        }
    }

    pub fn is_command(&self) -> bool {
        self.text.trim_start().starts_with('/')
    }
}

fn default_history_schema_version() -> u32 {
    HISTORY_SCHEMA_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default = "default_history_schema_version")]
    schema_version: u32,
    chat_id: i64,
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

/// Rolling, time-limited transcript per chat, persisted as `chat_<id>.json`.
pub struct MessageHistory {
    storage_dir: PathBuf,
    max_messages: usize,
    expiration: Duration,
    chats: Mutex<HashMap<i64, Vec<HistoryEntry>>>,
    /// Entries appended per chat since startup or the last clear. Locked after `chats`.
    appended: Mutex<HashMap<i64, u64>>,
}

impl MessageHistory {
    pub fn open(
        storage_dir: impl AsRef<Path>,
        max_messages: usize,
        expiration_hours: i64,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        fs::create_dir_all(&storage_dir)
            .with_context(|| format!("Failed to create {:?}", storage_dir))?;

        let history = Self {
            storage_dir,
            max_messages: max_messages.max(1),
            expiration: Duration::hours(expiration_hours),
            chats: Mutex::new(HashMap::new()),
            appended: Mutex::new(HashMap::new()),
        };
        history.load_from_disk()?;

        tracing::info!(
            "Message history initialized with {}h expiration",
            expiration_hours
        );
        Ok(history)
    }

    fn chat_path(&self, chat_id: i64) -> PathBuf {
        self.storage_dir.join(format!("chat_{}.json", chat_id))
    }

    fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.expiration
    }

    fn load_from_disk(&self) -> Result<()> {
        let entries = fs::read_dir(&self.storage_dir)
            .with_context(|| format!("Failed to list {:?}", self.storage_dir))?;
        let cutoff = self.cutoff();
        let mut loaded_chats = 0;
        let mut expired = 0;
        let mut chats = lock_unpoisoned(&self.chats);

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(chat_id) = parse_chat_file_name(&path) else {
                continue;
            };

            let file = match read_json::<HistoryFile>(&path) {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Failed to load context history from {:?}: {:#}", path, e);
                    continue;
                }
            };
            if file.schema_version > HISTORY_SCHEMA_VERSION {
                tracing::warn!(
                    "History file {:?} has schema version {}; loading best-effort",
                    path,
                    file.schema_version
                );
            }

            let total = file.messages.len();
            let mut valid: Vec<HistoryEntry> = file
                .messages
                .into_iter()
                .filter(|m| m.timestamp >= cutoff)
                .collect();
            expired += total - valid.len();

            if valid.is_empty() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove expired history {:?}: {}", path, e);
                }
                continue;
            }

            if valid.len() > self.max_messages {
                let overflow = valid.len() - self.max_messages;
                valid.drain(..overflow);
            }
            chats.insert(chat_id, valid);
            loaded_chats += 1;
        }

        if loaded_chats > 0 {
            tracing::info!(
                "Loaded context history for {} chats (expired {} messages)",
                loaded_chats,
                expired
            );
        }
        Ok(())
    }

    pub fn add_message(&self, message: &ChatMessage) {
        self.add_entry(message.chat_id, HistoryEntry::from_message(message));
    }

    pub fn add_entry(&self, chat_id: i64, entry: HistoryEntry) {
        let snapshot = {
            let mut chats = lock_unpoisoned(&self.chats);
            let messages = chats.entry(chat_id).or_default();
            messages.push(entry);
            if messages.len() > self.max_messages {
                let overflow = messages.len() - self.max_messages;
                messages.drain(..overflow);
            }

            let mut appended = lock_unpoisoned(&self.appended);
            let count = appended.entry(chat_id).or_insert(0);
            *count += 1;
            if *count % SAVE_EVERY_MESSAGES == 0 {
                Some(messages.clone())
            } else {
                None
            }
        };

        if let Some(messages) = snapshot {
            self.write_chat(chat_id, messages);
        }
    }

    fn write_chat(&self, chat_id: i64, messages: Vec<HistoryEntry>) -> bool {
        let file = HistoryFile {
            schema_version: HISTORY_SCHEMA_VERSION,
            chat_id,
            messages,
        };
        match write_json(&self.chat_path(chat_id), &file) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to save context history for chat {}: {:#}", chat_id, e);
                false
            }
        }
    }

    /// Text of a retained message, used to classify what a reaction targeted.
    pub fn find_text(&self, chat_id: i64, message_id: i64) -> Option<String> {
        lock_unpoisoned(&self.chats).get(&chat_id).and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.message_id == message_id)
                .map(|m| m.text.clone())
        })
    }

    /// Newline-joined texts by one user in one chat, untruncated, commands skipped.
    pub fn user_messages(&self, chat_id: i64, user_id: i64, count: usize) -> String {
        let chats = lock_unpoisoned(&self.chats);
        let Some(messages) = chats.get(&chat_id) else {
            return String::new();
        };

        let from_user: Vec<&HistoryEntry> =
            messages.iter().filter(|m| m.user_id == user_id).collect();
        let start = from_user.len().saturating_sub(count);

        from_user[start..]
            .iter()
            .map(|m| m.text.trim())
            .filter(|text| !text.is_empty() && !text.starts_with('/'))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop entries past the expiration window and delete files of chats left
    /// empty. Returns how many were removed; the caller persists the rest.
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = self.cutoff();
        let mut removed = 0;
        let mut emptied = Vec::new();
        {
            let mut chats = lock_unpoisoned(&self.chats);
            chats.retain(|chat_id, messages| {
                let before = messages.len();
                messages.retain(|m| m.timestamp >= cutoff);
                removed += before - messages.len();
                if messages.is_empty() {
                    emptied.push(*chat_id);
                    false
                } else {
                    true
                }
            });
        }

        for chat_id in emptied {
            self.remove_chat_file(chat_id);
        }

        if removed > 0 {
            tracing::info!("Cleaned up {} expired context messages", removed);
        }
        removed
    }

    /// Persist every non-empty chat. Returns how many chats were written.
    pub fn save_all(&self) -> usize {
        let snapshot: Vec<(i64, Vec<HistoryEntry>)> = lock_unpoisoned(&self.chats)
            .iter()
            .filter(|(_, messages)| !messages.is_empty())
            .map(|(chat_id, messages)| (*chat_id, messages.clone()))
            .collect();

        let saved = snapshot
            .into_iter()
            .filter(|(chat_id, messages)| self.write_chat(*chat_id, messages.clone()))
            .count();
        if saved > 0 {
            tracing::debug!("Saved context history for {} chats", saved);
        }
        saved
    }

    pub fn all_chat_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock_unpoisoned(&self.chats).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear_chat_history(&self, chat_id: i64) {
        {
            let mut chats = lock_unpoisoned(&self.chats);
            lock_unpoisoned(&self.appended).remove(&chat_id);
            if chats.remove(&chat_id).is_some() {
                tracing::info!("Cleared message history for chat {}", chat_id);
            }
        }
        self.remove_chat_file(chat_id);
    }

    fn remove_chat_file(&self, chat_id: i64) {
        let path = self.chat_path(chat_id);
        if path.exists() {
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!("Removed context file for chat {}", chat_id),
                Err(e) => tracing::error!(
                    "Failed to remove context file for chat {}: {}",
                    chat_id,
                    e
                ),
            }
        }
    }
}

impl ContextHistory for MessageHistory {
    fn recent_messages(&self, chat_id: i64) -> Vec<HistoryEntry> {
        lock_unpoisoned(&self.chats)
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    fn context(&self, chat_id: i64, count: usize) -> String {
        let chats = lock_unpoisoned(&self.chats);
        let Some(messages) = chats.get(&chat_id) else {
            return String::new();
        };
        let start = messages.len().saturating_sub(count);

        messages[start..]
            .iter()
            .filter_map(|m| {
                let text = m.text.trim();
                if text.is_empty() || text.starts_with('/') {
                    return None;
                }
                let name = if m.first_name.is_empty() {
                    "Unknown"
                } else {
                    m.first_name.as_str()
                };
                Some(format!("{}: {}", name, truncate_chars(text, CONTEXT_LINE_MAX_CHARS)))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_chat_file_name(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("chat_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: i64, message_id: i64, text: &str, age_hours: i64) -> HistoryEntry {
        HistoryEntry {
            user_id,
            username: format!("user{}", user_id),
            first_name: format!("Name{}", user_id),
            text: text.to_string(),
            message_id,
            timestamp: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[test]
    fn keeps_only_the_newest_max_messages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 3, 24).expect("open");

        for id in 1..=5 {
            history.add_entry(-1, entry(1, id, "hi", 0));
        }

        let ids: Vec<i64> = history
            .recent_messages(-1)
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn context_skips_commands_and_truncates_long_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
        let long = "x".repeat(250);

        history.add_entry(-1, entry(1, 1, "/help", 0));
        history.add_entry(-1, entry(2, 2, &long, 0));
        history.add_entry(-1, entry(1, 3, "short", 0));

        let context = history.context(-1, 10);
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Name2: "));
        assert!(lines[0].ends_with("..."));
        assert_eq!(lines[0].chars().count(), "Name2: ".len() + 200 + 3);
        assert_eq!(lines[1], "Name1: short");
        assert_eq!(history.context(-99, 10), "");
    }

    #[test]
    fn user_messages_are_filtered_and_untruncated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
        let long = "y".repeat(300);

        history.add_entry(-1, entry(1, 1, "first", 0));
        history.add_entry(-1, entry(2, 2, "other user", 0));
        history.add_entry(-1, entry(1, 3, &long, 0));
        history.add_entry(-1, entry(1, 4, "/cmd", 0));

        assert_eq!(history.user_messages(-1, 1, 10), format!("first\n{}", long));
        assert_eq!(history.user_messages(-1, 1, 1), "");
        assert_eq!(history.find_text(-1, 2).as_deref(), Some("other user"));
    }

    #[test]
    fn expiry_sweep_and_reload_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
            history.add_entry(-1, entry(1, 1, "old", 30));
            history.add_entry(-1, entry(1, 2, "fresh", 1));
            history.add_entry(-2, entry(2, 3, "stale only", 48));

            assert_eq!(history.cleanup_expired(), 2);
            assert_eq!(history.all_chat_ids(), vec![-1]);
            assert_eq!(history.save_all(), 1);
        }

        let reloaded = MessageHistory::open(dir.path(), 100, 24).expect("reopen");
        let messages = reloaded.recent_messages(-1);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "fresh");
        assert!(reloaded.recent_messages(-2).is_empty());
    }

    #[test]
    fn every_tenth_message_is_written_and_clear_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
        let path = dir.path().join("chat_-5.json");

        for id in 1..=9 {
            history.add_entry(-5, entry(1, id, "msg", 0));
        }
        assert!(!path.exists());
        history.add_entry(-5, entry(1, 10, "msg", 0));
        assert!(path.exists());

        history.clear_chat_history(-5);
        assert!(!path.exists());
        assert!(history.recent_messages(-5).is_empty());
    }

    #[test]
    fn full_history_still_saves_every_tenth_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 10, 24).expect("open");
        let path = dir.path().join("chat_-5.json");

        for id in 1..=10 {
            history.add_entry(-5, entry(1, id, "msg", 0));
        }
        assert!(path.exists());
        fs::remove_file(&path).expect("remove");

        for id in 11..=19 {
            history.add_entry(-5, entry(1, id, "msg", 0));
            assert!(!path.exists(), "message {} rewrote a full history", id);
        }
        history.add_entry(-5, entry(1, 20, "msg", 0));
        assert!(path.exists());
    }

    #[test]
    fn cleanup_only_removes_files_of_emptied_chats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
        history.add_entry(-1, entry(1, 1, "old", 30));
        history.add_entry(-1, entry(1, 2, "fresh", 1));

        assert_eq!(history.cleanup_expired(), 1);
        assert!(!dir.path().join("chat_-1.json").exists());
        assert_eq!(history.recent_messages(-1).len(), 1);
    }

    #[test]
    fn unrelated_files_are_ignored_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "hello").expect("write");
        fs::write(dir.path().join("chat_abc.json"), "{}").expect("write");

        let history = MessageHistory::open(dir.path(), 100, 24).expect("open");
        assert!(history.all_chat_ids().is_empty());
    }
}
