//! Telegram long-polling bridge.
//!
//! Polls `getUpdates` for group messages and reaction updates, feeds them to
//! the bot runtime, and delivers the runtime's output through the Bot API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use banter_backend::http_client::build_http_client_with_timeout;
use banter_backend::message::{ChatMessage, ChatUser};
use banter_backend::runtime::BotRuntime;
use banter_backend::transport::MessageTransport;

const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_MESSAGE_CHARS: usize = 4096;

// ─── Telegram API types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
    message_reaction: Option<MessageReactionUpdated>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
    caption: Option<String>,
    date: i64,
    reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct MessageReactionUpdated {
    chat: TelegramChat,
    message_id: i64,
    user: Option<TelegramUser>,
    #[serde(default)]
    old_reaction: Vec<ReactionType>,
    #[serde(default)]
    new_reaction: Vec<ReactionType>,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReactionType {
    Emoji { emoji: String },
    #[serde(other)]
    Other,
}

impl TelegramUser {
    fn into_chat_user(self) -> ChatUser {
        ChatUser {
            id: self.id,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
        }
    }
}

impl TelegramMessage {
    fn into_chat_message(self) -> ChatMessage {
        let reply_to_user_id = self
            .reply_to_message
            .as_ref()
            .and_then(|reply| reply.from.as_ref())
            .map(|user| user.id);

        ChatMessage {
            message_id: self.message_id,
            chat_id: self.chat.id,
            is_private: self.chat.kind == "private",
            sender: self.from.map(TelegramUser::into_chat_user),
            text: self.text.or(self.caption).unwrap_or_default(),
            reply_to_user_id,
            timestamp: Utc
                .timestamp_opt(self.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Emoji present in `new` but not in `old`; custom emoji are ignored.
fn added_emoji(old: &[ReactionType], new: &[ReactionType]) -> Vec<String> {
    new.iter()
        .filter(|reaction| !old.contains(reaction))
        .filter_map(|reaction| match reaction {
            ReactionType::Emoji { emoji } => Some(emoji.clone()),
            ReactionType::Other => None,
        })
        .collect()
}

impl MessageReactionUpdated {
    /// Reacting user and their newly added emoji; private chats and anonymous
    /// reactions yield nothing.
    fn added_by_user(&self) -> Option<(i64, Vec<String>)> {
        if self.chat.kind == "private" {
            return None;
        }
        let user = self.user.as_ref()?;
        Some((user.id, added_emoji(&self.old_reaction, &self.new_reaction)))
    }
}

fn truncate_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

// ─── Bridge ──────────────────────────────────────────────────────────────────

pub struct TelegramBridge {
    api_base: String,
    client: reqwest::Client,
}

impl TelegramBridge {
    pub fn new(token: &str) -> Self {
        Self {
            api_base: format!("https://api.telegram.org/bot{}", token.trim()),
            client: build_http_client_with_timeout(Some(Duration::from_secs(
                POLL_TIMEOUT_SECS * 2,
            ))),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T> {
        let url = format!("{}/{}", self.api_base, method);
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let body: TelegramResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram {} returned ok=false: {}",
                method,
                body.description.unwrap_or_default()
            );
        }
        body.result
            .ok_or_else(|| anyhow::anyhow!("Telegram {} returned no result", method))
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", serde_json::json!({})).await
    }

    async fn poll_updates(&self, offset: i64) -> Option<Vec<Update>> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "message_reaction"]
        });

        match self.call("getUpdates", params).await {
            Ok(updates) => Some(updates),
            Err(e) => {
                tracing::warn!("Telegram getUpdates error: {:#}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                None
            }
        }
    }

    /// Long-poll forever, routing every update into the runtime.
    pub async fn run(&self, runtime: Arc<BotRuntime>) {
        let mut offset: i64 = 0;
        tracing::info!("Telegram polling started");

        loop {
            let Some(updates) = self.poll_updates(offset).await else {
                continue;
            };

            for update in updates {
                offset = update.update_id + 1;

                if let Some(message) = update.message {
                    let message = message.into_chat_message();
                    tracing::debug!(
                        "Telegram [chat {}] message {} from {:?}",
                        message.chat_id,
                        message.message_id,
                        message.sender_id()
                    );
                    runtime.handle_message(&message).await;
                }

                if let Some(reaction) = update.message_reaction {
                    let Some((user_id, added)) = reaction.added_by_user() else {
                        continue;
                    };
                    for emoji in added {
                        runtime.track_reaction(reaction.chat.id, user_id, reaction.message_id, &emoji);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageTransport for TelegramBridge {
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let mut payload = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate_message(text),
        });
        if let Some(message_id) = reply_to {
            payload["reply_parameters"] = serde_json::json!({
                "message_id": message_id,
                "allow_sending_without_reply": true
            });
        }

        let _: serde_json::Value = self.call("sendMessage", payload).await?;
        tracing::debug!("Telegram: sent message to chat {}", chat_id);
        Ok(())
    }

    async fn set_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": [{ "type": "emoji", "emoji": emoji }]
        });

        let _: bool = self.call("setMessageReaction", payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_group_message_with_reply_and_caption() {
        let raw = r#"{
            "message_id": 42,
            "chat": {"id": -100, "type": "supergroup"},
            "from": {"id": 7, "is_bot": false, "first_name": "Ann", "username": "ann"},
            "caption": "look at this",
            "date": 1700000000,
            "reply_to_message": {
                "message_id": 41,
                "chat": {"id": -100, "type": "supergroup"},
                "from": {"id": 999, "is_bot": true, "first_name": "Bot"},
                "date": 1699999990
            }
        }"#;
        let message: TelegramMessage = serde_json::from_str(raw).expect("message");
        let message = message.into_chat_message();

        assert_eq!(message.chat_id, -100);
        assert!(!message.is_private);
        assert_eq!(message.text, "look at this");
        assert_eq!(message.reply_to_user_id, Some(999));
        assert_eq!(message.sender_id(), Some(7));
        assert_eq!(message.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn only_newly_added_plain_emoji_are_reported() {
        let raw = r#"{
            "chat": {"id": -100, "type": "group"},
            "message_id": 5,
            "user": {"id": 7, "first_name": "Ann"},
            "old_reaction": [{"type": "emoji", "emoji": "👍"}],
            "new_reaction": [
                {"type": "emoji", "emoji": "👍"},
                {"type": "emoji", "emoji": "🔥"},
                {"type": "custom_emoji", "custom_emoji_id": "123"}
            ]
        }"#;
        let update: MessageReactionUpdated = serde_json::from_str(raw).expect("reaction");
        assert_eq!(
            added_emoji(&update.old_reaction, &update.new_reaction),
            vec!["🔥".to_string()]
        );
        assert_eq!(update.added_by_user(), Some((7, vec!["🔥".to_string()])));
    }

    #[test]
    fn private_and_anonymous_reactions_are_skipped() {
        let private = r#"{
            "chat": {"id": 7, "type": "private"},
            "message_id": 5,
            "user": {"id": 7, "first_name": "Ann"},
            "new_reaction": [{"type": "emoji", "emoji": "👍"}]
        }"#;
        let update: MessageReactionUpdated = serde_json::from_str(private).expect("reaction");
        assert!(update.added_by_user().is_none());

        let anonymous = r#"{
            "chat": {"id": -100, "type": "supergroup"},
            "message_id": 5,
            "new_reaction": [{"type": "emoji", "emoji": "👍"}]
        }"#;
        let update: MessageReactionUpdated = serde_json::from_str(anonymous).expect("reaction");
        assert!(update.added_by_user().is_none());
    }

    #[test]
    fn long_messages_are_cut_on_char_boundary() {
        let text = "ж".repeat(MAX_MESSAGE_CHARS + 10);
        assert_eq!(truncate_message(&text).chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(truncate_message("short"), "short");
    }
}
