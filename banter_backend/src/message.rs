use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl ChatUser {
    /// Name used in transcripts: first name, then username, then "User".
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.username.as_deref().filter(|name| !name.is_empty()))
            .unwrap_or("User")
    }
}

/// Transport-neutral view of an incoming chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub chat_id: i64,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub sender: Option<ChatUser>,
    #[serde(default)]
    pub text: String,
    /// Author of the message this one replies to, if any.
    #[serde(default)]
    pub reply_to_user_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|sender| sender.id)
    }

    pub fn is_command(&self) -> bool {
        self.text.starts_with('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_through_username() {
        let mut user = ChatUser {
            id: 1,
            username: Some("neo".to_string()),
            first_name: Some(String::new()),
            last_name: None,
        };
        assert_eq!(user.display_name(), "neo");

        user.username = None;
        assert_eq!(user.display_name(), "User");

        user.first_name = Some("Thomas".to_string());
        assert_eq!(user.display_name(), "Thomas");
    }
}
