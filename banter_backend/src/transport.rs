use anyhow::Result;
use async_trait::async_trait;

/// Outbound side of the chat platform. The runtime never polls through it.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()>;

    async fn set_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<()>;
}
