pub mod console;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ActionMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Typing,
    Recall,
    /// Emotion state snapshot of the assistant; content is `label=intensity` pairs.
    Emotion,
    System,
}

/// A record as the store kept it. `timestamp` is Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: f64,
    #[serde(default)]
    pub is_recalled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
    /// For recall records, the message that was retracted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        }
    }
}

/// Message persistence. Implementations must be safe to share across
/// concurrently running conversations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message and return what was actually stored, true timestamp
    /// and final id included. `message_id` is a requested id the store may
    /// honour.
    async fn persist_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
        metadata: &ActionMetadata,
        message_id: Option<&str>,
    ) -> Result<Vec<StoredMessage>>;

    async fn persist_typing_state(
        &self,
        conversation_id: &str,
        sender_id: &str,
        is_typing: bool,
    ) -> Result<StoredMessage>;

    /// `Ok(None)` when the target cannot be recalled (unknown or already
    /// recalled).
    async fn recall(
        &self,
        conversation_id: &str,
        message_id: &str,
        original_timestamp: f64,
        recalled_by: &str,
    ) -> Result<Option<StoredMessage>>;

    async fn lookup_message(&self, message_id: &str) -> Result<Option<StoredMessage>>;

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, conversation_id: &str, message: &StoredMessage) -> Result<()>;

    async fn notify(&self, conversation_id: &str, level: NoticeLevel, text: &str) -> Result<()>;
}
