use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{Broadcaster, MessageKind, MessageStore, NoticeLevel, StoredMessage};
use crate::model::ActionMetadata;

pub const SYSTEM_SENDER: &str = "system";

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn short_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

#[derive(Debug, Default)]
struct StoreState {
    messages: Vec<StoredMessage>,
    by_id: HashMap<String, usize>,
    typing: HashMap<(String, String), bool>,
    last_timestamp: f64,
}

impl StoreState {
    /// Wall-clock time, never earlier than the previous record.
    fn next_timestamp(&mut self) -> f64 {
        let ts = unix_now().max(self.last_timestamp);
        self.last_timestamp = ts;
        ts
    }

    fn push(&mut self, message: StoredMessage) {
        self.by_id.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
    }
}

/// Process-local message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every record of a conversation in insertion order, recall records included.
    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Text and image messages still visible to a viewer.
    pub fn visible_messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.messages(conversation_id)
            .into_iter()
            .filter(|m| matches!(m.kind, MessageKind::Text | MessageKind::Image) && !m.is_recalled)
            .collect()
    }

    pub fn typing_state(&self, conversation_id: &str, sender_id: &str) -> Option<bool> {
        self.lock()
            .typing
            .get(&(conversation_id.to_string(), sender_id.to_string()))
            .copied()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
        metadata: &ActionMetadata,
        message_id: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        let mut state = self.lock();
        let id = match message_id {
            Some(id) if state.by_id.contains_key(id) => bail!("duplicate message id {id}"),
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let message = StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            content: content.to_string(),
            timestamp: state.next_timestamp(),
            is_recalled: false,
            is_typing: None,
            target_id: None,
            metadata: metadata.clone(),
        };
        state.push(message.clone());
        Ok(vec![message])
    }

    async fn persist_typing_state(
        &self,
        conversation_id: &str,
        sender_id: &str,
        is_typing: bool,
    ) -> Result<StoredMessage> {
        let mut state = self.lock();
        state.typing.insert(
            (conversation_id.to_string(), sender_id.to_string()),
            is_typing,
        );
        Ok(StoredMessage {
            id: short_id("typing"),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            kind: MessageKind::Typing,
            content: String::new(),
            timestamp: state.next_timestamp(),
            is_recalled: false,
            is_typing: Some(is_typing),
            target_id: None,
            metadata: ActionMetadata::default(),
        })
    }

    async fn recall(
        &self,
        conversation_id: &str,
        message_id: &str,
        original_timestamp: f64,
        recalled_by: &str,
    ) -> Result<Option<StoredMessage>> {
        let mut state = self.lock();
        let Some(&index) = state.by_id.get(message_id) else {
            debug!(message_id, "recall target not found");
            return Ok(None);
        };
        let target = &mut state.messages[index];
        if target.is_recalled || target.conversation_id != conversation_id {
            return Ok(None);
        }
        target.is_recalled = true;
        let original_sender = target.sender_id.clone();

        let mut metadata = ActionMetadata {
            target_timestamp: Some(original_timestamp),
            ..Default::default()
        };
        metadata
            .extra
            .insert("recalled_by".into(), Value::from(recalled_by));
        metadata
            .extra
            .insert("original_sender".into(), Value::from(original_sender));

        let record = StoredMessage {
            id: short_id("recall"),
            conversation_id: conversation_id.to_string(),
            sender_id: SYSTEM_SENDER.to_string(),
            kind: MessageKind::Recall,
            content: String::new(),
            timestamp: state.next_timestamp(),
            is_recalled: false,
            is_typing: None,
            target_id: Some(message_id.to_string()),
            metadata,
        };
        state.push(record.clone());
        Ok(Some(record))
    }

    async fn lookup_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let state = self.lock();
        Ok(state
            .by_id
            .get(message_id)
            .map(|&index| state.messages[index].clone()))
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self.messages(conversation_id))
    }
}

/// What subscribers of a conversation receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Message { message: StoredMessage },
    Notice { level: NoticeLevel, text: String },
}

/// Per-conversation fan-out. Conversations are created on first subscribe
/// and dropped with [`ChannelHub::remove`].
#[derive(Debug)]
pub struct ChannelHub {
    channels: Mutex<HashMap<String, broadcast::Sender<ChatEvent>>>,
    capacity: usize,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ChatEvent>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<ChatEvent> {
        self.lock()
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Close a conversation's channel; its receivers observe `Closed`.
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.lock().remove(conversation_id).is_some()
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.lock()
            .get(conversation_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of receivers reached. Zero when nobody listens.
    pub fn publish(&self, conversation_id: &str, event: ChatEvent) -> usize {
        let channels = self.lock();
        let Some(tx) = channels.get(conversation_id) else {
            return 0;
        };
        tx.send(event).unwrap_or(0)
    }
}

#[async_trait]
impl Broadcaster for ChannelHub {
    async fn broadcast(&self, conversation_id: &str, message: &StoredMessage) -> Result<()> {
        let reached = self.publish(
            conversation_id,
            ChatEvent::Message {
                message: message.clone(),
            },
        );
        debug!(conversation_id, id = %message.id, reached, "event broadcast");
        Ok(())
    }

    async fn notify(&self, conversation_id: &str, level: NoticeLevel, text: &str) -> Result<()> {
        self.publish(
            conversation_id,
            ChatEvent::Notice {
                level,
                text: text.to_string(),
            },
        );
        Ok(())
    }
}
