use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;

use super::{Broadcaster, MessageKind, NoticeLevel, StoredMessage};

/// Prints delivered records to stdout as a chat transcript, stamped with the
/// time elapsed since the broadcaster was created.
#[derive(Debug)]
pub struct ConsoleBroadcaster {
    started: Instant,
    show_typing: bool,
}

impl ConsoleBroadcaster {
    pub fn new(show_typing: bool) -> Self {
        Self {
            started: Instant::now(),
            show_typing,
        }
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

impl Default for ConsoleBroadcaster {
    fn default() -> Self {
        Self::new(true)
    }
}

pub fn format_record(message: &StoredMessage) -> Option<String> {
    let who = message.sender_id.as_str();
    match message.kind {
        MessageKind::Text => Some(format!("{who}: {}", message.content)),
        MessageKind::Image => Some(format!("{who}: [sticker {}]", message.content)),
        MessageKind::Typing => match message.is_typing {
            Some(true) => Some(format!("{who} is typing...")),
            _ => None,
        },
        MessageKind::Recall => Some(format!(
            "{} recalled a message",
            message
                .metadata
                .extra
                .get("original_sender")
                .and_then(|v| v.as_str())
                .unwrap_or(who)
        )),
        MessageKind::Emotion => Some(format!("({who} feels {})", message.content)),
        MessageKind::System => Some(format!("* {}", message.content)),
    }
}

#[async_trait]
impl Broadcaster for ConsoleBroadcaster {
    async fn broadcast(&self, _conversation_id: &str, message: &StoredMessage) -> Result<()> {
        if message.kind == MessageKind::Typing && !self.show_typing {
            return Ok(());
        }
        if let Some(line) = format_record(message) {
            println!("[{:>7.2}s] {line}", self.elapsed());
        }
        Ok(())
    }

    async fn notify(&self, _conversation_id: &str, level: NoticeLevel, text: &str) -> Result<()> {
        println!("[{:>7.2}s] ({}) {text}", self.elapsed(), level.as_str());
        Ok(())
    }
}
