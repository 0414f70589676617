use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::coordinator::BehaviorCoordinator;
use crate::emotion::EmotionMap;
use crate::error::ReplyError;
use crate::llm::{ChatTurn, ReplySource, Role};
use crate::model::{ActionKind, ActionMetadata, Timeline};
use crate::playback::backends::{
    Broadcaster, MessageKind, MessageStore, NoticeLevel, StoredMessage,
};
use crate::playback::{RunRegistry, RunReport, Scheduler};

pub const USER_SENDER: &str = "user";
pub const ASSISTANT_SENDER: &str = "assistant";

const SUMMARY_PREVIEW_CHARS: usize = 30;
const RECALLED_NOTICE: &str = "System notice: the previous message was recalled.";

/// Why a user message produced no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRunning,
    InvalidJson,
    EmptyContent,
    RequestFailed,
}

#[derive(Debug, Clone)]
pub enum ReplyOutcome {
    Scheduled(Timeline),
    Skipped(SkipReason),
}

pub struct ChatSession {
    conversation_id: String,
    coordinator: Arc<BehaviorCoordinator>,
    source: Arc<dyn ReplySource>,
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    scheduler: Scheduler,
    runs: AsyncMutex<RunRegistry>,
    running: AtomicBool,
    last_emotions: Mutex<Option<EmotionMap>>,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("conversation_id", &self.conversation_id)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    pub fn new(
        conversation_id: impl Into<String>,
        coordinator: Arc<BehaviorCoordinator>,
        source: Arc<dyn ReplySource>,
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let scheduler = Scheduler::new(store.clone(), broadcaster.clone(), ASSISTANT_SENDER);
        Self {
            conversation_id: conversation_id.into(),
            coordinator,
            source,
            store,
            broadcaster,
            scheduler,
            runs: AsyncMutex::new(RunRegistry::new()),
            running: AtomicBool::new(false),
            last_emotions: Mutex::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn with_trace(self, trace: bool) -> Self {
        Self {
            scheduler: self.scheduler.clone().with_trace(trace),
            ..self
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_emotions(&self) -> Option<EmotionMap> {
        self.last_emotions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(conversation_id = %self.conversation_id, "session started");
    }

    /// Stop accepting messages, cancel every in-flight run and wait for them.
    pub async fn stop(&self) -> Vec<RunReport> {
        let mut runs = self.runs.lock().await;
        self.running.store(false, Ordering::SeqCst);
        let reports = runs.cancel_all().await;
        drop(runs);
        info!(
            conversation_id = %self.conversation_id,
            cancelled = reports.len(),
            "session stopped"
        );
        reports
    }

    /// Number of runs still in flight.
    pub async fn active_runs(&self) -> usize {
        let mut runs = self.runs.lock().await;
        runs.prune_finished();
        runs.len()
    }

    /// Store and broadcast a user message, then answer it.
    pub async fn submit_user_message(&self, text: &str) -> Result<ReplyOutcome> {
        let records = self
            .store
            .persist_message(
                &self.conversation_id,
                USER_SENDER,
                MessageKind::Text,
                text,
                &ActionMetadata::default(),
                None,
            )
            .await
            .context("failed to store user message")?;
        for record in &records {
            self.broadcaster
                .broadcast(&self.conversation_id, record)
                .await
                .context("failed to broadcast user message")?;
        }
        Ok(self.process_user_message().await)
    }

    /// Fetch a reply for the current history and schedule it. Failures are
    /// reported to the conversation as notices; no reply is invented.
    pub async fn process_user_message(&self) -> ReplyOutcome {
        if !self.is_running() {
            return ReplyOutcome::Skipped(SkipReason::NotRunning);
        }

        let reply = match self.fetch_reply().await {
            Ok(reply) => reply,
            Err(err) => return self.report_fetch_failure(err).await,
        };

        let emotions = self.resolve_emotions(&reply.emotions).await;

        let timeline = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.coordinator.plan(&reply.reply, &emotions, &mut *rng)
        };

        info!(
            conversation_id = %self.conversation_id,
            total = timeline.actions.len(),
            reply = %reply.reply,
            actions = %summarize(&timeline),
            "timeline generated"
        );
        debug!(
            conversation_id = %self.conversation_id,
            timeline = %serde_json::to_string(&timeline).unwrap_or_default(),
            "timeline full"
        );

        // The fetch may have outlived a stop(); checked under the runs lock so
        // a concurrent stop either sees this run or prevents it.
        let mut runs = self.runs.lock().await;
        if !self.is_running() {
            info!(conversation_id = %self.conversation_id, "session stopped during fetch, reply dropped");
            return ReplyOutcome::Skipped(SkipReason::NotRunning);
        }
        let handle = self
            .scheduler
            .run_timeline(timeline.actions.clone(), self.conversation_id.clone());
        runs.track(handle);
        drop(runs);

        ReplyOutcome::Scheduled(timeline)
    }

    async fn fetch_reply(&self) -> Result<crate::llm::StructuredReply> {
        let history = self
            .store
            .conversation_messages(&self.conversation_id)
            .await
            .context("failed to load conversation history")?;
        let turns = history_to_turns(&history);
        self.source.fetch_reply(&turns).await
    }

    async fn report_fetch_failure(&self, err: anyhow::Error) -> ReplyOutcome {
        let reply_error = err.chain().find_map(|e| e.downcast_ref::<ReplyError>());
        let (reason, level, text) = match reply_error {
            Some(ReplyError::InvalidJson(_)) => (
                SkipReason::InvalidJson,
                NoticeLevel::Warning,
                "The model returned invalid JSON; this message was not answered.",
            ),
            Some(ReplyError::EmptyContent) => (
                SkipReason::EmptyContent,
                NoticeLevel::Warning,
                "The model returned an empty reply; this message was not answered.",
            ),
            None => (
                SkipReason::RequestFailed,
                NoticeLevel::Error,
                "The model request failed; check the settings and logs.",
            ),
        };

        match level {
            NoticeLevel::Error => {
                error!(conversation_id = %self.conversation_id, "reply request failed: {err:#}")
            }
            _ => {
                warn!(conversation_id = %self.conversation_id, ?reason, "skipping reply: {err:#}")
            }
        }

        if let Err(notify_err) = self
            .broadcaster
            .notify(&self.conversation_id, level, text)
            .await
        {
            warn!(conversation_id = %self.conversation_id, "failed to deliver notice: {notify_err:#}");
        }
        ReplyOutcome::Skipped(reason)
    }

    /// Fresh emotions are remembered and announced; an empty map falls back to
    /// the previous state, then to `{neutral: low}`.
    async fn resolve_emotions(&self, fresh: &EmotionMap) -> EmotionMap {
        if fresh.is_empty() {
            let previous = self.last_emotions();
            return match previous {
                Some(previous) => {
                    debug!(
                        conversation_id = %self.conversation_id,
                        emotions = %previous.describe(),
                        "reusing last emotion state"
                    );
                    previous
                }
                None => {
                    debug!(conversation_id = %self.conversation_id, "no emotion state, using neutral");
                    EmotionMap::neutral()
                }
            };
        }

        *self
            .last_emotions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(fresh.clone());
        info!(
            conversation_id = %self.conversation_id,
            emotions = %fresh.describe(),
            "emotion state updated"
        );

        if let Err(err) = self.announce_emotions(fresh).await {
            warn!(conversation_id = %self.conversation_id, "failed to record emotion state: {err:#}");
        }
        fresh.clone()
    }

    async fn announce_emotions(&self, emotions: &EmotionMap) -> Result<()> {
        let mut metadata = ActionMetadata::default();
        for (emotion, intensity) in emotions.iter() {
            metadata
                .extra
                .insert(emotion.as_str().to_string(), Value::from(intensity.as_str()));
        }
        let records = self
            .store
            .persist_message(
                &self.conversation_id,
                ASSISTANT_SENDER,
                MessageKind::Emotion,
                &emotions.describe(),
                &metadata,
                None,
            )
            .await?;
        for record in &records {
            self.broadcaster
                .broadcast(&self.conversation_id, record)
                .await?;
        }
        Ok(())
    }
}

/// Chat turns the model sees for a stored conversation. Typing and recall
/// records are dropped; a recalled message stays, followed by a notice.
pub fn history_to_turns(history: &[StoredMessage]) -> Vec<ChatTurn> {
    let mut out = Vec::with_capacity(history.len());
    for message in history {
        if matches!(message.kind, MessageKind::Typing | MessageKind::Recall) {
            continue;
        }

        let role = match message.sender_id.as_str() {
            ASSISTANT_SENDER if message.kind != MessageKind::Emotion => Role::Assistant,
            USER_SENDER => Role::User,
            _ => Role::System,
        };
        let content = match message.kind {
            MessageKind::Image => format!("[image]({})", message.content),
            MessageKind::Emotion => format!("Emotion state: {}", message.content),
            _ => message.content.clone(),
        };

        if !content.trim().is_empty() {
            out.push(ChatTurn { role, content });
        }
        if message.is_recalled {
            out.push(ChatTurn {
                role: Role::System,
                content: RECALLED_NOTICE.to_string(),
            });
        }
    }
    out
}

/// `kind@t.tts 'preview'` for every action, comma separated.
pub fn summarize(timeline: &Timeline) -> String {
    timeline
        .actions
        .iter()
        .map(|action| {
            let mut part = format!("{}@{:.2}s", action.kind.as_str(), action.timestamp);
            if action.kind == ActionKind::Send {
                let text = action.text.as_deref().unwrap_or_default();
                let preview: String = text.chars().take(SUMMARY_PREVIEW_CHARS).collect();
                let ellipsis = if text.chars().count() > SUMMARY_PREVIEW_CHARS {
                    "..."
                } else {
                    ""
                };
                part.push_str(&format!(" '{preview}{ellipsis}'"));
            }
            part
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(sender: &str, kind: MessageKind, content: &str) -> StoredMessage {
        StoredMessage {
            id: content.into(),
            conversation_id: "c".into(),
            sender_id: sender.into(),
            kind,
            content: content.into(),
            timestamp: 0.0,
            is_recalled: false,
            is_typing: None,
            target_id: None,
            metadata: ActionMetadata::default(),
        }
    }

    #[test]
    fn history_drops_typing_and_marks_recalls() {
        let mut typo = stored(ASSISTANT_SENDER, MessageKind::Text, "制做");
        typo.is_recalled = true;
        let history = vec![
            stored(USER_SENDER, MessageKind::Text, "在吗"),
            stored(ASSISTANT_SENDER, MessageKind::Typing, ""),
            typo,
            stored("system", MessageKind::Recall, ""),
            stored(ASSISTANT_SENDER, MessageKind::Emotion, "happy=high"),
        ];
        let turns = history_to_turns(&history);
        let roles: Vec<Role> = turns.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::System, Role::System]
        );
        assert_eq!(turns[2].content, RECALLED_NOTICE);
        assert_eq!(turns[3].content, "Emotion state: happy=high");
    }

    #[test]
    fn summary_truncates_send_previews() {
        let timeline = Timeline {
            version: 1,
            mood: Default::default(),
            actions: vec![
                crate::model::PlaybackAction::wait(3.0),
                crate::model::PlaybackAction::send("一".repeat(40), "a").at(3.5),
            ],
            sticker: None,
        };
        let summary = summarize(&timeline);
        assert_eq!(
            summary,
            format!("wait@0.00s, send@3.50s '{}...'", "一".repeat(30))
        );
    }
}
