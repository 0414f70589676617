pub mod backends;
mod registry;
mod util;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PlaybackError;
use crate::model::{ActionKind, PlaybackAction};
use crate::trace::timeline_console_trace;
use backends::{Broadcaster, MessageKind, MessageStore, StoredMessage};
use util::print_trace_line;

pub use registry::RunRegistry;

/// Offsets beyond this are clamped so a corrupt timestamp cannot overflow the clock.
const MAX_OFFSET_SECS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub conversation_id: String,
    pub state: RunState,
    pub executed: usize,
    /// Corrections whose typo was never recalled, and recalls the store refused.
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            state: RunState::Running,
            executed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

enum Step {
    Executed,
    Skipped,
}

#[derive(Debug, Default)]
struct RunTracker {
    /// Planned message id -> (stored id, stored timestamp).
    sent: HashMap<String, (String, f64)>,
    /// Planned ids whose recall went through.
    recalled: HashSet<String>,
}

impl RunTracker {
    fn record_sent(&mut self, planned: Option<&str>, stored: &StoredMessage) {
        let entry = (stored.id.clone(), stored.timestamp);
        if let Some(planned) = planned {
            self.sent.insert(planned.to_string(), entry.clone());
        }
        self.sent.insert(stored.id.clone(), entry);
    }

    fn correction_allowed(&self, action: &PlaybackAction) -> bool {
        action
            .metadata
            .correction_for
            .as_deref()
            .is_some_and(|target| self.recalled.contains(target))
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    sender_id: String,
    trace: bool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("sender_id", &self.sender_id)
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<dyn Broadcaster>,
        sender_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            sender_id: sender_id.into(),
            trace: false,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    /// Start a run on its own task and return a handle that can cancel it.
    pub fn run_timeline(
        &self,
        actions: Vec<PlaybackAction>,
        conversation_id: impl Into<String>,
    ) -> PlaybackHandle {
        let conversation_id = conversation_id.into();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);

        let scheduler = self.clone();
        let token = cancel.clone();
        let conv = conversation_id.clone();
        let task = tokio::spawn(async move {
            state_tx.send_replace(RunState::Running);
            let report = scheduler.run(&actions, &conv, &token).await;
            state_tx.send_replace(report.state);
            report
        });

        PlaybackHandle {
            conversation_id,
            cancel,
            state: state_rx,
            task,
        }
    }

    pub async fn run(
        &self,
        actions: &[PlaybackAction],
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> RunReport {
        let origin = Instant::now();
        let mut tracker = RunTracker::default();
        let mut report = RunReport::new(conversation_id);

        let trace_events = self.trace.then(|| timeline_console_trace(actions));
        let mut next_trace = 0usize;

        info!(conversation_id, actions = actions.len(), "timeline run started");

        for (index, action) in actions.iter().enumerate() {
            let due = origin + offset(action.timestamp);
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    report.state = RunState::Cancelled;
                    info!(
                        conversation_id,
                        executed = report.executed,
                        remaining = actions.len() - index,
                        "timeline run cancelled"
                    );
                    return report;
                }
                () = tokio::time::sleep_until(due) => {}
            }

            if let Some(events) = &trace_events {
                while let Some(event) = events.get(next_trace) {
                    if event.action_index > index {
                        break;
                    }
                    print_trace_line(&event.line);
                    next_trace += 1;
                }
            }

            match self.execute(action, conversation_id, &mut tracker).await {
                Ok(Step::Executed) => report.executed += 1,
                Ok(Step::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        conversation_id,
                        index,
                        kind = action.kind.as_str(),
                        "action failed: {:#}",
                        anyhow::Error::from(err)
                    );
                }
            }
        }

        report.state = RunState::Completed;
        info!(
            conversation_id,
            executed = report.executed,
            skipped = report.skipped,
            failed = report.failed,
            "timeline run completed"
        );
        report
    }

    async fn execute(
        &self,
        action: &PlaybackAction,
        conversation_id: &str,
        tracker: &mut RunTracker,
    ) -> Result<Step, PlaybackError> {
        let backend = |err: anyhow::Error| PlaybackError::backend(action.kind, err);

        match action.kind {
            ActionKind::TypingStart | ActionKind::TypingEnd => {
                let is_typing = action.kind == ActionKind::TypingStart;
                let record = self
                    .store
                    .persist_typing_state(conversation_id, &self.sender_id, is_typing)
                    .await
                    .map_err(backend)?;
                self.broadcaster
                    .broadcast(conversation_id, &record)
                    .await
                    .map_err(backend)?;
                Ok(Step::Executed)
            }
            ActionKind::Send | ActionKind::Image => {
                if action.metadata.is_correction && !tracker.correction_allowed(action) {
                    debug!(
                        conversation_id,
                        correction_for = action.metadata.correction_for.as_deref(),
                        "typo was not recalled, correction suppressed"
                    );
                    return Ok(Step::Skipped);
                }

                let content = action
                    .text
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(PlaybackError::MissingPayload {
                        kind: action.kind.as_str(),
                    })?;
                let kind = if action.kind == ActionKind::Send {
                    MessageKind::Text
                } else {
                    MessageKind::Image
                };

                let records = self
                    .store
                    .persist_message(
                        conversation_id,
                        &self.sender_id,
                        kind,
                        content,
                        &action.metadata,
                        action.message_id.as_deref(),
                    )
                    .await
                    .map_err(backend)?;
                let last = records
                    .last()
                    .ok_or_else(|| backend(anyhow!("store returned no records")))?;
                tracker.record_sent(action.message_id.as_deref(), last);

                for record in &records {
                    self.broadcaster
                        .broadcast(conversation_id, record)
                        .await
                        .map_err(backend)?;
                }
                Ok(Step::Executed)
            }
            ActionKind::Recall => {
                let target = action
                    .target_id
                    .as_deref()
                    .ok_or(PlaybackError::MissingTarget { kind: "recall" })?;
                let tracked = tracker.sent.get(target).cloned();
                let stored_id = tracked
                    .as_ref()
                    .map(|(id, _)| id.clone())
                    .unwrap_or_else(|| target.to_string());

                let original_ts = match (action.metadata.target_timestamp, tracked) {
                    (Some(ts), _) => ts,
                    (None, Some((_, ts))) => ts,
                    (None, None) => self
                        .store
                        .lookup_message(&stored_id)
                        .await
                        .map_err(backend)?
                        .map(|m| m.timestamp)
                        .unwrap_or(0.0),
                };

                let Some(record) = self
                    .store
                    .recall(conversation_id, &stored_id, original_ts, &self.sender_id)
                    .await
                    .map_err(backend)?
                else {
                    warn!(conversation_id, target, "recall target unavailable");
                    return Ok(Step::Skipped);
                };
                tracker.recalled.insert(target.to_string());
                self.broadcaster
                    .broadcast(conversation_id, &record)
                    .await
                    .map_err(backend)?;
                Ok(Step::Executed)
            }
            ActionKind::Wait | ActionKind::Pause => Ok(Step::Executed),
        }
    }
}

fn offset(timestamp: f64) -> Duration {
    if !timestamp.is_finite() || timestamp <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(timestamp.min(MAX_OFFSET_SECS))
}

#[derive(Debug)]
pub struct PlaybackHandle {
    conversation_id: String,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunReport>,
}

impl PlaybackHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Stop at the next sleep point. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<RunReport> {
        self.task
            .await
            .map_err(|err| anyhow!("scheduler task for {} failed: {err}", self.conversation_id))
    }
}
