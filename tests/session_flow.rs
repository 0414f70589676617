use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

use chatpace::config::EngineConfig;
use chatpace::emotion::{EmotionMap, Mood};
use chatpace::llm::{parse_structured_reply, ChatTurn, ReplySource, Role, StructuredReply};
use chatpace::model::ActionMetadata;
use chatpace::playback::backends::memory::{ChannelHub, ChatEvent, MemoryStore};
use chatpace::playback::backends::{MessageKind, MessageStore, NoticeLevel};
use chatpace::playback::RunState;
use chatpace::session::{ChatSession, ReplyOutcome, SkipReason, ASSISTANT_SENDER};
use chatpace::BehaviorCoordinator;

/// Replays canned model outputs in order. `Err` entries simulate a failed
/// request.
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<ChatTurn>>>,
}

impl Scripted {
    fn new(replies: impl IntoIterator<Item = Result<&'static str, &'static str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            seen: Mutex::default(),
        })
    }
}

#[async_trait]
impl ReplySource for Scripted {
    async fn fetch_reply(&self, history: &[ChatTurn]) -> Result<StructuredReply> {
        self.seen.lock().unwrap().push(history.to_vec());
        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))?;
        match next {
            Ok(raw) => Ok(parse_structured_reply(&raw)?),
            Err(msg) => Err(anyhow!(msg)),
        }
    }
}

struct Harness {
    session: ChatSession,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<ChatEvent>,
    source: Arc<Scripted>,
}

fn harness(source: Arc<Scripted>) -> Harness {
    let mut config = EngineConfig::default();
    config.behavior.enable_typo = false;
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(ChannelHub::default());
    let events = hub.subscribe("conv");
    let session = ChatSession::new(
        "conv",
        Arc::new(BehaviorCoordinator::new(&config)),
        source.clone(),
        store.clone(),
        hub,
    )
    .with_seed(7);
    session.start();
    Harness {
        session,
        store,
        events,
        source,
    }
}

fn notices(rx: &mut broadcast::Receiver<ChatEvent>) -> Vec<NoticeLevel> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::Notice { level, .. } = event {
            out.push(level);
        }
    }
    out
}

fn mood_of(outcome: &ReplyOutcome) -> Mood {
    match outcome {
        ReplyOutcome::Scheduled(timeline) => timeline.mood,
        other => panic!("expected a scheduled reply, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn reply_is_played_into_the_conversation() {
    let mut h = harness(Scripted::new([Ok(
        r#"{"emotion": {"happy": "high"}, "reply": "好的"}"#,
    )]));

    let outcome = h.session.submit_user_message("在吗").await.unwrap();
    assert_eq!(mood_of(&outcome), Mood::Happy);
    assert_eq!(h.session.active_runs().await, 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.session.active_runs().await, 0);

    let texts: Vec<(String, String)> = h
        .store
        .visible_messages("conv")
        .into_iter()
        .map(|m| (m.sender_id, m.content))
        .collect();
    assert_eq!(
        texts,
        vec![
            ("user".to_string(), "在吗".to_string()),
            (ASSISTANT_SENDER.to_string(), "好的".to_string()),
        ]
    );

    let emotion = h
        .store
        .messages("conv")
        .into_iter()
        .find(|m| m.kind == MessageKind::Emotion)
        .expect("emotion snapshot stored");
    assert_eq!(emotion.content, "happy=high");
    assert_eq!(
        h.session.last_emotions(),
        Some(EmotionMap::normalize([("happy", "high")]))
    );

    let seen = h.source.seen.lock().unwrap().clone();
    assert_eq!(seen[0], vec![ChatTurn::user("在吗")]);
    assert!(notices(&mut h.events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_json_is_reported_not_answered() {
    let mut h = harness(Scripted::new([Ok("sure, here you go")]));

    let outcome = h.session.submit_user_message("你好").await.unwrap();

    assert!(matches!(
        outcome,
        ReplyOutcome::Skipped(SkipReason::InvalidJson)
    ));
    assert_eq!(notices(&mut h.events), vec![NoticeLevel::Warning]);
    assert_eq!(h.session.active_runs().await, 0);
    assert_eq!(h.store.visible_messages("conv").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_reply_and_failed_request_are_reported() {
    let mut h = harness(Scripted::new([
        Ok(r#"{"emotion": {"sad": "low"}, "reply": "  "}"#),
        Err("connection refused"),
    ]));

    let outcome = h.session.process_user_message().await;
    assert!(matches!(
        outcome,
        ReplyOutcome::Skipped(SkipReason::EmptyContent)
    ));
    let outcome = h.session.process_user_message().await;
    assert!(matches!(
        outcome,
        ReplyOutcome::Skipped(SkipReason::RequestFailed)
    ));

    assert_eq!(
        notices(&mut h.events),
        vec![NoticeLevel::Warning, NoticeLevel::Error]
    );
    assert_eq!(h.session.last_emotions(), None);
}

#[tokio::test(start_paused = true)]
async fn missing_emotions_reuse_the_last_state() {
    let h = harness(Scripted::new([
        Ok(r#"{"reply": "嗯"}"#),
        Ok(r#"{"emotion": {"sad": "high"}, "reply": "唉"}"#),
        Ok(r#"{"emotion": {"unknown": "high", "happy": "huge"}, "reply": "算了"}"#),
    ]));

    assert_eq!(mood_of(&h.session.process_user_message().await), Mood::Neutral);
    assert_eq!(h.session.last_emotions(), None);

    assert_eq!(mood_of(&h.session.process_user_message().await), Mood::Sad);
    assert_eq!(mood_of(&h.session.process_user_message().await), Mood::Sad);
    assert_eq!(
        h.session.last_emotions(),
        Some(EmotionMap::normalize([("sad", "high")]))
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_runs() {
    let h = harness(Scripted::new([Ok(
        r#"{"emotion": {"tired": "medium"}, "reply": "我先睡了，明天再说吧"}"#,
    )]));

    let outcome = h.session.process_user_message().await;
    assert!(matches!(outcome, ReplyOutcome::Scheduled(_)));

    let reports = h.session.stop().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, RunState::Cancelled);
    assert!(!h.session.is_running());

    assert!(matches!(
        h.session.process_user_message().await,
        ReplyOutcome::Skipped(SkipReason::NotRunning)
    ));
    let assistant_texts = h
        .store
        .visible_messages("conv")
        .into_iter()
        .filter(|m| m.sender_id == ASSISTANT_SENDER)
        .count();
    assert_eq!(assistant_texts, 0);
}

#[tokio::test(start_paused = true)]
async fn recalled_messages_are_flagged_in_the_next_prompt() {
    let h = harness(Scripted::new([Ok(r#"{"reply": "好"}"#)]));
    let store = h.store.clone();

    let sent = store
        .persist_message(
            "conv",
            ASSISTANT_SENDER,
            MessageKind::Text,
            "制做",
            &ActionMetadata::default(),
            Some("typo"),
        )
        .await
        .unwrap();
    store
        .recall("conv", "typo", sent[0].timestamp, ASSISTANT_SENDER)
        .await
        .unwrap();

    h.session.submit_user_message("什么").await.unwrap();

    let seen = h.source.seen.lock().unwrap().clone();
    let roles: Vec<Role> = seen[0].iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::Assistant, Role::System, Role::User]);
    assert_eq!(seen[0][0].content, "制做");
}

/// Answers after a fixed delay, like a slow model endpoint.
struct Slow(Duration);

#[async_trait]
impl ReplySource for Slow {
    async fn fetch_reply(&self, _history: &[ChatTurn]) -> Result<StructuredReply> {
        tokio::time::sleep(self.0).await;
        Ok(parse_structured_reply(
            r#"{"emotion": {"happy": "low"}, "reply": "好的"}"#,
        )?)
    }
}

#[tokio::test(start_paused = true)]
async fn stop_during_fetch_drops_the_reply() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(ChatSession::new(
        "conv",
        Arc::new(BehaviorCoordinator::new(&EngineConfig::default())),
        Arc::new(Slow(Duration::from_secs(5))),
        store.clone(),
        Arc::new(ChannelHub::default()),
    ));
    session.start();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.process_user_message().await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let reports = session.stop().await;
    assert!(reports.is_empty());

    let outcome = pending.await.unwrap();
    assert!(matches!(
        outcome,
        ReplyOutcome::Skipped(SkipReason::NotRunning)
    ));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(session.active_runs().await, 0);
    let delivered: Vec<String> = store
        .visible_messages("conv")
        .into_iter()
        .filter(|m| m.sender_id == ASSISTANT_SENDER)
        .map(|m| m.content)
        .collect();
    assert!(delivered.is_empty(), "{delivered:?}");
}
