use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use chatpace::model::{ActionMetadata, PlaybackAction};
use chatpace::playback::backends::memory::{ChannelHub, ChatEvent, MemoryStore};
use chatpace::playback::backends::{MessageKind, MessageStore, StoredMessage};
use chatpace::playback::{RunRegistry, RunState, Scheduler};

fn correction(text: &str, id: &str, target: &str) -> PlaybackAction {
    PlaybackAction::send(text, id).with_metadata(ActionMetadata {
        is_correction: true,
        correction_for: Some(target.into()),
        ..Default::default()
    })
}

fn setup() -> (Arc<MemoryStore>, Arc<ChannelHub>, Scheduler) {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(ChannelHub::default());
    let scheduler = Scheduler::new(store.clone(), hub.clone(), "rin");
    (store, hub, scheduler)
}

fn visible_texts(store: &MemoryStore, conversation_id: &str) -> Vec<String> {
    store
        .visible_messages(conversation_id)
        .into_iter()
        .map(|m| m.content)
        .collect()
}

fn drain_kinds(rx: &mut broadcast::Receiver<ChatEvent>) -> Vec<MessageKind> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ChatEvent::Message { message } = event {
            out.push(message.kind);
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn correction_without_recall_is_suppressed() {
    let (store, _hub, scheduler) = setup();
    let actions = vec![
        PlaybackAction::send("制做", "a"),
        correction("制作", "b", "a").at(2.0),
    ];

    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!((report.executed, report.skipped, report.failed), (1, 1, 0));
    assert_eq!(visible_texts(&store, "c"), vec!["制做".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn recall_then_correction_replaces_the_typo() {
    let (store, hub, scheduler) = setup();
    let mut rx = hub.subscribe("c");
    let actions = vec![
        PlaybackAction::typing_start(),
        PlaybackAction::send("制做", "a").at(1.0),
        PlaybackAction::typing_end().at(1.0),
        PlaybackAction::recall("a").at(3.0),
        PlaybackAction::typing_start().at(4.0),
        correction("制作", "b", "a").at(5.0),
        PlaybackAction::typing_end().at(5.0),
    ];

    let started = tokio::time::Instant::now();
    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!((report.executed, report.skipped, report.failed), (7, 0, 0));
    assert_eq!(visible_texts(&store, "c"), vec!["制作".to_string()]);
    assert_eq!(store.typing_state("c", "rin"), Some(false));

    let recall = store
        .messages("c")
        .into_iter()
        .find(|m| m.kind == MessageKind::Recall)
        .expect("recall record stored");
    assert_eq!(recall.target_id.as_deref(), Some("a"));

    assert_eq!(
        drain_kinds(&mut rx),
        vec![
            MessageKind::Typing,
            MessageKind::Text,
            MessageKind::Typing,
            MessageKind::Recall,
            MessageKind::Typing,
            MessageKind::Text,
            MessageKind::Typing,
        ]
    );
}

/// Ignores requested ids and assigns its own.
#[derive(Default)]
struct OwnIdStore {
    inner: MemoryStore,
}

#[async_trait]
impl MessageStore for OwnIdStore {
    async fn persist_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        kind: MessageKind,
        content: &str,
        metadata: &ActionMetadata,
        _message_id: Option<&str>,
    ) -> Result<Vec<StoredMessage>> {
        self.inner
            .persist_message(conversation_id, sender_id, kind, content, metadata, None)
            .await
    }

    async fn persist_typing_state(
        &self,
        conversation_id: &str,
        sender_id: &str,
        is_typing: bool,
    ) -> Result<StoredMessage> {
        self.inner
            .persist_typing_state(conversation_id, sender_id, is_typing)
            .await
    }

    async fn recall(
        &self,
        conversation_id: &str,
        message_id: &str,
        original_timestamp: f64,
        recalled_by: &str,
    ) -> Result<Option<StoredMessage>> {
        self.inner
            .recall(conversation_id, message_id, original_timestamp, recalled_by)
            .await
    }

    async fn lookup_message(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        self.inner.lookup_message(message_id).await
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.inner.conversation_messages(conversation_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn recall_follows_store_assigned_ids() {
    let store = Arc::new(OwnIdStore::default());
    let scheduler = Scheduler::new(store.clone(), Arc::new(ChannelHub::default()), "rin");
    let actions = vec![
        PlaybackAction::send("在吗", "planned-1"),
        PlaybackAction::recall("planned-1").at(1.0),
        correction("在嘛", "planned-2", "planned-1").at(2.0),
    ];

    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert_eq!((report.executed, report.skipped, report.failed), (3, 0, 0));
    assert_eq!(visible_texts(&store.inner, "c"), vec!["在嘛".to_string()]);

    let messages = store.inner.messages("c");
    let recall = messages
        .iter()
        .find(|m| m.kind == MessageKind::Recall)
        .expect("recall record stored");
    let first = &messages[0];
    assert_ne!(first.id, "planned-1");
    assert_eq!(recall.target_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(recall.metadata.target_timestamp, Some(first.timestamp));
}

fn recall_record(store: &MemoryStore, conversation_id: &str) -> StoredMessage {
    store
        .messages(conversation_id)
        .into_iter()
        .find(|m| m.kind == MessageKind::Recall)
        .expect("recall record stored")
}

#[tokio::test(start_paused = true)]
async fn explicit_target_timestamp_wins_over_tracked_send() {
    let (store, _hub, scheduler) = setup();
    let actions = vec![
        PlaybackAction::send("制做", "a"),
        PlaybackAction::recall("a")
            .with_metadata(ActionMetadata {
                target_timestamp: Some(42.5),
                ..Default::default()
            })
            .at(1.0),
    ];

    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert_eq!((report.executed, report.skipped, report.failed), (2, 0, 0));
    let sent_at = store.messages("c")[0].timestamp;
    let recall = recall_record(&store, "c");
    assert_eq!(recall.target_id.as_deref(), Some("a"));
    assert_eq!(recall.metadata.target_timestamp, Some(42.5));
    assert_ne!(sent_at, 42.5);
}

#[tokio::test(start_paused = true)]
async fn recall_of_an_earlier_message_uses_the_stored_timestamp() {
    let (store, _hub, scheduler) = setup();
    let earlier = store
        .persist_message(
            "c",
            "rin",
            MessageKind::Text,
            "昨天说的",
            &ActionMetadata::default(),
            Some("old"),
        )
        .await
        .unwrap();
    store
        .persist_message("c", "user", MessageKind::Text, "嗯？", &ActionMetadata::default(), None)
        .await
        .unwrap();

    let actions = vec![PlaybackAction::recall("old")];
    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert_eq!((report.executed, report.skipped, report.failed), (1, 0, 0));
    let recall = recall_record(&store, "c");
    assert_eq!(recall.target_id.as_deref(), Some("old"));
    assert_eq!(recall.metadata.target_timestamp, Some(earlier[0].timestamp));
    assert_eq!(visible_texts(&store, "c"), vec!["嗯？".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn bad_recalls_do_not_stop_the_run() {
    let (store, _hub, scheduler) = setup();
    let mut no_target = PlaybackAction::recall("x");
    no_target.target_id = None;
    let actions = vec![
        PlaybackAction::send("第一句", "a"),
        no_target.at(1.0),
        PlaybackAction::recall("never-sent").at(2.0),
        PlaybackAction::send("第二句", "b").at(3.0),
    ];

    let report = scheduler
        .run(&actions, "c", &CancellationToken::new())
        .await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!((report.executed, report.skipped, report.failed), (2, 1, 1));
    assert_eq!(
        visible_texts(&store, "c"),
        vec!["第一句".to_string(), "第二句".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_keeps_what_already_happened() {
    let (store, _hub, scheduler) = setup();
    let actions = vec![
        PlaybackAction::send("马上到", "a"),
        PlaybackAction::send("再等我一下", "b").at(60.0),
    ];

    let handle = scheduler.run_timeline(actions, "c");
    let mut state = handle.subscribe_state();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.state(), RunState::Running);

    handle.cancel();
    handle.cancel();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.executed, 1);
    assert_eq!(*state.borrow_and_update(), RunState::Cancelled);
    assert_eq!(visible_texts(&store, "c"), vec!["马上到".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn registry_cancels_every_run() {
    let (store, _hub, scheduler) = setup();
    let mut registry = RunRegistry::new();
    for conversation in ["c1", "c2"] {
        let actions = vec![
            PlaybackAction::wait(5.0),
            PlaybackAction::send("晚点聊", format!("{conversation}-m")).at(30.0),
        ];
        registry.track(scheduler.run_timeline(actions, conversation));
    }
    assert_eq!(registry.len(), 2);

    let reports = registry.cancel_all().await;
    assert!(registry.is_empty());
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.state == RunState::Cancelled));
    assert!(store.messages("c1").is_empty());
    assert!(store.messages("c2").is_empty());
}

#[tokio::test(start_paused = true)]
async fn registry_prunes_finished_runs() {
    let (_store, _hub, scheduler) = setup();
    let mut registry = RunRegistry::new();
    let handle = scheduler.run_timeline(vec![PlaybackAction::send("好", "a")], "c");
    let mut state = handle.subscribe_state();
    registry.track(handle);

    state
        .wait_for(|s| s.is_terminal())
        .await
        .expect("run reaches a terminal state");
    // The task may need one more poll to report finished.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(registry.prune_finished(), 1);
    assert!(registry.is_empty());
}
