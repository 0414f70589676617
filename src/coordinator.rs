use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::{BehaviorConfig, EngineConfig, StickerConfig, TimelineConfig};
use crate::emotion::{EmotionMap, Mood};
use crate::model::{new_message_id, ActionKind, ActionMetadata, PlaybackAction, Reason, Timeline};
use crate::pause::{finite_or, PausePredictor};
use crate::segmenter::{trim_trailing_punctuation, RuleBasedSegmenter, Segmenter};
use crate::sticker::{StickerLog, StickerSelector};
use crate::timeline::TimelineBuilder;
use crate::typo::TypoInjector;

/// Segment count beyond which the reply is treated as malformed and cut.
pub const MAX_SEGMENTS: usize = 20;

pub const TIMELINE_VERSION: u32 = 1;

const PREVIEW_CHARS: usize = 200;

/// Runs one reply through segmentation, typos, pauses and stickers, then
/// schedules the result.
pub struct BehaviorCoordinator {
    behavior: BehaviorConfig,
    segmenter: Box<dyn Segmenter>,
    typos: TypoInjector,
    pauses: PausePredictor,
    stickers: StickerSelector,
    timeline: TimelineBuilder,
}

impl BehaviorCoordinator {
    pub fn new(config: &EngineConfig) -> Self {
        Self::from_parts(
            config.behavior.clone(),
            config.timeline.clone(),
            config.sticker.clone(),
        )
    }

    pub fn from_parts(
        behavior: BehaviorConfig,
        timeline: TimelineConfig,
        sticker: StickerConfig,
    ) -> Self {
        Self {
            segmenter: Box::new(RuleBasedSegmenter::new(behavior.max_segment_length)),
            typos: TypoInjector::new(behavior.lexicon_path.clone()),
            pauses: PausePredictor::new(behavior.pause_multipliers.clone()),
            stickers: StickerSelector::new(sticker),
            timeline: TimelineBuilder::new(timeline),
            behavior,
        }
    }

    pub fn with_segmenter(mut self, segmenter: Box<dyn Segmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn with_typo_injector(mut self, typos: TypoInjector) -> Self {
        self.typos = typos;
        self
    }

    pub fn with_sticker_selector(mut self, stickers: StickerSelector) -> Self {
        self.stickers = stickers;
        self
    }

    pub fn behavior(&self) -> &BehaviorConfig {
        &self.behavior
    }

    pub fn mood_for(&self, emotions: &EmotionMap) -> Mood {
        if self.behavior.enable_emotion_fetch {
            emotions.dominant_mood()
        } else {
            Mood::Neutral
        }
    }

    /// Scheduled actions for one reply. Empty for blank text.
    pub fn process(
        &self,
        text: &str,
        emotions: &EmotionMap,
        rng: &mut impl Rng,
    ) -> Vec<PlaybackAction> {
        self.plan(text, emotions, rng).actions
    }

    pub fn plan(&self, text: &str, emotions: &EmotionMap, rng: &mut impl Rng) -> Timeline {
        let mood = self.mood_for(emotions);
        let text = text.trim();
        if text.is_empty() {
            return Timeline {
                version: TIMELINE_VERSION,
                mood,
                actions: Vec::new(),
                sticker: None,
            };
        }

        let (abstract_actions, sticker) = self.abstract_actions(text, emotions, mood, rng);
        let actions = self.timeline.build(&abstract_actions, rng);
        debug!(
            mood = mood.as_str(),
            planned = abstract_actions.len(),
            scheduled = actions.len(),
            "timeline built"
        );
        Timeline {
            version: TIMELINE_VERSION,
            mood,
            actions,
            sticker: Some(sticker),
        }
    }

    /// Unscheduled action list: sends, typo recalls, pauses and the optional
    /// sticker, in playback order. Timestamps are all zero.
    pub fn abstract_actions(
        &self,
        text: &str,
        emotions: &EmotionMap,
        mood: Mood,
        rng: &mut impl Rng,
    ) -> (Vec<PlaybackAction>, StickerLog) {
        let segments = self.segments(text);
        let total = segments.len();

        let mut actions = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            self.push_segment(&mut actions, segment, index, total, mood, rng);
        }

        let decision = self.stickers.select(text, emotions, rng);
        debug!(outcome = ?decision.log.outcome, "sticker decision");
        if let Some(asset) = decision.asset {
            splice_sticker(&mut actions, asset, self.stickers.config(), rng);
        }
        (actions, decision.log)
    }

    fn segments(&self, text: &str) -> Vec<String> {
        let raw = if self.behavior.enable_segmentation {
            match self.segmenter.segment(text) {
                Ok(segments) => segments,
                Err(err) => {
                    warn!("segmentation failed, sending unsegmented: {err:#}");
                    vec![text.to_string()]
                }
            }
        } else {
            vec![text.to_string()]
        };

        let mut segments: Vec<String> = raw
            .iter()
            .map(|s| trim_trailing_punctuation(s))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            let whole = trim_trailing_punctuation(text);
            segments.push(if whole.is_empty() { text } else { whole }.to_string());
        }

        if segments.len() > MAX_SEGMENTS {
            let preview: String = text.chars().take(PREVIEW_CHARS).collect();
            error!(
                segments = segments.len(),
                cap = MAX_SEGMENTS,
                %preview,
                "excessive segment count, truncating"
            );
            segments.truncate(MAX_SEGMENTS);
        }
        segments
    }

    fn push_segment(
        &self,
        actions: &mut Vec<PlaybackAction>,
        segment: &str,
        index: usize,
        total: usize,
        mood: Mood,
        rng: &mut impl Rng,
    ) {
        let base = ActionMetadata {
            segment_index: Some(index),
            total_segments: Some(total),
            emotion: Some(mood),
            ..Default::default()
        };

        let typo = if self.behavior.enable_typo {
            self.typos
                .inject(segment, self.behavior.typo_rate_for(mood), rng)
        } else {
            None
        };

        let send_id = new_message_id(rng);
        let send_text = typo.as_ref().map_or(segment, |edit| edit.text.as_str());
        actions.push(
            PlaybackAction::send(send_text, send_id.clone()).with_metadata(ActionMetadata {
                has_typo: typo.is_some(),
                typo_original: typo.as_ref().map(|edit| edit.original.clone()),
                typo_position: typo.as_ref().map(|edit| edit.position),
                ..base.clone()
            }),
        );

        if typo.is_some()
            && self.behavior.enable_recall
            && self
                .typos
                .should_recall(self.behavior.typo_recall_rate, rng)
        {
            if self.behavior.recall_delay > 0.0 {
                actions.push(
                    PlaybackAction::pause(self.behavior.recall_delay)
                        .with_reason(Reason::TypoRecallDelay),
                );
            }
            actions.push(PlaybackAction::recall(send_id.clone()).with_reason(Reason::TypoRecall));
            if self.behavior.retype_delay > 0.0 {
                actions.push(
                    PlaybackAction::pause(self.behavior.retype_delay)
                        .with_reason(Reason::TypoRetypeWait),
                );
            }
            actions.push(
                PlaybackAction::send(segment, new_message_id(rng)).with_metadata(ActionMetadata {
                    is_correction: true,
                    correction_for: Some(send_id),
                    ..base
                }),
            );
        }

        if index + 1 < total {
            let interval = self.pauses.segment_interval(
                mood,
                self.behavior.min_pause_duration,
                self.behavior.max_pause_duration,
                0,
                rng,
            );
            if interval > 0.0 {
                actions.push(PlaybackAction::pause(interval).with_metadata(ActionMetadata {
                    reason: Some(Reason::SegmentInterval),
                    from_segment: Some(index),
                    emotion: Some(mood),
                    ..Default::default()
                }));
            }
        }
    }
}

/// Put a short pause and the sticker right before or after a random send.
fn splice_sticker(
    actions: &mut Vec<PlaybackAction>,
    asset: String,
    config: &StickerConfig,
    rng: &mut impl Rng,
) {
    let sends: Vec<usize> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.kind == ActionKind::Send)
        .map(|(i, _)| i)
        .collect();
    let Some(&anchor) = sends.choose(rng) else {
        return;
    };
    let at = if rng.gen_bool(0.5) { anchor + 1 } else { anchor };

    let lo = finite_or(config.delay_min_secs, 0.0).max(0.0);
    let hi = finite_or(config.delay_max_secs, lo).max(lo);
    let delay = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
    let delay = (delay * 1000.0).round() / 1000.0;

    let image = PlaybackAction::image(asset, new_message_id(rng)).with_metadata(ActionMetadata {
        is_sticker: true,
        ..Default::default()
    });
    actions.splice(
        at..at,
        [
            PlaybackAction::pause(delay).with_reason(Reason::StickerDelay),
            image,
        ],
    );
}

/// Build a scheduled timeline for one reply with stickers disabled. Meant for
/// one-off use; long-lived callers should keep a [`BehaviorCoordinator`].
pub fn generate_timeline(
    reply_text: &str,
    emotions: &EmotionMap,
    behavior: &BehaviorConfig,
    timeline: &TimelineConfig,
    rng: &mut impl Rng,
) -> Vec<PlaybackAction> {
    BehaviorCoordinator::from_parts(behavior.clone(), timeline.clone(), StickerConfig::default())
        .process(reply_text, emotions, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Failing;

    impl Segmenter for Failing {
        fn segment(&self, _text: &str) -> anyhow::Result<Vec<String>> {
            Err(anyhow!("boom"))
        }
    }

    fn no_typos() -> BehaviorConfig {
        BehaviorConfig {
            enable_typo: false,
            ..BehaviorConfig::default()
        }
    }

    fn sends(actions: &[PlaybackAction]) -> Vec<String> {
        actions
            .iter()
            .filter(|a| a.kind == ActionKind::Send)
            .filter_map(|a| a.text.clone())
            .collect()
    }

    #[test]
    fn segmentation_failure_sends_whole_text() {
        let coordinator =
            BehaviorCoordinator::from_parts(no_typos(), TimelineConfig::default(), StickerConfig::default())
                .with_segmenter(Box::new(Failing));
        let mut rng = StdRng::seed_from_u64(1);
        let actions = coordinator.process("你好！今天好吗？", &EmotionMap::new(), &mut rng);
        assert_eq!(sends(&actions), vec!["你好！今天好吗？"]);
    }

    #[test]
    fn punctuation_only_reply_falls_back_to_itself() {
        let coordinator =
            BehaviorCoordinator::from_parts(no_typos(), TimelineConfig::default(), StickerConfig::default());
        let mut rng = StdRng::seed_from_u64(2);
        let actions = coordinator.process("。。。", &EmotionMap::new(), &mut rng);
        assert_eq!(sends(&actions), vec!["。。。"]);
    }

    #[test]
    fn segment_metadata_and_intervals() {
        let coordinator =
            BehaviorCoordinator::from_parts(no_typos(), TimelineConfig::default(), StickerConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let emotions = EmotionMap::normalize([("sad", "high")]);
        let (actions, log) =
            coordinator.abstract_actions("一。二。三", &emotions, Mood::Sad, &mut rng);
        let kinds: Vec<ActionKind> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Send,
                ActionKind::Pause,
                ActionKind::Send,
                ActionKind::Pause,
                ActionKind::Send
            ]
        );
        assert_eq!(actions[2].metadata.segment_index, Some(1));
        assert_eq!(actions[2].metadata.total_segments, Some(3));
        assert_eq!(actions[2].metadata.emotion, Some(Mood::Sad));
        assert_eq!(actions[3].metadata.from_segment, Some(1));
        assert_eq!(log.outcome, crate::sticker::StickerOutcome::NoPacks);
    }

    #[test]
    fn forced_typo_and_recall_pairs_correction() {
        let behavior = BehaviorConfig {
            enable_segmentation: false,
            base_typo_rate: 1.0,
            typo_recall_rate: 1.0,
            ..BehaviorConfig::default()
        };
        let coordinator =
            BehaviorCoordinator::from_parts(behavior, TimelineConfig::default(), StickerConfig::default());
        let mut rng = StdRng::seed_from_u64(4);
        let (actions, _) =
            coordinator.abstract_actions("我其实不知道", &EmotionMap::new(), Mood::Neutral, &mut rng);
        let kinds: Vec<ActionKind> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Send,
                ActionKind::Pause,
                ActionKind::Recall,
                ActionKind::Pause,
                ActionKind::Send
            ]
        );
        assert!(actions[0].metadata.has_typo);
        assert_eq!(actions[0].metadata.typo_original.as_deref(), Some("知道"));
        assert_eq!(actions[2].target_id, actions[0].message_id);
        assert_eq!(actions[4].text.as_deref(), Some("我其实不知道"));
        assert!(actions[4].metadata.is_correction);
        assert_eq!(actions[4].metadata.correction_for, actions[0].message_id);
        assert_eq!(actions[1].duration, 2.0);
        assert_eq!(actions[3].duration, 2.5);
    }

    #[test]
    fn emotion_fetch_disabled_forces_neutral() {
        let coordinator = BehaviorCoordinator::from_parts(
            BehaviorConfig {
                enable_emotion_fetch: false,
                ..BehaviorConfig::default()
            },
            TimelineConfig::default(),
            StickerConfig::default(),
        );
        let emotions = EmotionMap::normalize([("angry", "extreme")]);
        assert_eq!(coordinator.mood_for(&emotions), Mood::Neutral);
    }

    #[test]
    fn sticker_splice_lands_next_to_a_send() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let mut actions = vec![
                PlaybackAction::send("a", "1"),
                PlaybackAction::pause(1.0),
                PlaybackAction::send("b", "2"),
            ];
            splice_sticker(&mut actions, "p/d/x.png".into(), &StickerConfig::default(), &mut rng);
            assert_eq!(actions.len(), 5);
            let image = actions.iter().position(|a| a.kind == ActionKind::Image).unwrap();
            let pause = &actions[image - 1];
            assert_eq!(pause.metadata.reason, Some(Reason::StickerDelay));
            assert!((1.0..=5.0).contains(&pause.duration));
            assert!(actions[image].metadata.is_sticker);
            let before = image.checked_sub(2).map(|i| actions[i].kind);
            let after = actions.get(image + 1).map(|a| a.kind);
            assert!(
                before == Some(ActionKind::Send) || after == Some(ActionKind::Send),
                "{actions:?}"
            );
        }
    }
}
