use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::emotion::Mood;
use crate::sticker::StickerLog;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub version: u32,
    #[serde(default)]
    pub mood: Mood,
    pub actions: Vec<PlaybackAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker: Option<StickerLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Send,
    Pause,
    Recall,
    TypingStart,
    TypingEnd,
    Wait,
    Image,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Send => "send",
            ActionKind::Pause => "pause",
            ActionKind::Recall => "recall",
            ActionKind::TypingStart => "typing_start",
            ActionKind::TypingEnd => "typing_end",
            ActionKind::Wait => "wait",
            ActionKind::Image => "image",
        }
    }

    /// Kinds that create a message and therefore carry a `message_id`.
    pub fn creates_message(self) -> bool {
        matches!(self, ActionKind::Send | ActionKind::Image)
    }
}

/// Why a delay or auxiliary action was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Hesitation,
    HesitationGap,
    InitialDelay,
    TypingEntryDelay,
    TypingLeadTime,
    SegmentInterval,
    TypoRecallDelay,
    TypoRecall,
    TypoRetypeWait,
    StickerDelay,
}

/// Annotations carried by an action. Scheduling never reads these, with the
/// exception of the correction pairing and the recall timestamp override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_segment: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Mood>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_length: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_typo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typo_original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typo_position: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_correction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_sticker: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl ActionMetadata {
    pub fn reason(reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Seconds from timeline start.
    #[serde(default)]
    pub timestamp: f64,
    /// Seconds; meaningful for `pause` and `wait`.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl PlaybackAction {
    fn bare(kind: ActionKind) -> Self {
        Self {
            kind,
            text: None,
            timestamp: 0.0,
            duration: 0.0,
            message_id: None,
            target_id: None,
            metadata: ActionMetadata::default(),
        }
    }

    pub fn send(text: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            message_id: Some(message_id.into()),
            ..Self::bare(ActionKind::Send)
        }
    }

    pub fn image(asset: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            text: Some(asset.into()),
            message_id: Some(message_id.into()),
            ..Self::bare(ActionKind::Image)
        }
    }

    pub fn pause(duration: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            ..Self::bare(ActionKind::Pause)
        }
    }

    pub fn wait(duration: f64) -> Self {
        Self {
            duration: duration.max(0.0),
            ..Self::bare(ActionKind::Wait)
        }
    }

    pub fn recall(target_id: impl Into<String>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            ..Self::bare(ActionKind::Recall)
        }
    }

    pub fn typing_start() -> Self {
        Self::bare(ActionKind::TypingStart)
    }

    pub fn typing_end() -> Self {
        Self::bare(ActionKind::TypingEnd)
    }

    pub fn with_metadata(mut self, metadata: ActionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.metadata.reason = Some(reason);
        self
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn text_len(&self) -> usize {
        self.text.as_deref().map(|t| t.chars().count()).unwrap_or(0)
    }
}

/// 32 lowercase hex characters drawn from `rng`, so seeded runs reproduce ids.
pub fn new_message_id(rng: &mut impl Rng) -> String {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string()
}
