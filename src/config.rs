use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::emotion::Mood;

/// Everything the engine reads, loadable from one JSON file. Missing fields
/// fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub behavior: BehaviorConfig,
    pub timeline: TimelineConfig,
    pub sticker: StickerConfig,
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.behavior.validate().context("invalid behavior config")?;
        self.timeline.validate().context("invalid timeline config")?;
        self.sticker.validate().context("invalid sticker config")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub enable_segmentation: bool,
    pub max_segment_length: usize,
    pub min_pause_duration: f64,
    pub max_pause_duration: f64,
    pub enable_typo: bool,
    pub base_typo_rate: f64,
    pub typo_multipliers: MoodTable,
    pub enable_recall: bool,
    pub typo_recall_rate: f64,
    pub recall_delay: f64,
    pub retype_delay: f64,
    pub enable_emotion_fetch: bool,
    pub pause_multipliers: MoodTable,
    /// Phonetic dictionary used by the typo injector; the built-in one when unset.
    pub lexicon_path: Option<PathBuf>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enable_segmentation: true,
            max_segment_length: 50,
            min_pause_duration: 0.8,
            max_pause_duration: 6.0,
            enable_typo: true,
            base_typo_rate: 0.05,
            typo_multipliers: MoodTable::from_pairs([
                (Mood::Neutral, 1.0),
                (Mood::Happy, 1.2),
                (Mood::Excited, 2.0),
                (Mood::Sad, 0.5),
                (Mood::Angry, 2.3),
                (Mood::Anxious, 1.3),
                (Mood::Confused, 0.3),
            ]),
            enable_recall: true,
            typo_recall_rate: 0.75,
            recall_delay: 2.0,
            retype_delay: 2.5,
            enable_emotion_fetch: true,
            pause_multipliers: MoodTable::from_pairs([
                (Mood::Neutral, 1.0),
                (Mood::Happy, 0.9),
                (Mood::Excited, 0.8),
                (Mood::Sad, 1.4),
                (Mood::Angry, 0.7),
                (Mood::Anxious, 1.1),
                (Mood::Confused, 1.3),
            ]),
            lexicon_path: None,
        }
    }
}

impl BehaviorConfig {
    /// Inverted pause bounds are accepted; the pause predictor swaps them.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_segment_length > 0,
            "max_segment_length must be > 0"
        );
        ensure!(
            self.min_pause_duration.is_finite() && self.max_pause_duration.is_finite(),
            "pause bounds must be finite"
        );
        ensure!(
            (0.0..=1.0).contains(&self.base_typo_rate),
            "base_typo_rate must be between 0.0 and 1.0"
        );
        ensure!(
            (0.0..=1.0).contains(&self.typo_recall_rate),
            "typo_recall_rate must be between 0.0 and 1.0"
        );
        ensure!(
            self.recall_delay.is_finite() && self.recall_delay >= 0.0,
            "recall_delay must be >= 0"
        );
        ensure!(
            self.retype_delay.is_finite() && self.retype_delay >= 0.0,
            "retype_delay must be >= 0"
        );
        self.typo_multipliers
            .validate()
            .context("typo_multipliers")?;
        self.pause_multipliers
            .validate()
            .context("pause_multipliers")?;
        Ok(())
    }

    pub fn typo_rate_for(&self, mood: Mood) -> f64 {
        (self.base_typo_rate * self.typo_multipliers.get(mood)).clamp(0.0, 1.0)
    }
}

/// Mood → multiplier. Moods missing from the table read as 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoodTable(BTreeMap<Mood, f64>);

impl MoodTable {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Mood, f64)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, mood: Mood) -> f64 {
        self.0.get(&mood).copied().unwrap_or(1.0)
    }

    pub fn set(&mut self, mood: Mood, value: f64) {
        self.0.insert(mood, value);
    }

    fn validate(&self) -> Result<()> {
        for (mood, value) in &self.0 {
            ensure!(
                value.is_finite() && *value >= 0.0,
                "multiplier for {} must be finite and >= 0",
                mood.as_str()
            );
        }
        Ok(())
    }
}

/// Text length above which a segment gets the given lead time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeadTimeStep {
    pub min_chars_exclusive: usize,
    pub lead_ms: u64,
}

/// One initial-latency bucket, selected when the roll is below
/// `cumulative_weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayBucket {
    pub cumulative_weight: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub hesitation_probability: f64,
    pub hesitation_cycles_min: u32,
    pub hesitation_cycles_max: u32,
    pub hesitation_duration_min_ms: u64,
    pub hesitation_duration_max_ms: u64,
    pub hesitation_gap_probability: f64,
    pub hesitation_gap_min_ms: u64,
    pub hesitation_gap_max_ms: u64,
    /// Checked top-down; the first step whose threshold the length exceeds wins.
    pub lead_time_steps: [LeadTimeStep; 5],
    pub lead_time_floor_ms: u64,
    pub keep_typing_min_chars: usize,
    pub entry_delay_min_ms: u64,
    pub entry_delay_max_ms: u64,
    pub initial_delay_buckets: [DelayBucket; 4],
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            hesitation_probability: 0.15,
            hesitation_cycles_min: 1,
            hesitation_cycles_max: 2,
            hesitation_duration_min_ms: 1500,
            hesitation_duration_max_ms: 5000,
            hesitation_gap_probability: 0.3,
            hesitation_gap_min_ms: 500,
            hesitation_gap_max_ms: 2000,
            lead_time_steps: [
                LeadTimeStep {
                    min_chars_exclusive: 50,
                    lead_ms: 8800,
                },
                LeadTimeStep {
                    min_chars_exclusive: 34,
                    lead_ms: 6000,
                },
                LeadTimeStep {
                    min_chars_exclusive: 28,
                    lead_ms: 3800,
                },
                LeadTimeStep {
                    min_chars_exclusive: 15,
                    lead_ms: 2000,
                },
                LeadTimeStep {
                    min_chars_exclusive: 6,
                    lead_ms: 1200,
                },
            ],
            lead_time_floor_ms: 1200,
            keep_typing_min_chars: 100,
            entry_delay_min_ms: 200,
            entry_delay_max_ms: 2000,
            initial_delay_buckets: [
                DelayBucket {
                    cumulative_weight: 0.45,
                    min_secs: 3.0,
                    max_secs: 4.0,
                },
                DelayBucket {
                    cumulative_weight: 0.75,
                    min_secs: 4.0,
                    max_secs: 6.0,
                },
                DelayBucket {
                    cumulative_weight: 0.93,
                    min_secs: 6.0,
                    max_secs: 7.0,
                },
                DelayBucket {
                    cumulative_weight: 1.0,
                    min_secs: 8.0,
                    max_secs: 9.0,
                },
            ],
        }
    }
}

impl TimelineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.hesitation_probability),
            "hesitation_probability must be between 0.0 and 1.0"
        );
        ensure!(
            (0.0..=1.0).contains(&self.hesitation_gap_probability),
            "hesitation_gap_probability must be between 0.0 and 1.0"
        );
        ensure!(
            self.hesitation_cycles_min <= self.hesitation_cycles_max,
            "hesitation_cycles_min must be <= hesitation_cycles_max"
        );
        ensure!(
            self.hesitation_duration_min_ms <= self.hesitation_duration_max_ms,
            "hesitation_duration_min_ms must be <= hesitation_duration_max_ms"
        );
        ensure!(
            self.hesitation_gap_min_ms <= self.hesitation_gap_max_ms,
            "hesitation_gap_min_ms must be <= hesitation_gap_max_ms"
        );
        ensure!(
            self.entry_delay_min_ms <= self.entry_delay_max_ms,
            "entry_delay_min_ms must be <= entry_delay_max_ms"
        );
        ensure!(
            self.lead_time_steps
                .windows(2)
                .all(|w| w[0].min_chars_exclusive > w[1].min_chars_exclusive),
            "lead_time_steps must be ordered by decreasing threshold"
        );

        let mut prev = 0.0;
        for bucket in &self.initial_delay_buckets {
            ensure!(
                bucket.cumulative_weight.is_finite()
                    && bucket.min_secs.is_finite()
                    && bucket.max_secs.is_finite(),
                "initial_delay_buckets must be finite"
            );
            ensure!(
                bucket.cumulative_weight >= prev,
                "initial_delay_buckets cumulative weights must be non-decreasing"
            );
            ensure!(
                0.0 <= bucket.min_secs && bucket.min_secs <= bucket.max_secs,
                "initial_delay_buckets ranges must satisfy 0 <= min <= max"
            );
            prev = bucket.cumulative_weight;
        }
        ensure!(
            (prev - 1.0).abs() < 1e-9,
            "last initial_delay_buckets cumulative weight must be 1.0"
        );
        Ok(())
    }

    /// Simulated typing time before a segment of `text_len` chars is sent.
    pub fn lead_time_ms(&self, text_len: usize) -> u64 {
        self.lead_time_steps
            .iter()
            .find(|step| text_len > step.min_chars_exclusive)
            .map(|step| step.lead_ms)
            .unwrap_or(self.lead_time_floor_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerConfig {
    /// Directory holding one sub-directory per pack.
    pub asset_root: Option<PathBuf>,
    pub packs: Vec<String>,
    pub send_probability: f64,
    pub positive_threshold: f64,
    pub neutral_threshold: f64,
    pub negative_threshold: f64,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
}

impl Default for StickerConfig {
    fn default() -> Self {
        Self {
            asset_root: None,
            packs: Vec::new(),
            send_probability: 0.4,
            positive_threshold: 0.6,
            neutral_threshold: 0.7,
            negative_threshold: 0.8,
            delay_min_secs: 1.0,
            delay_max_secs: 5.0,
        }
    }
}

impl StickerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("send_probability", self.send_probability),
            ("positive_threshold", self.positive_threshold),
            ("neutral_threshold", self.neutral_threshold),
            ("negative_threshold", self.negative_threshold),
        ] {
            ensure!(
                (0.0..=1.0).contains(&p),
                "{name} must be between 0.0 and 1.0"
            );
        }
        ensure!(
            self.delay_min_secs.is_finite()
                && self.delay_max_secs.is_finite()
                && 0.0 <= self.delay_min_secs
                && self.delay_min_secs <= self.delay_max_secs,
            "sticker delay must satisfy 0 <= delay_min_secs <= delay_max_secs"
        );
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.asset_root.is_some() && !self.packs.is_empty()
    }
}
