use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical emotion labels. Declared alphabetically; the derived `Ord` is the
/// dominant-emotion tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Affectionate,
    Angry,
    Anxious,
    Bored,
    Caring,
    Confused,
    Embarrassed,
    Excited,
    Happy,
    Neutral,
    Playful,
    Sad,
    Serious,
    Shy,
    Surprised,
    Tired,
}

impl Emotion {
    pub const ALL: [Emotion; 16] = [
        Emotion::Affectionate,
        Emotion::Angry,
        Emotion::Anxious,
        Emotion::Bored,
        Emotion::Caring,
        Emotion::Confused,
        Emotion::Embarrassed,
        Emotion::Excited,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Playful,
        Emotion::Sad,
        Emotion::Serious,
        Emotion::Shy,
        Emotion::Surprised,
        Emotion::Tired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Affectionate => "affectionate",
            Emotion::Angry => "angry",
            Emotion::Anxious => "anxious",
            Emotion::Bored => "bored",
            Emotion::Caring => "caring",
            Emotion::Confused => "confused",
            Emotion::Embarrassed => "embarrassed",
            Emotion::Excited => "excited",
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Playful => "playful",
            Emotion::Sad => "sad",
            Emotion::Serious => "serious",
            Emotion::Shy => "shy",
            Emotion::Surprised => "surprised",
            Emotion::Tired => "tired",
        }
    }

    pub fn parse(label: &str) -> Option<Emotion> {
        let label = label.trim().to_lowercase();
        match label.as_str() {
            "mad" => return Some(Emotion::Angry),
            "nervous" => return Some(Emotion::Anxious),
            _ => {}
        }
        Emotion::ALL.into_iter().find(|e| e.as_str() == label)
    }

    pub fn mood(self) -> Mood {
        match self {
            Emotion::Neutral | Emotion::Serious => Mood::Neutral,
            Emotion::Happy | Emotion::Playful | Emotion::Affectionate | Emotion::Caring => {
                Mood::Happy
            }
            Emotion::Excited | Emotion::Surprised => Mood::Excited,
            Emotion::Sad | Emotion::Tired | Emotion::Bored => Mood::Sad,
            Emotion::Angry => Mood::Angry,
            Emotion::Anxious | Emotion::Embarrassed => Mood::Anxious,
            Emotion::Confused | Emotion::Shy => Mood::Confused,
        }
    }

    pub fn valence(self) -> Valence {
        match self {
            Emotion::Happy
            | Emotion::Excited
            | Emotion::Playful
            | Emotion::Affectionate
            | Emotion::Surprised => Valence::Positive,
            Emotion::Sad
            | Emotion::Angry
            | Emotion::Anxious
            | Emotion::Embarrassed
            | Emotion::Tired => Valence::Negative,
            _ => Valence::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Intensity {
    pub fn parse(label: &str) -> Option<Intensity> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Intensity::Low),
            "medium" => Some(Intensity::Medium),
            "high" => Some(Intensity::High),
            "extreme" => Some(Intensity::Extreme),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
            Intensity::Extreme => "extreme",
        }
    }

    pub fn weight(self) -> u32 {
        match self {
            Intensity::Low => 1,
            Intensity::Medium => 2,
            Intensity::High => 3,
            Intensity::Extreme => 4,
        }
    }

    pub fn at_least_high(self) -> bool {
        self >= Intensity::High
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Neutral,
    Happy,
    Excited,
    Sad,
    Angry,
    Anxious,
    Confused,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Happy => "happy",
            Mood::Excited => "excited",
            Mood::Sad => "sad",
            Mood::Angry => "angry",
            Mood::Anxious => "anxious",
            Mood::Confused => "confused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Neutral,
    Negative,
}

/// A validated emotion → intensity mapping. Possibly empty, which callers read
/// as "neutral".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionMap(BTreeMap<Emotion, Intensity>);

impl EmotionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the entries whose key is a known label and whose value is a valid
    /// intensity. When an alias and its canonical label both appear, the
    /// stronger intensity wins.
    pub fn normalize<I, K, V>(raw: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut out = BTreeMap::new();
        for (key, value) in raw {
            let (Some(emotion), Some(intensity)) =
                (Emotion::parse(key.as_ref()), Intensity::parse(value.as_ref()))
            else {
                continue;
            };
            out.entry(emotion)
                .and_modify(|current: &mut Intensity| *current = (*current).max(intensity))
                .or_insert(intensity);
        }
        Self(out)
    }

    pub fn describe(&self) -> String {
        if self.0.is_empty() {
            return "neutral".to_string();
        }
        self.0
            .iter()
            .map(|(e, i)| format!("{}={}", e.as_str(), i.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn neutral() -> Self {
        Self::from_iter([(Emotion::Neutral, Intensity::Low)])
    }

    pub fn insert(&mut self, emotion: Emotion, intensity: Intensity) {
        self.0.insert(emotion, intensity);
    }

    pub fn get(&self, emotion: Emotion) -> Option<Intensity> {
        self.0.get(&emotion).copied()
    }

    pub fn contains(&self, emotion: Emotion) -> bool {
        self.0.contains_key(&emotion)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, Intensity)> + '_ {
        self.0.iter().map(|(e, i)| (*e, *i))
    }

    /// Highest intensity wins; ties go to the alphabetically first label.
    pub fn dominant(&self) -> Option<(Emotion, Intensity)> {
        self.iter()
            .fold(None, |best: Option<(Emotion, Intensity)>, (e, i)| match best {
                Some((_, bi)) if bi >= i => best,
                _ => Some((e, i)),
            })
    }

    pub fn dominant_mood(&self) -> Mood {
        self.dominant().map(|(e, _)| e.mood()).unwrap_or_default()
    }

    pub fn valence(&self) -> Valence {
        let mut positive = 0u32;
        let mut negative = 0u32;
        for (emotion, intensity) in self.iter() {
            match emotion.valence() {
                Valence::Positive => positive += intensity.weight(),
                Valence::Negative => negative += intensity.weight(),
                Valence::Neutral => {}
            }
        }
        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Valence::Positive,
            std::cmp::Ordering::Less => Valence::Negative,
            std::cmp::Ordering::Equal => Valence::Neutral,
        }
    }
}

impl FromIterator<(Emotion, Intensity)> for EmotionMap {
    fn from_iter<T: IntoIterator<Item = (Emotion, Intensity)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_drops_unknown_labels_and_intensities() {
        let map = EmotionMap::normalize([
            ("Happy", "HIGH"),
            ("grumpy", "high"),
            ("sad", "very"),
            (" nervous ", "low"),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(Emotion::Happy), Some(Intensity::High));
        assert_eq!(map.get(Emotion::Anxious), Some(Intensity::Low));
    }

    #[test]
    fn alias_and_canonical_keep_stronger_intensity() {
        let map = EmotionMap::normalize([("angry", "low"), ("mad", "extreme")]);
        assert_eq!(map.get(Emotion::Angry), Some(Intensity::Extreme));
    }

    #[test]
    fn dominant_prefers_intensity_then_alphabetical_label() {
        let map = EmotionMap::normalize([("sad", "high"), ("happy", "high"), ("angry", "low")]);
        assert_eq!(map.dominant(), Some((Emotion::Happy, Intensity::High)));
        assert_eq!(map.dominant_mood(), Mood::Happy);

        let map = EmotionMap::normalize([("tired", "extreme"), ("happy", "high")]);
        assert_eq!(map.dominant_mood(), Mood::Sad);
    }

    #[test]
    fn empty_map_is_neutral() {
        let map = EmotionMap::normalize(Vec::<(String, String)>::new());
        assert!(map.is_empty());
        assert_eq!(map.dominant(), None);
        assert_eq!(map.dominant_mood(), Mood::Neutral);
        assert_eq!(map.valence(), Valence::Neutral);
    }

    #[test]
    fn valence_weighs_intensity() {
        let map = EmotionMap::normalize([("happy", "low"), ("sad", "medium")]);
        assert_eq!(map.valence(), Valence::Negative);
        let map = EmotionMap::normalize([("playful", "extreme"), ("tired", "medium")]);
        assert_eq!(map.valence(), Valence::Positive);
    }

    #[test]
    fn map_round_trips_as_plain_json_object() {
        let map = EmotionMap::normalize([("caring", "medium")]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"caring":"medium"}"#);
    }
}
