use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::config::MoodTable;
use crate::emotion::Mood;

const JITTER_MIN: f64 = 0.8;
const JITTER_MAX: f64 = 1.2;
const LENGTH_BONUS_PER_CHAR: f64 = 0.04;
const LENGTH_BONUS_CAP: f64 = 6.0;

/// Inter-segment delays scaled by mood. Multipliers below 1 shorten pauses.
#[derive(Debug, Clone, Default)]
pub struct PausePredictor {
    multipliers: MoodTable,
}

impl PausePredictor {
    pub fn new(multipliers: MoodTable) -> Self {
        Self { multipliers }
    }

    /// Seconds to wait before the next segment, rounded to milliseconds.
    /// Inverted bounds are swapped; a non-finite max collapses to the min.
    pub fn segment_interval(
        &self,
        mood: Mood,
        min_secs: f64,
        max_secs: f64,
        text_len: usize,
        rng: &mut impl Rng,
    ) -> f64 {
        let min_secs = finite_or(min_secs, 0.0);
        let max_secs = finite_or(max_secs, min_secs);
        let (min_secs, max_secs) = if max_secs < min_secs {
            (max_secs, min_secs)
        } else {
            (min_secs, max_secs)
        };
        let lo = min_secs.max(0.0);
        let hi = max_secs.max(lo);

        let jitter = Uniform::new_inclusive(JITTER_MIN, JITTER_MAX).sample(rng);
        let base = rng.gen_range(lo..=hi) * jitter;
        let bonus = (text_len as f64 * LENGTH_BONUS_PER_CHAR).min(LENGTH_BONUS_CAP);
        let interval = (base * self.multipliers.get(mood) + bonus).max(0.0);

        (interval * 1000.0).round() / 1000.0
    }
}

pub(crate) fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviorConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn stays_within_jittered_bounds() {
        let predictor = PausePredictor::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let d = predictor.segment_interval(Mood::Neutral, 0.8, 6.0, 0, &mut rng);
            assert!((0.8 * JITTER_MIN - 1e-3..=6.0 * JITTER_MAX + 1e-3).contains(&d), "{d}");
        }
    }

    #[test]
    fn swaps_inverted_bounds_and_clamps_negative_min() {
        let predictor = PausePredictor::default();
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..1000 {
            let d = predictor.segment_interval(Mood::Neutral, 3.0, 1.0, 0, &mut rng);
            assert!((1.0 * JITTER_MIN - 1e-3..=3.0 * JITTER_MAX + 1e-3).contains(&d), "{d}");
            let d = predictor.segment_interval(Mood::Neutral, -5.0, 1.0, 0, &mut rng);
            assert!((0.0..=JITTER_MAX + 1e-3).contains(&d), "{d}");
        }
        assert_eq!(
            predictor.segment_interval(Mood::Neutral, -3.0, -1.0, 0, &mut rng),
            0.0
        );
    }

    #[test]
    fn non_finite_bounds_do_not_panic() {
        let predictor = PausePredictor::default();
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let d = predictor.segment_interval(Mood::Neutral, 1.0, f64::INFINITY, 0, &mut rng);
            assert!((JITTER_MIN - 1e-3..=JITTER_MAX + 1e-3).contains(&d), "{d}");
            let d = predictor.segment_interval(Mood::Neutral, f64::NAN, 2.0, 0, &mut rng);
            assert!((0.0..=2.0 * JITTER_MAX + 1e-3).contains(&d), "{d}");
        }
    }

    #[test]
    fn length_bonus_is_capped() {
        let predictor = PausePredictor::default();
        let mut rng = StdRng::seed_from_u64(13);
        let d = predictor.segment_interval(Mood::Neutral, 0.0, 0.0, 10_000, &mut rng);
        assert_eq!(d, LENGTH_BONUS_CAP);
        let d = predictor.segment_interval(Mood::Neutral, 0.0, 0.0, 25, &mut rng);
        assert_eq!(d, 1.0);
    }

    #[test]
    fn sad_pauses_run_longer_than_angry_ones() {
        let predictor = PausePredictor::new(BehaviorConfig::default().pause_multipliers);
        let mut rng = StdRng::seed_from_u64(14);
        let mean = |mood, rng: &mut StdRng| {
            (0..2000)
                .map(|_| predictor.segment_interval(mood, 0.8, 6.0, 0, rng))
                .sum::<f64>()
                / 2000.0
        };
        let sad = mean(Mood::Sad, &mut rng);
        let angry = mean(Mood::Angry, &mut rng);
        assert!(sad > angry * 1.5, "sad {sad} angry {angry}");
    }

    #[test]
    fn rounds_to_milliseconds() {
        let predictor = PausePredictor::default();
        let mut rng = StdRng::seed_from_u64(15);
        for _ in 0..100 {
            let d = predictor.segment_interval(Mood::Happy, 0.8, 6.0, 7, &mut rng);
            assert!(((d * 1000.0).round() - d * 1000.0).abs() < 1e-6);
        }
    }
}
