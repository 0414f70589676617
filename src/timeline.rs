use rand::Rng;

use crate::config::TimelineConfig;
use crate::model::{ActionKind, ActionMetadata, PlaybackAction, Reason};
use crate::pause::finite_or;

/// Turns the coordinator's abstract action list into an absolute schedule
/// with typing brackets, an optional hesitation prefix and the initial reply
/// latency.
#[derive(Debug, Clone, Default)]
pub struct TimelineBuilder {
    config: TimelineConfig,
}

/// Running clock. Every emitted action is stamped with the current time and
/// only `wait` advances it, so timestamps never decrease.
#[derive(Debug, Default)]
struct Clock {
    t: f64,
    out: Vec<PlaybackAction>,
    typing: bool,
}

impl Clock {
    fn emit(&mut self, action: PlaybackAction) {
        self.out.push(action.at(self.t));
    }

    fn wait(&mut self, secs: f64, metadata: ActionMetadata) {
        if secs <= 0.0 || !secs.is_finite() {
            return;
        }
        self.emit(PlaybackAction::wait(secs).with_metadata(metadata));
        self.t += secs;
    }

    fn start_typing(&mut self, metadata: ActionMetadata) {
        if !self.typing {
            self.emit(PlaybackAction::typing_start().with_metadata(metadata));
            self.typing = true;
        }
    }

    fn stop_typing(&mut self) {
        if self.typing {
            self.emit(PlaybackAction::typing_end());
            self.typing = false;
        }
    }
}

impl TimelineBuilder {
    pub fn new(config: TimelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    pub fn build(&self, actions: &[PlaybackAction], rng: &mut impl Rng) -> Vec<PlaybackAction> {
        let mut clock = Clock::default();

        self.hesitate(&mut clock, rng);

        let initial = round_ms(self.sample_initial_delay(rng));
        clock.wait(initial, ActionMetadata::reason(Reason::InitialDelay));

        for (i, action) in actions.iter().enumerate() {
            match action.kind {
                ActionKind::Send => {
                    let len = action.text_len();
                    if !clock.typing {
                        let entry = ms_between(
                            rng,
                            self.config.entry_delay_min_ms,
                            self.config.entry_delay_max_ms,
                        );
                        clock.wait(entry, ActionMetadata::reason(Reason::TypingEntryDelay));
                        clock.start_typing(ActionMetadata {
                            text_length: Some(len),
                            ..Default::default()
                        });
                    }

                    let lead = self.config.lead_time_ms(len) as f64 / 1000.0;
                    clock.wait(lead, ActionMetadata::reason(Reason::TypingLeadTime));
                    clock.emit(action.clone());

                    let next_is_send = actions
                        .get(i + 1)
                        .is_some_and(|next| next.kind == ActionKind::Send);
                    if !(len > self.config.keep_typing_min_chars && next_is_send) {
                        clock.stop_typing();
                    }
                }
                ActionKind::Pause | ActionKind::Wait => {
                    clock.wait(action.duration, action.metadata.clone());
                }
                ActionKind::Recall | ActionKind::Image => {
                    clock.stop_typing();
                    clock.emit(action.clone());
                }
                ActionKind::TypingStart => clock.start_typing(action.metadata.clone()),
                ActionKind::TypingEnd => clock.stop_typing(),
            }
        }

        clock.stop_typing();
        clock.out
    }

    /// False-start typing bursts before the real reply. Emitted outside the
    /// clock's typing state so the first send still opens its own bracket.
    fn hesitate(&self, clock: &mut Clock, rng: &mut impl Rng) {
        if !chance(rng, self.config.hesitation_probability) {
            return;
        }
        let (lo, hi) = ordered(
            self.config.hesitation_cycles_min,
            self.config.hesitation_cycles_max,
        );
        let cycles = rng.gen_range(lo..=hi);

        for cycle in 0..cycles {
            let duration = ms_between(
                rng,
                self.config.hesitation_duration_min_ms,
                self.config.hesitation_duration_max_ms,
            );
            clock.emit(PlaybackAction::typing_start().with_reason(Reason::Hesitation));
            clock.wait(duration, ActionMetadata::reason(Reason::Hesitation));
            clock.emit(PlaybackAction::typing_end().with_reason(Reason::Hesitation));

            if cycle + 1 < cycles && chance(rng, self.config.hesitation_gap_probability) {
                let gap = ms_between(
                    rng,
                    self.config.hesitation_gap_min_ms,
                    self.config.hesitation_gap_max_ms,
                );
                clock.wait(gap, ActionMetadata::reason(Reason::HesitationGap));
            }
        }
    }

    fn sample_initial_delay(&self, rng: &mut impl Rng) -> f64 {
        let roll: f64 = rng.gen();
        let buckets = &self.config.initial_delay_buckets;
        let bucket = buckets
            .iter()
            .find(|b| roll < b.cumulative_weight)
            .unwrap_or(&buckets[buckets.len() - 1]);
        secs_between(rng, bucket.min_secs, bucket.max_secs)
    }
}

fn chance(rng: &mut impl Rng, p: f64) -> bool {
    rng.gen::<f64>() < p
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if b < a {
        (b, a)
    } else {
        (a, b)
    }
}

/// Whole milliseconds in `[min_ms, max_ms]`, returned as seconds.
fn ms_between(rng: &mut impl Rng, min_ms: u64, max_ms: u64) -> f64 {
    let (lo, hi) = ordered(min_ms, max_ms);
    rng.gen_range(lo..=hi) as f64 / 1000.0
}

fn secs_between(rng: &mut impl Rng, min: f64, max: f64) -> f64 {
    let min = finite_or(min, 0.0);
    let (lo, hi) = ordered(min.max(0.0), finite_or(max, min).max(0.0));
    if lo >= hi {
        return lo;
    }
    rng.gen_range(lo..=hi)
}

fn round_ms(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
