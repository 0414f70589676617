use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use rand::Rng;
use rand_distr::{Bernoulli, Distribution};
use tracing::{debug, warn};

use crate::keyboard::qwerty_adjacent_char;
use crate::lexicon::{is_cjk, PhoneticLexicon};

const WORD_ACCEPT_THRESHOLD: f64 = 0.5;
const CHAR_ACCEPT_THRESHOLD: f64 = 0.5;
const CHAR_FALLBACK_PROBABILITY: f64 = 0.6;
/// A generic character swap needs at least this share of the original's frequency.
const CHAR_FREQ_RATIO_GUARD: f64 = 0.1;

const FREQ_WEIGHT: f64 = 4.0;
const SCORE_BIAS: f64 = 2.0;
const LENGTH_PENALTY: f64 = 0.5;
const CONTEXT_BONUS_STEP: f64 = 0.15;
const CONTEXT_BONUS_CAP: f64 = 0.3;
const WHITELIST_BONUS: f64 = 1.0;
const KEYBOARD_LOGIT: f64 = 0.4;
const SCORE_NOISE: f64 = 0.05;

const MAX_WORD_CANDIDATES: usize = 40;
const MAX_CHAR_CANDIDATES: usize = 12;

/// Particles and pronouns people mix up when typing fast.
const CONFUSIONS: &[(char, &[char])] = &[
    ('的', &['地', '得']),
    ('地', &['的', '得']),
    ('得', &['的', '地']),
    ('在', &['再']),
    ('再', &['在']),
    ('做', &['作']),
    ('作', &['做']),
    ('那', &['哪']),
    ('哪', &['那']),
    ('他', &['她']),
    ('她', &['他']),
    ('己', &['已']),
    ('已', &['己']),
    ('吗', &['嘛']),
    ('嘛', &['吗']),
];

#[derive(Debug, Clone, PartialEq)]
pub struct TypoEdit {
    pub text: String,
    /// Char offset of the replaced fragment.
    pub position: usize,
    pub original: String,
    pub replacement: String,
    pub score: f64,
}

#[derive(Debug)]
pub struct TypoInjector {
    lexicon_path: Option<PathBuf>,
    lexicon: OnceLock<Option<Arc<PhoneticLexicon>>>,
}

impl Default for TypoInjector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TypoInjector {
    /// The lexicon is loaded on first use: from `lexicon_path` when given,
    /// the built-in one otherwise.
    pub fn new(lexicon_path: Option<PathBuf>) -> Self {
        Self {
            lexicon_path,
            lexicon: OnceLock::new(),
        }
    }

    pub fn with_lexicon(lexicon: PhoneticLexicon) -> Self {
        Self {
            lexicon_path: None,
            lexicon: OnceLock::from(Some(Arc::new(lexicon))),
        }
    }

    /// Keyboard-adjacency edits only.
    pub fn without_lexicon() -> Self {
        Self {
            lexicon_path: None,
            lexicon: OnceLock::from(None),
        }
    }

    fn lexicon(&self) -> Option<&PhoneticLexicon> {
        self.lexicon
            .get_or_init(|| {
                let loaded = match &self.lexicon_path {
                    Some(path) => PhoneticLexicon::from_path(path).map(Arc::new),
                    None => PhoneticLexicon::shared_builtin(),
                };
                match loaded {
                    Ok(lex) => {
                        debug!(entries = lex.len(), "phonetic lexicon loaded");
                        Some(lex)
                    }
                    Err(err) => {
                        warn!("phonetic lexicon unavailable, CJK typos disabled: {err:#}");
                        None
                    }
                }
            })
            .as_deref()
    }

    /// Maybe corrupt `text` with one plausible typo. `rate` is the chance of
    /// even trying; a try can still come back empty when no edit scores well.
    pub fn inject(&self, text: &str, rate: f64, rng: &mut impl Rng) -> Option<TypoEdit> {
        if text.trim().is_empty() || !rate.is_finite() || rate <= 0.0 {
            return None;
        }
        if !rng.gen_bool(rate.min(1.0)) {
            return None;
        }

        let chars: Vec<char> = text.chars().collect();
        let min_start = (chars.len() / 3).max(1);
        let lexicon = self.lexicon();

        if let Some(lex) = lexicon {
            if let Some(edit) = word_level(lex, &chars, min_start, rng) {
                return Some(edit);
            }
        }

        if !rng.gen_bool(CHAR_FALLBACK_PROBABILITY) {
            return None;
        }
        char_level(lexicon, &chars, min_start, rng)
    }

    pub fn should_recall(&self, probability: f64, rng: &mut impl Rng) -> bool {
        should_recall(probability, rng)
    }
}

pub fn should_recall(probability: f64, rng: &mut impl Rng) -> bool {
    if !probability.is_finite() {
        return false;
    }
    Bernoulli::new(probability.clamp(0.0, 1.0))
        .map(|trial| trial.sample(rng))
        .unwrap_or(false)
}

struct Candidate {
    start: usize,
    end: usize,
    replacement: String,
    score: f64,
}

impl Candidate {
    fn into_edit(self, chars: &[char]) -> TypoEdit {
        let original: String = chars[self.start..self.end].iter().collect();
        let mut text: String = chars[..self.start].iter().collect();
        text.push_str(&self.replacement);
        text.extend(&chars[self.end..]);
        TypoEdit {
            text,
            position: self.start,
            original,
            replacement: self.replacement,
            score: self.score,
        }
    }
}

fn keep_best(best: &mut Option<Candidate>, next: Candidate) {
    if best.as_ref().map_or(true, |b| next.score > b.score) {
        *best = Some(next);
    }
}

fn word_level(
    lex: &PhoneticLexicon,
    chars: &[char],
    min_start: usize,
    rng: &mut impl Rng,
) -> Option<TypoEdit> {
    let text: String = chars.iter().collect();
    let mut best = None;

    for token in lex.tokenize(&text) {
        let len = token.char_len();
        if token.start < min_start || len < 2 || !token.text.chars().all(is_cjk) {
            continue;
        }
        let end = token.start + len;
        for alt in lex.homophones(&token.text).into_iter().take(MAX_WORD_CANDIDATES) {
            let alt_len = alt.chars().count();
            let logit = FREQ_WEIGHT * freq_term(lex, alt)
                + context_bonus(lex, alt, chars, token.start, end)
                - LENGTH_PENALTY * alt_len.abs_diff(len) as f64
                - SCORE_BIAS
                + noise(rng);
            keep_best(
                &mut best,
                Candidate {
                    start: token.start,
                    end,
                    replacement: alt.to_string(),
                    score: sigmoid(logit),
                },
            );
        }
    }

    best.filter(|c| c.score >= WORD_ACCEPT_THRESHOLD)
        .map(|c| c.into_edit(chars))
}

fn char_level(
    lexicon: Option<&PhoneticLexicon>,
    chars: &[char],
    min_start: usize,
    rng: &mut impl Rng,
) -> Option<TypoEdit> {
    let mut best = None;

    for (idx, &c) in chars.iter().enumerate().skip(min_start) {
        if is_cjk(c) {
            let Some(lex) = lexicon else {
                continue;
            };
            if let Some((_, alts)) = CONFUSIONS.iter().find(|(from, _)| *from == c) {
                for alt in alts.iter() {
                    let alt = alt.to_string();
                    let logit = FREQ_WEIGHT * freq_term(lex, &alt) - SCORE_BIAS
                        + WHITELIST_BONUS
                        + noise(rng);
                    keep_best(&mut best, single(idx, alt, sigmoid(logit)));
                }
                continue;
            }

            let original = c.to_string();
            let floor = lex.freq(&original) as f64 * CHAR_FREQ_RATIO_GUARD;
            for alt in lex
                .homophones(&original)
                .into_iter()
                .filter(|alt| alt.chars().count() == 1)
                .take(MAX_CHAR_CANDIDATES)
            {
                if (lex.freq(alt) as f64) < floor {
                    continue;
                }
                let logit = FREQ_WEIGHT * freq_term(lex, alt) - SCORE_BIAS + noise(rng);
                keep_best(&mut best, single(idx, alt.to_string(), sigmoid(logit)));
            }
        } else if let Some(alt) = qwerty_adjacent_char(c, rng) {
            let logit = KEYBOARD_LOGIT + noise(rng);
            keep_best(&mut best, single(idx, alt.to_string(), sigmoid(logit)));
        }
    }

    best.filter(|c| c.score >= CHAR_ACCEPT_THRESHOLD)
        .map(|c| c.into_edit(chars))
}

fn single(idx: usize, replacement: String, score: f64) -> Candidate {
    Candidate {
        start: idx,
        end: idx + 1,
        replacement,
        score,
    }
}

fn freq_term(lex: &PhoneticLexicon, word: &str) -> f64 {
    let max = lex.max_freq();
    if max == 0 {
        return 0.0;
    }
    (1.0 + lex.freq(word) as f64).ln() / (1.0 + max as f64).ln()
}

/// Bonus when the candidate glued to one or two neighbouring chars is itself
/// a known word.
fn context_bonus(
    lex: &PhoneticLexicon,
    candidate: &str,
    chars: &[char],
    start: usize,
    end: usize,
) -> f64 {
    let mut bonus = 0.0;
    for k in 1..=2 {
        if start >= k {
            let mut joined: String = chars[start - k..start].iter().collect();
            joined.push_str(candidate);
            if lex.contains(&joined) {
                bonus += CONTEXT_BONUS_STEP;
            }
        }
        if end + k <= chars.len() {
            let mut joined = candidate.to_string();
            joined.extend(&chars[end..end + k]);
            if lex.contains(&joined) {
                bonus += CONTEXT_BONUS_STEP;
            }
        }
    }
    bonus.min(CONTEXT_BONUS_CAP)
}

fn noise(rng: &mut impl Rng) -> f64 {
    rng.gen_range(-SCORE_NOISE..=SCORE_NOISE)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
