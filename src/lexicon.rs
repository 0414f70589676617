use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, ensure, Context, Result};

const BUILTIN: &str = include_str!("../data/lexicon.txt");

/// Longest word the tokenizer tries to match.
const MAX_WORD_CHARS: usize = 4;

#[derive(Debug, Clone)]
struct Entry {
    freq: u64,
    readings: Vec<String>,
}

/// Loaded from lines of `word freq syllable...`, one toneless pinyin syllable
/// per character. A word may appear on several lines with different readings.
#[derive(Debug, Clone, Default)]
pub struct PhoneticLexicon {
    entries: HashMap<String, Entry>,
    by_reading: HashMap<String, Vec<String>>,
    max_freq: u64,
}

/// A token produced by [`PhoneticLexicon::tokenize`]; `start` counts chars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub text: String,
}

impl Token {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl PhoneticLexicon {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN).context("built-in lexicon is malformed")
    }

    /// The built-in lexicon, parsed once per process.
    pub fn shared_builtin() -> Result<Arc<Self>> {
        static SHARED: OnceLock<Arc<PhoneticLexicon>> = OnceLock::new();
        if let Some(lex) = SHARED.get() {
            return Ok(lex.clone());
        }
        let lex = Arc::new(Self::builtin()?);
        Ok(SHARED.get_or_init(|| lex).clone())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lexicon {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed to parse lexicon {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut lex = PhoneticLexicon::default();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let word = fields
                .next()
                .ok_or_else(|| anyhow!("line {}: missing word", lineno + 1))?;
            let freq: u64 = fields
                .next()
                .ok_or_else(|| anyhow!("line {}: missing frequency", lineno + 1))?
                .parse()
                .with_context(|| format!("line {}: bad frequency", lineno + 1))?;
            let syllables: Vec<&str> = fields.collect();
            ensure!(
                syllables.len() == word.chars().count(),
                "line {}: {} has {} syllables for {} chars",
                lineno + 1,
                word,
                syllables.len(),
                word.chars().count()
            );
            lex.insert(word, freq, &syllables.join(" "));
        }
        ensure!(!lex.entries.is_empty(), "lexicon has no entries");
        Ok(lex)
    }

    fn insert(&mut self, word: &str, freq: u64, reading: &str) {
        let entry = self.entries.entry(word.to_string()).or_insert(Entry {
            freq: 0,
            readings: Vec::new(),
        });
        entry.freq = entry.freq.max(freq);
        if !entry.readings.iter().any(|r| r == reading) {
            entry.readings.push(reading.to_string());
            self.by_reading
                .entry(reading.to_string())
                .or_default()
                .push(word.to_string());
        }
        self.max_freq = self.max_freq.max(freq);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(word)
    }

    pub fn freq(&self, word: &str) -> u64 {
        self.entries.get(word).map(|e| e.freq).unwrap_or(0)
    }

    pub fn max_freq(&self) -> u64 {
        self.max_freq
    }

    /// Other entries sharing any reading of `word`, most frequent first.
    pub fn homophones(&self, word: &str) -> Vec<&str> {
        let Some(entry) = self.entries.get(word) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = Vec::new();
        for reading in &entry.readings {
            for other in self.by_reading.get(reading).into_iter().flatten() {
                if other != word && !out.contains(&other.as_str()) {
                    out.push(other);
                }
            }
        }
        out.sort_by(|a, b| self.freq(b).cmp(&self.freq(a)).then_with(|| a.cmp(b)));
        out
    }

    /// Forward maximum matching. Characters not covered by a known word come
    /// out as single-char tokens; runs of ASCII alphanumerics stay together.
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let chars: Vec<char> = text.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i].is_ascii_alphanumeric() {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                tokens.push(Token {
                    start,
                    text: chars[start..i].iter().collect(),
                });
                continue;
            }

            let longest = (2..=MAX_WORD_CHARS.min(chars.len() - i))
                .rev()
                .find(|&n| {
                    let candidate: String = chars[i..i + n].iter().collect();
                    self.contains(&candidate)
                })
                .unwrap_or(1);
            tokens.push(Token {
                start: i,
                text: chars[i..i + longest].iter().collect(),
            });
            i += longest;
        }
        tokens
    }
}

pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}
