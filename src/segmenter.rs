use anyhow::Result;

/// Splits a reply into message-sized chunks.
pub trait Segmenter: Send + Sync {
    fn segment(&self, text: &str) -> Result<Vec<String>>;
}

/// Sentence and clause punctuation (ASCII and full-width) plus dashes.
const SPLIT_CHARS: &[char] = &[
    '。', '，', '．', ',', '.', '！', '？', '!', '?', '；', ';', '—', '-', '－',
];

const TRAILING_TRIM_CHARS: &[char] = &[',', '，', '.', '。'];

#[derive(Debug, Clone)]
pub struct RuleBasedSegmenter {
    max_length: usize,
}

impl RuleBasedSegmenter {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for RuleBasedSegmenter {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Segmenter for RuleBasedSegmenter {
    fn segment(&self, text: &str) -> Result<Vec<String>> {
        let mut segments = Vec::new();
        let mut buf = String::new();
        let mut buf_len = 0usize;

        for c in text.chars() {
            buf.push(c);
            buf_len += 1;

            if !SPLIT_CHARS.contains(&c) && buf_len < self.max_length {
                continue;
            }

            push_chunk(&mut segments, &buf);
            buf.clear();
            buf_len = 0;
        }
        push_chunk(&mut segments, &buf);

        Ok(segments)
    }
}

fn push_chunk(segments: &mut Vec<String>, buf: &str) {
    let chunk = trim_trailing_punctuation(buf);
    if !chunk.is_empty() {
        segments.push(chunk.to_string());
    }
}

/// Drop one trailing comma or period. A longer run (an ellipsis such as `。。。`
/// or `..`) is left untouched.
pub fn trim_trailing_punctuation(text: &str) -> &str {
    let trimmed = text.trim();
    let run = trimmed
        .chars()
        .rev()
        .take_while(|c| TRAILING_TRIM_CHARS.contains(c))
        .count();
    if run != 1 {
        return trimmed;
    }
    let mut chars = trimmed.chars();
    chars.next_back();
    chars.as_str().trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, max: usize) -> Vec<String> {
        RuleBasedSegmenter::new(max).segment(text).unwrap()
    }

    #[test]
    fn splits_on_full_width_and_ascii_punctuation() {
        assert_eq!(
            seg("你好！我是Rin。今天天气真不错。", 50),
            vec!["你好！", "我是Rin", "今天天气真不错"]
        );
        assert_eq!(seg("ok, see you. bye!", 50), vec!["ok", "see you", "bye!"]);
    }

    #[test]
    fn forces_split_at_max_length() {
        let chunks = seg("一二三四五六七八九十", 4);
        assert_eq!(chunks, vec!["一二三四", "五六七八", "九十"]);
    }

    #[test]
    fn drops_empty_chunks() {
        assert_eq!(seg("。。，  ,", 10), Vec::<String>::new());
        assert_eq!(seg("   ", 10), Vec::<String>::new());
    }

    #[test]
    fn trims_single_trailing_mark_only() {
        assert_eq!(trim_trailing_punctuation("好的。"), "好的");
        assert_eq!(trim_trailing_punctuation("好的 ，"), "好的");
        assert_eq!(trim_trailing_punctuation("嗯。。。"), "嗯。。。");
        assert_eq!(trim_trailing_punctuation("wait.."), "wait..");
        assert_eq!(trim_trailing_punctuation("真的？"), "真的？");
    }
}
