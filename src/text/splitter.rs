//! Incremental sentence splitting of streamed response text.

const TERMINATORS: &[char] = &['。', '．', '！', '？', '!', '?'];
const COMMAS: &[char] = &['、', '，', ','];

/// Collects streamed fragments and hands out synthesizable spans.
///
/// A span ends at a sentence terminator. A run of `max_len` characters with
/// no terminator is split after its last comma, or cut hard at `max_len`
/// when there is none. Spans are trimmed, and spans without a letter or
/// digit are dropped.
#[derive(Debug)]
pub struct SentenceSplitter {
    max_len: usize,
    buffer: String,
    buffered_chars: usize,
}

impl SentenceSplitter {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            buffer: String::new(),
            buffered_chars: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Add a fragment and return every span it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        let mut spans = Vec::new();
        for c in fragment.chars() {
            self.buffer.push(c);
            self.buffered_chars += 1;

            if TERMINATORS.contains(&c) {
                let span = std::mem::take(&mut self.buffer);
                self.buffered_chars = 0;
                emit(&mut spans, &span);
            } else if self.buffered_chars >= self.max_len {
                self.split_long(&mut spans);
            }
        }
        spans
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.buffered_chars = 0;
        let rest = rest.trim();
        is_speakable(rest).then(|| rest.to_string())
    }

    fn split_long(&mut self, spans: &mut Vec<String>) {
        let cut = self
            .buffer
            .char_indices()
            .rfind(|(_, c)| COMMAS.contains(c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(self.buffer.len());

        let rest = self.buffer.split_off(cut);
        let span = std::mem::replace(&mut self.buffer, rest);
        self.buffered_chars = self.buffer.chars().count();
        emit(spans, &span);
    }
}

fn emit(spans: &mut Vec<String>, span: &str) {
    let span = span.trim();
    if is_speakable(span) {
        spans.push(span.to_string());
    }
}

/// Punctuation alone gives the synthesizer nothing to say.
fn is_speakable(span: &str) -> bool {
    span.chars().any(char::is_alphanumeric)
}
