//! Heuristic coherence score for recognizer output.
//!
//! Garbled recognitions tend to come out as a string of short unrelated
//! fragments or as one syllable repeated. Both show up in character bigram
//! statistics, which is all this scorer looks at.

use std::collections::{HashMap, HashSet};

const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '\n'];
const TRAILING_PUNCTUATION: &[char] = &['、', '。', ',', '．', '，', '…'];
/// Unpunctuated runs longer than this get a sentence break at the next space.
const LONG_RUN_CHARS: usize = 80;
const CLEAN_MIN_SIMILARITY: f32 = 0.25;
const CLEAN_MIN_KEEP: usize = 2;

type Bigram = (char, char);

pub struct CoherenceFilter {
    threshold: f32,
    min_fragment_chars: usize,
    fillers: HashSet<String>,
}

impl CoherenceFilter {
    pub fn new(threshold: f32, min_fragment_chars: usize, fillers: &[String]) -> Self {
        Self {
            threshold,
            min_fragment_chars,
            fillers: fillers.iter().cloned().collect(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn add_filler(&mut self, filler: impl Into<String>) {
        let filler = filler.into();
        if !filler.is_empty() {
            self.fillers.insert(filler);
        }
    }

    /// Coherence of `text` in `[0, 1]`, higher is more coherent.
    ///
    /// Text with no sentences left after dropping fillers scores 0.
    pub fn score(&self, text: &str) -> f32 {
        let sentences = self.sentences(text);
        match sentences.as_slice() {
            [] => 0.0,
            [sentence] => {
                let chars: Vec<char> = sentence.chars().collect();
                let base = if chars.len() >= self.min_fragment_chars { 1.0 } else { 0.5 };
                let penalty = 0.15 * (repetition_ratio(&chars) * 3.0).min(1.0);
                clip01(base - penalty)
            }
            _ => {
                let grams: Vec<HashSet<Bigram>> = sentences.iter().map(|s| bigrams(s)).collect();
                let similarities: Vec<f32> = grams.windows(2).map(|w| jaccard(&w[0], &w[1])).collect();
                let mean = similarities.iter().sum::<f32>() / similarities.len() as f32;

                let fragments = sentences
                    .iter()
                    .filter(|s| s.chars().count() < self.min_fragment_chars)
                    .count() as f32
                    / sentences.len() as f32;
                let joined: Vec<char> = sentences.iter().flat_map(|s| s.chars()).collect();
                let repetition = (repetition_ratio(&joined) * 3.0).min(1.0);

                let penalty = 0.10 * (0.6 * fragments + 0.4 * repetition);
                clip01(0.90 * clip01(mean) - penalty)
            }
        }
    }

    /// Whether `text` scores below the threshold, with the score.
    pub fn is_incoherent(&self, text: &str) -> (bool, f32) {
        let score = self.score(text);
        (score < self.threshold, score)
    }

    /// Keep only the sentences that stay on the main topic.
    ///
    /// The sentence most similar to all others is taken as the topic; the
    /// closest sentences to it are kept in their original order.
    pub fn clean_text(&self, text: &str) -> String {
        let sentences = self.sentences(text);
        if sentences.len() <= 1 {
            return text.trim().to_string();
        }

        let grams: Vec<HashSet<Bigram>> = sentences.iter().map(|s| bigrams(s)).collect();
        let neighborhood: Vec<f32> = grams
            .iter()
            .enumerate()
            .map(|(i, gi)| {
                let total: f32 = grams
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, gj)| jaccard(gi, gj))
                    .sum();
                total / (grams.len() - 1).max(1) as f32
            })
            .collect();

        // First maximum wins ties.
        let mut center = 0;
        for (i, &value) in neighborhood.iter().enumerate() {
            if value > neighborhood[center] {
                center = i;
            }
        }

        let mut ranked: Vec<(f32, usize)> = grams
            .iter()
            .enumerate()
            .map(|(i, g)| (jaccard(&grams[center], g), i))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

        let keep = CLEAN_MIN_KEEP.max(sentences.len().div_ceil(2));
        let mut picked: Vec<usize> = ranked
            .into_iter()
            .filter(|&(similarity, _)| similarity >= CLEAN_MIN_SIMILARITY)
            .map(|(_, i)| i)
            .take(keep)
            .collect();
        picked.sort_unstable();

        picked
            .iter()
            .map(|&i| sentences[i].as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    /// Split into sentences, dropping any that are only a filler word.
    fn sentences(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        let mut sentences = Vec::new();
        let mut current = String::new();
        for c in normalized.chars() {
            current.push(c);
            if SENTENCE_TERMINATORS.contains(&c) {
                sentences.push(std::mem::take(&mut current));
            }
        }
        sentences.push(current);

        sentences
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .filter(|s| !self.fillers.contains(s.trim_end_matches(TRAILING_PUNCTUATION)))
            .collect()
    }
}

/// Collapse whitespace and break overlong unpunctuated runs.
fn normalize(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut run = 0;
    for c in collapsed.chars() {
        if c == ' ' && run >= LONG_RUN_CHARS {
            out.push_str("。 ");
            run = 0;
            continue;
        }
        out.push(c);
        run += 1;
    }
    out
}

fn bigrams(sentence: &str) -> HashSet<Bigram> {
    let chars: Vec<char> = sentence.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

fn jaccard(a: &HashSet<Bigram>, b: &HashSet<Bigram>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Share of bigram occurrences that belong to a bigram seen more than once.
fn repetition_ratio(chars: &[char]) -> f32 {
    if chars.len() < 2 {
        return 0.0;
    }
    let mut counts: HashMap<Bigram, usize> = HashMap::new();
    for w in chars.windows(2) {
        *counts.entry((w[0], w[1])).or_default() += 1;
    }
    let repeats: usize = counts.values().filter(|&&n| n > 1).sum();
    repeats as f32 / (chars.len() - 1) as f32
}

fn clip01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}
