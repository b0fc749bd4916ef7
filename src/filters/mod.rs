//! Recognition quality filters.
//!
//! Every transcript passes through [`QualityFilters::check`] before it can
//! reach wake/interrupt matching or the language model. Checks run cheapest
//! first and the first failing one decides the reason.

pub mod coherence;
pub mod similarity;

use crate::backend::TranscriptCandidate;
use crate::defaults;
use crate::matcher::PhraseMatch;
use std::fmt;

pub use coherence::CoherenceFilter;
pub use similarity::{max_substring_similarity, ratio};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub coherence_threshold: f32,
    pub min_fragment_chars: usize,
    pub similarity_threshold: f32,
    pub min_confidence: f32,
    pub fillers: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            coherence_threshold: defaults::COHERENCE_THRESHOLD,
            min_fragment_chars: defaults::MIN_FRAGMENT_CHARS,
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
            min_confidence: 0.0,
            fillers: defaults::FILLERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Empty,
    LowConfidence { confidence: f32 },
    Incoherent { score: f32 },
    /// Too close to the previously accepted transcript.
    Duplicate { score: f32 },
    /// Too close to what the assistant just said.
    EchoOfAssistant { score: f32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "empty transcript"),
            RejectReason::LowConfidence { confidence } => {
                write!(f, "low confidence ({confidence:.2})")
            }
            RejectReason::Incoherent { score } => write!(f, "incoherent (score {score:.2})"),
            RejectReason::Duplicate { score } => write!(f, "duplicate (similarity {score:.2})"),
            RejectReason::EchoOfAssistant { score } => {
                write!(f, "echo of assistant (similarity {score:.2})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Similarity against the last accepted transcript and the assistant's
/// last spoken text.
pub struct SimilarityFilter {
    threshold: f32,
    last_accepted: Option<String>,
    last_spoken: Option<String>,
}

impl SimilarityFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_accepted: None,
            last_spoken: None,
        }
    }

    pub fn check(&self, text: &str) -> Option<RejectReason> {
        self.check_echo(text).or_else(|| {
            let previous = self.last_accepted.as_deref()?;
            let (score, _) = max_substring_similarity(text, previous);
            (score > self.threshold).then_some(RejectReason::Duplicate { score })
        })
    }

    /// Only the comparison against the assistant's own speech.
    pub fn check_echo(&self, text: &str) -> Option<RejectReason> {
        let spoken = self.last_spoken.as_deref()?;
        let (score, _) = max_substring_similarity(text, spoken);
        (score > self.threshold).then_some(RejectReason::EchoOfAssistant { score })
    }

    pub fn remember_accepted(&mut self, text: &str) {
        self.last_accepted = Some(text.to_string());
    }

    pub fn remember_spoken(&mut self, text: &str) {
        self.last_spoken = (!text.trim().is_empty()).then(|| text.to_string());
    }

    pub fn last_accepted(&self) -> Option<&str> {
        self.last_accepted.as_deref()
    }
}

/// Coherence and similarity filtering of recognizer output.
pub struct QualityFilters {
    min_confidence: f32,
    coherence: CoherenceFilter,
    similarity: SimilarityFilter,
}

impl QualityFilters {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            coherence: CoherenceFilter::new(
                config.coherence_threshold,
                config.min_fragment_chars,
                &config.fillers,
            ),
            similarity: SimilarityFilter::new(config.similarity_threshold),
        }
    }

    /// Judge a candidate. An accepted candidate becomes the reference for
    /// duplicate detection.
    pub fn check(&mut self, candidate: &TranscriptCandidate) -> Verdict {
        let text = candidate.text.trim();
        if text.is_empty() {
            return Verdict::Reject(RejectReason::Empty);
        }
        if candidate.confidence < self.min_confidence {
            return Verdict::Reject(RejectReason::LowConfidence {
                confidence: candidate.confidence,
            });
        }
        let (incoherent, score) = self.coherence.is_incoherent(text);
        if incoherent {
            return Verdict::Reject(RejectReason::Incoherent { score });
        }
        if let Some(reason) = self.similarity.check(text) {
            return Verdict::Reject(reason);
        }

        self.similarity.remember_accepted(text);
        Verdict::Accept
    }

    /// Screen a transcript in which a command phrase was found at `found`.
    ///
    /// Commands are too short for the coherence score and are expected to
    /// repeat, so only emptiness, confidence and echo are checked. The
    /// assistant may say the command words itself, so only the words around
    /// the phrase are compared with its speech. Nothing is remembered.
    pub fn check_command(&self, candidate: &TranscriptCandidate, found: PhraseMatch) -> Verdict {
        let text = candidate.text.trim();
        if text.is_empty() {
            return Verdict::Reject(RejectReason::Empty);
        }
        if candidate.confidence < self.min_confidence {
            return Verdict::Reject(RejectReason::LowConfidence {
                confidence: candidate.confidence,
            });
        }
        let rest = found.surrounding(&candidate.text);
        if rest.is_empty() {
            return Verdict::Accept;
        }
        match self.similarity.check_echo(&rest) {
            Some(reason) => Verdict::Reject(reason),
            None => Verdict::Accept,
        }
    }

    /// Record what the assistant said so its echo can be recognized.
    pub fn assistant_spoke(&mut self, text: &str) {
        self.similarity.remember_spoken(text);
    }

    /// Drop off-topic sentences from an accepted transcript.
    pub fn clean(&self, text: &str) -> String {
        self.coherence.clean_text(text)
    }

    pub fn coherence(&self) -> &CoherenceFilter {
        &self.coherence
    }

    pub fn similarity(&self) -> &SimilarityFilter {
        &self.similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str) -> TranscriptCandidate {
        TranscriptCandidate::new(text, 1)
    }

    #[test]
    fn test_accepts_clean_transcript() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        assert_eq!(filters.check(&candidate("今日の天気を教えてください")), Verdict::Accept);
        assert_eq!(
            filters.similarity().last_accepted(),
            Some("今日の天気を教えてください")
        );
    }

    #[test]
    fn test_rejects_empty() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        assert_eq!(
            filters.check(&candidate("  ")),
            Verdict::Reject(RejectReason::Empty)
        );
    }

    #[test]
    fn test_rejects_low_confidence() {
        let config = FilterConfig {
            min_confidence: 0.5,
            ..FilterConfig::default()
        };
        let mut filters = QualityFilters::new(&config);
        let verdict = filters.check(&candidate("今日の天気を教えてください").with_confidence(0.2));
        assert_eq!(
            verdict,
            Verdict::Reject(RejectReason::LowConfidence { confidence: 0.2 })
        );
    }

    #[test]
    fn test_rejects_incoherent() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        let verdict = filters.check(&candidate("冷蔵庫。予算案が。明日は。"));
        assert!(matches!(
            verdict,
            Verdict::Reject(RejectReason::Incoherent { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_of_previous_transcript() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        assert!(filters.check(&candidate("今日の天気を教えてください")).is_accept());

        let verdict = filters.check(&candidate("今日の天気を教えてくださいね"));
        match verdict {
            Verdict::Reject(RejectReason::Duplicate { score }) => assert!(score > 0.9),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn test_rejected_candidate_does_not_replace_reference() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        assert!(filters.check(&candidate("今日の天気を教えてください")).is_accept());
        assert!(!filters.check(&candidate("冷蔵庫。予算案が。明日は。")).is_accept());
        assert_eq!(
            filters.similarity().last_accepted(),
            Some("今日の天気を教えてください")
        );
    }

    #[test]
    fn test_rejects_echo_of_assistant() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        filters.assistant_spoke("明日は晴れのち曇り、夕方から雨が降る見込みです。傘を持って出かけてください。");

        let verdict = filters.check(&candidate("夕方から雨が降る見込みです"));
        assert!(matches!(
            verdict,
            Verdict::Reject(RejectReason::EchoOfAssistant { .. })
        ));
    }

    #[test]
    fn test_distinct_followup_is_accepted() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        assert!(filters.check(&candidate("今日の天気を教えてください")).is_accept());
        assert!(filters.check(&candidate("おすすめの映画を探しています")).is_accept());
    }

    /// Match span of `phrase` inside `text`.
    fn span(text: &str, phrase: &str) -> PhraseMatch {
        let start = text.find(phrase).unwrap();
        PhraseMatch {
            start,
            end: start + phrase.len(),
        }
    }

    #[test]
    fn test_command_screen_skips_coherence_and_duplicates() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        // A repeated short word scores as incoherent.
        assert!(!filters.check(&candidate("バイバイ")).is_accept());
        let found = span("バイバイ", "バイバイ");
        assert!(filters.check_command(&candidate("バイバイ"), found).is_accept());
        assert!(filters.check_command(&candidate("バイバイ"), found).is_accept());
        assert_eq!(
            filters.check_command(&candidate("  "), PhraseMatch { start: 0, end: 0 }),
            Verdict::Reject(RejectReason::Empty)
        );
    }

    #[test]
    fn test_command_echo_is_judged_on_surrounding_words() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        filters.assistant_spoke("ストップと言えば止まります");

        let echo = "ストップと言えば止まります";
        assert!(matches!(
            filters.check_command(&candidate(echo), span(echo, "ストップ")),
            Verdict::Reject(RejectReason::EchoOfAssistant { .. })
        ));
        assert!(
            filters
                .check_command(&candidate("ストップ"), span("ストップ", "ストップ"))
                .is_accept()
        );
        assert!(
            filters
                .check_command(&candidate("ストップ！"), span("ストップ！", "ストップ"))
                .is_accept()
        );
    }

    #[test]
    fn test_command_word_said_by_assistant_still_counts() {
        let mut filters = QualityFilters::new(&FilterConfig::default());
        filters.assistant_spoke("ハロ、わかった！");

        assert!(
            filters
                .check_command(&candidate("ハロ"), span("ハロ", "ハロ"))
                .is_accept()
        );
        let echo = "ハロ、わかった";
        assert!(!filters.check_command(&candidate(echo), span(echo, "ハロ")).is_accept());
    }

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(
            RejectReason::Duplicate { score: 0.95 }.to_string(),
            "duplicate (similarity 0.95)"
        );
        assert_eq!(RejectReason::Empty.to_string(), "empty transcript");
    }
}
