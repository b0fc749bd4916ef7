//! Wake, interrupt and farewell detection.
//!
//! Each detector is a [`PhraseMatcher`]. Literal phrase lists, regular
//! expressions and model-backed intent classifiers all plug into the same
//! seam, and [`AnyMatcher`] combines them.

use crate::config::ConversationSection;
use crate::error::{HaloError, Result};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

/// Byte span of a match within the searched text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhraseMatch {
    pub start: usize,
    pub end: usize,
}

impl PhraseMatch {
    /// Text following the match with separators trimmed off.
    pub fn remainder<'a>(&self, text: &'a str) -> &'a str {
        text.get(self.end..)
            .unwrap_or("")
            .trim_start_matches(|c: char| c.is_whitespace() || is_separator(c))
            .trim_end()
    }

    /// Text before and after the match, joined, with separators trimmed off.
    pub fn surrounding(&self, text: &str) -> String {
        let before = text
            .get(..self.start)
            .unwrap_or("")
            .trim_end_matches(|c: char| c.is_whitespace() || is_separator(c))
            .trim_start();
        let after = self.remainder(text).trim_end_matches(is_separator);
        format!("{before}{after}")
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '、' | '。' | '，' | ',' | '.' | '！' | '!' | '？' | '?' | '…')
}

pub trait PhraseMatcher: Send + Sync {
    /// Earliest match in `text`, if any.
    fn find(&self, text: &str) -> Option<PhraseMatch>;

    /// Short description for logs.
    fn describe(&self) -> String;

    fn matches(&self, text: &str) -> bool {
        self.find(text).is_some()
    }
}

impl<T: PhraseMatcher + ?Sized> PhraseMatcher for Box<T> {
    fn find(&self, text: &str) -> Option<PhraseMatch> {
        (**self).find(text)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Case-insensitive substring match against a list of phrases.
pub struct ExactPhraseMatcher {
    phrases: Vec<String>,
    regex: Regex,
}

impl ExactPhraseMatcher {
    /// Returns `None` when no non-blank phrase is given.
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Option<Self> {
        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if phrases.is_empty() {
            return None;
        }

        // Longest first so a phrase wins over its own prefix at the same position.
        let mut ordered = phrases.clone();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.len()));
        let alternation = ordered
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let regex = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .ok()?;

        Some(Self { phrases, regex })
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl PhraseMatcher for ExactPhraseMatcher {
    fn find(&self, text: &str) -> Option<PhraseMatch> {
        self.regex.find(text).map(|m| PhraseMatch {
            start: m.start(),
            end: m.end(),
        })
    }

    fn describe(&self) -> String {
        format!("phrases {:?}", self.phrases)
    }
}

/// Regular expression match.
pub struct PatternMatcher {
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }
}

impl PhraseMatcher for PatternMatcher {
    fn find(&self, text: &str) -> Option<PhraseMatch> {
        self.regex.find(text).map(|m| PhraseMatch {
            start: m.start(),
            end: m.end(),
        })
    }

    fn describe(&self) -> String {
        format!("pattern /{}/", self.regex.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Wake,
    Interrupt,
    Farewell,
}

/// Scores how strongly a transcript expresses an intent.
///
/// Implemented by model-backed classifiers; any `Fn(Intent, &str) -> f32`
/// closure works too.
pub trait IntentClassifier: Send + Sync {
    /// Confidence in `[0, 1]`.
    fn score(&self, intent: Intent, text: &str) -> f32;
}

impl<F> IntentClassifier for F
where
    F: Fn(Intent, &str) -> f32 + Send + Sync,
{
    fn score(&self, intent: Intent, text: &str) -> f32 {
        self(intent, text)
    }
}

/// Matches the whole transcript when a classifier is confident enough.
pub struct IntentMatcher {
    classifier: Arc<dyn IntentClassifier>,
    intent: Intent,
    threshold: f32,
}

impl IntentMatcher {
    pub fn new(classifier: Arc<dyn IntentClassifier>, intent: Intent, threshold: f32) -> Self {
        Self {
            classifier,
            intent,
            threshold,
        }
    }
}

impl PhraseMatcher for IntentMatcher {
    fn find(&self, text: &str) -> Option<PhraseMatch> {
        let score = self.classifier.score(self.intent, text);
        (score >= self.threshold).then_some(PhraseMatch {
            start: 0,
            end: text.len(),
        })
    }

    fn describe(&self) -> String {
        format!("{:?} intent >= {:.2}", self.intent, self.threshold)
    }
}

/// Earliest match among several matchers.
pub struct AnyMatcher {
    matchers: Vec<Box<dyn PhraseMatcher>>,
}

impl AnyMatcher {
    pub fn new(matchers: Vec<Box<dyn PhraseMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn push(&mut self, matcher: Box<dyn PhraseMatcher>) {
        self.matchers.push(matcher);
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl PhraseMatcher for AnyMatcher {
    fn find(&self, text: &str) -> Option<PhraseMatch> {
        self.matchers
            .iter()
            .filter_map(|m| m.find(text))
            .min_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)))
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("any of [{}]", parts.join(", "))
    }
}

/// The three detectors a session consults. `None` disables a detector.
#[derive(Default)]
pub struct MatcherSet {
    pub wake: Option<Box<dyn PhraseMatcher>>,
    pub interrupt: Option<Box<dyn PhraseMatcher>>,
    pub farewell: Option<Box<dyn PhraseMatcher>>,
}

impl MatcherSet {
    /// Build the detectors from phrase and pattern lists.
    ///
    /// An invalid pattern is a configuration error naming the offending key.
    pub fn from_config(config: &ConversationSection) -> Result<Self> {
        Ok(Self {
            wake: build(
                "conversation.wake_patterns",
                &config.wake_phrases,
                &config.wake_patterns,
            )?,
            interrupt: build(
                "conversation.interrupt_patterns",
                &config.interrupt_phrases,
                &config.interrupt_patterns,
            )?,
            farewell: build(
                "conversation.farewell_patterns",
                &config.farewell_phrases,
                &config.farewell_patterns,
            )?,
        })
    }

    /// Add a classifier-backed detector for `intent` next to any existing one.
    pub fn with_classifier(
        mut self,
        intent: Intent,
        classifier: Arc<dyn IntentClassifier>,
        threshold: f32,
    ) -> Self {
        let matcher: Box<dyn PhraseMatcher> =
            Box::new(IntentMatcher::new(classifier, intent, threshold));
        let slot = match intent {
            Intent::Wake => &mut self.wake,
            Intent::Interrupt => &mut self.interrupt,
            Intent::Farewell => &mut self.farewell,
        };
        *slot = Some(match slot.take() {
            Some(existing) => Box::new(AnyMatcher::new(vec![existing, matcher])),
            None => matcher,
        });
        self
    }

    pub fn find(&self, intent: Intent, text: &str) -> Option<PhraseMatch> {
        let slot = match intent {
            Intent::Wake => &self.wake,
            Intent::Interrupt => &self.interrupt,
            Intent::Farewell => &self.farewell,
        };
        slot.as_ref().and_then(|m| m.find(text))
    }

    pub fn has_wake(&self) -> bool {
        self.wake.is_some()
    }
}

fn build(
    key: &str,
    phrases: &[String],
    patterns: &[String],
) -> Result<Option<Box<dyn PhraseMatcher>>> {
    let mut matchers: Vec<Box<dyn PhraseMatcher>> = Vec::new();
    if let Some(exact) = ExactPhraseMatcher::new(phrases) {
        matchers.push(Box::new(exact));
    }
    for pattern in patterns.iter().filter(|p| !p.trim().is_empty()) {
        let matcher = PatternMatcher::new(pattern).map_err(|e| HaloError::ConfigInvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        matchers.push(Box::new(matcher));
    }

    Ok(match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(Box::new(AnyMatcher::new(matchers))),
    })
}
