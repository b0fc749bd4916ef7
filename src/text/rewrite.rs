//! Fixed-string corrections applied to transcripts and responses.

use std::collections::BTreeMap;

/// Applies the configured replacement table to recognized text and strips
/// the assistant's speaker label from generated text.
#[derive(Debug, Clone, Default)]
pub struct TextRewriter {
    replacements: Vec<(String, String)>,
    labels: Vec<String>,
}

impl TextRewriter {
    pub fn new(replacements: &BTreeMap<String, String>, assistant_name: &str) -> Self {
        let replacements = replacements
            .iter()
            .filter(|(from, _)| !from.is_empty())
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();

        let name = assistant_name.trim();
        let labels = if name.is_empty() {
            Vec::new()
        } else {
            vec![format!("{name}:"), format!("{name}：")]
        };

        Self { replacements, labels }
    }

    /// Correct common misrecognitions, such as the assistant's name.
    pub fn transcript(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (from, to) in &self.replacements {
            result = result.replace(from.as_str(), to);
        }
        result
    }

    /// Remove `name:` labels the language model adds to its own lines.
    pub fn response(&self, text: &str) -> String {
        let mut result = text.to_string();
        for label in &self.labels {
            result = result.replace(label.as_str(), "");
        }
        result.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> TextRewriter {
        let mut replacements = BTreeMap::new();
        replacements.insert("晴海".to_string(), "ハロ".to_string());
        replacements.insert("春".to_string(), "ハロ".to_string());
        TextRewriter::new(&replacements, "ハロ")
    }

    #[test]
    fn test_transcript_replacements() {
        assert_eq!(rewriter().transcript("晴海、元気？"), "ハロ、元気？");
        assert_eq!(rewriter().transcript("変更なし"), "変更なし");
    }

    #[test]
    fn test_response_label_is_stripped() {
        assert_eq!(rewriter().response("ハロ: わかった！"), "わかった！");
        assert_eq!(rewriter().response("ハロ：わかった！"), "わかった！");
        assert_eq!(rewriter().response("ハロ、わかった！"), "ハロ、わかった！");
    }

    #[test]
    fn test_empty_name_strips_nothing() {
        let rewriter = TextRewriter::new(&BTreeMap::new(), "  ");
        assert_eq!(rewriter.response(": そのまま"), ": そのまま");
    }
}
