//! Text handling between the language model and the synthesizer.

pub mod rewrite;
pub mod splitter;

pub use rewrite::TextRewriter;
pub use splitter::SentenceSplitter;
