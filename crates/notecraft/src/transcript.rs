//! The transcript being summarized.

use crate::error::LlmError;
use crate::llm::TokenCounter;

/// Immutable lecture transcript. Token counts are computed on demand because
/// they depend on which tokenizer (or heuristic) the run uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    content: String,
}

impl Transcript {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Read a transcript from a UTF-8 text file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    /// True when there is nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub async fn token_count(&self, counter: &TokenCounter<'_>) -> Result<usize, LlmError> {
        counter.count(&self.content).await
    }
}

impl From<String> for Transcript {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

impl From<&str> for Transcript {
    fn from(content: &str) -> Self {
        Self::new(content)
    }
}
