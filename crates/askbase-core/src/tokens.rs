//! Token counting.
//!
//! Chunk limits and the evidence budget are expressed in tokens of the
//! model family that consumes them. [`Cl100kCounter`] uses the `cl100k_base`
//! BPE shared by the OpenAI embedding and chat models. [`WhitespaceCounter`]
//! counts whitespace-separated words and is only an approximation; it is
//! useful when no tokenizer is wanted and in tests that need exact counts.

use tiktoken_rs::CoreBPE;

use crate::error::ChunkingError;

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Identifier recorded alongside chunking parameters (e.g. `"cl100k"`).
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

/// Exact counter for the `cl100k_base` encoding.
pub struct Cl100kCounter {
    bpe: CoreBPE,
}

impl Cl100kCounter {
    pub fn new() -> Result<Self, ChunkingError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| ChunkingError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100kCounter {
    fn name(&self) -> &str {
        "cl100k"
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

/// One token per whitespace-separated word. Approximate.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Build the counter named in configuration.
pub fn counter_for(name: &str) -> Result<Box<dyn TokenCounter>, ChunkingError> {
    match name {
        "cl100k" => Ok(Box::new(Cl100kCounter::new()?)),
        "whitespace" => Ok(Box::new(WhitespaceCounter)),
        other => Err(ChunkingError::InvalidConfig(format!(
            "unknown tokenizer '{}'; use cl100k or whitespace",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_counts_words() {
        let c = WhitespaceCounter;
        assert_eq!(c.count(""), 0);
        assert_eq!(c.count("one"), 1);
        assert_eq!(c.count("  one two\n\nthree\t"), 3);
    }

    #[test]
    fn test_cl100k_counts_tokens() {
        let c = Cl100kCounter::new().unwrap();
        assert_eq!(c.count(""), 0);
        assert!(c.count("hello world") >= 2);
        assert!(c.count("hello world") <= 3);
    }

    #[test]
    fn test_counter_for_unknown() {
        assert!(counter_for("sentencepiece").is_err());
        assert_eq!(counter_for("whitespace").unwrap().name(), "whitespace");
    }
}
