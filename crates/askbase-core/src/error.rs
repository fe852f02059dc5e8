//! Error taxonomy for the retrieval core.
//!
//! Each failure class has its own type so callers can decide whether it
//! is fatal for a document, retryable, or a reason to degrade a query.

use thiserror::Error;

use crate::models::RetrievalSource;

/// Chunking failed for one document. Never affects other documents.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("unreadable document: {0}")]
    Unreadable(String),

    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

/// Embedding capability failures.
///
/// [`EmbeddingError::Transient`] is retried by the embedding manager; every
/// other variant is permanent and aborts the ingestion or query in flight.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("transient embedding failure: {0}")]
    Transient(String),

    #[error("embedding failed: {0}")]
    Permanent(String),

    #[error("embedding failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// One of the two retrieval indexes could not be queried.
#[derive(Debug, Error)]
#[error("{index} index unavailable: {reason}")]
pub struct IndexUnavailableError {
    pub index: RetrievalSource,
    pub reason: String,
}

/// Not even the smallest evidence item fits in the token budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("evidence budget of {budget} tokens cannot fit any candidate (smallest needs {smallest})")]
pub struct BudgetExceededError {
    pub budget: usize,
    pub smallest: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_transient_flag() {
        assert!(EmbeddingError::Transient("429".into()).is_transient());
        assert!(!EmbeddingError::Permanent("401".into()).is_transient());
        assert!(!EmbeddingError::RetriesExhausted {
            attempts: 3,
            last: "503".into()
        }
        .is_transient());
    }

    #[test]
    fn test_index_unavailable_display() {
        let err = IndexUnavailableError {
            index: RetrievalSource::Lexical,
            reason: "no such table: chunks_fts".into(),
        };
        assert_eq!(
            err.to_string(),
            "lexical index unavailable: no such table: chunks_fts"
        );
    }

    #[test]
    fn test_budget_exceeded_display() {
        let err = BudgetExceededError {
            budget: 100,
            smallest: 250,
        };
        assert!(err.to_string().contains("100 tokens"));
        assert!(err.to_string().contains("250"));
    }
}
