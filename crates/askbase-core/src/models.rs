//! Core data models that flow through ingestion and retrieval.
//!
//! Timestamps are Unix seconds. Documents and chunks are never edited in
//! place: re-ingestion produces a new document version with fresh chunks,
//! and only one version per title is active at a time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One version of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Starts at 1 and increments on every re-ingestion of the same title.
    pub version: i64,
    /// Originating source identifier (file name, URL, upload name).
    pub source: String,
    /// SHA-256 over the extracted text and the chunking parameters.
    pub content_hash: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A bounded passage of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Deterministic UUIDv5 of `(document_id, chunk_index)`.
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Heading the chunk falls under, if the document has headings.
    pub section: Option<String>,
    pub text: String,
    pub token_count: usize,
    /// SHA-256 of `text`, used as the embedding cache key.
    pub hash: String,
    /// Free-form metadata, e.g. `{"page": 3}`.
    pub metadata_json: String,
    /// Set when an unsplittable token run exceeded the chunk limit.
    pub oversized: bool,
    pub created_at: i64,
}

/// A chunk paired with its embedding. The store only accepts chunks in
/// this form, so a chunk can never be indexed lexically without a vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model: String,
}

/// Summary of one calendar day of community discussion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub id: String,
    pub date: NaiveDate,
    pub text: String,
    pub token_count: usize,
    /// e.g. `{"message_count": 42, "chat_ids": [..], "user_count": 7}`.
    pub metadata_json: String,
    pub created_at: i64,
}

impl DigestEntry {
    /// Title used for citations, e.g. `Digest-2025-03-14`.
    pub fn title(&self) -> String {
        digest_title(self.date)
    }
}

pub fn digest_title(date: NaiveDate) -> String {
    format!("Digest-{}", date.format("%Y-%m-%d"))
}

/// A previously answered question. Auxiliary evidence only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaLog {
    pub id: String,
    pub question: String,
    pub answer: String,
    /// Citation labels of the evidence the answer was built from.
    pub sources: Vec<String>,
    pub latency_ms: i64,
    /// Who asked, as reported by the calling context.
    pub asked_by: Option<String>,
    pub created_at: i64,
}

/// A past Q&A entry matched against a new question.
#[derive(Debug, Clone, PartialEq)]
pub struct QaMatch {
    pub log: QaLog,
    pub similarity: f64,
}

/// A chat message captured for digest generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityMessage {
    pub id: String,
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: String,
    pub category: String,
    pub kept: bool,
    pub created_at: i64,
}

/// Which retrieval index produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Lexical,
    Vector,
}

impl std::fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalSource::Lexical => write!(f, "lexical"),
            RetrievalSource::Vector => write!(f, "vector"),
        }
    }
}

/// What kind of unit a piece of evidence is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// A chunk of an uploaded document. The only primary source.
    DocumentChunk,
    /// A daily community digest.
    Digest,
    /// A previously logged question and answer.
    PriorQa,
}

/// A retrievable unit of text with everything needed to rank, budget,
/// and cite it without further store round-trips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    /// Chunk id or digest id.
    pub id: String,
    pub kind: EvidenceKind,
    pub document_id: Option<String>,
    pub title: String,
    pub section: Option<String>,
    pub text: String,
    pub token_count: usize,
    pub created_at: i64,
}

impl Passage {
    /// Human-readable citation label: `Title - Section` or `Title`.
    pub fn citation_label(&self) -> String {
        match self.section.as_deref() {
            Some(section) if !section.is_empty() => format!("{} - {}", self.title, section),
            _ => self.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(section: Option<&str>) -> Passage {
        Passage {
            id: "c1".into(),
            kind: EvidenceKind::DocumentChunk,
            document_id: Some("d1".into()),
            title: "AI-OFM Basics".into(),
            section: section.map(String::from),
            text: "text".into(),
            token_count: 1,
            created_at: 0,
        }
    }

    #[test]
    fn test_citation_label_with_section() {
        assert_eq!(
            passage(Some("Prompting")).citation_label(),
            "AI-OFM Basics - Prompting"
        );
    }

    #[test]
    fn test_citation_label_without_section() {
        assert_eq!(passage(None).citation_label(), "AI-OFM Basics");
        assert_eq!(passage(Some("")).citation_label(), "AI-OFM Basics");
    }

    #[test]
    fn test_digest_title() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(digest_title(date), "Digest-2025-03-14");
    }
}
