//! Storage abstraction for askbase.
//!
//! The [`Store`] trait is the durable side of the system: versioned
//! documents, embedded chunks behind both a lexical and a vector index,
//! daily digests, the Q&A log, and captured community messages.
//!
//! Implementations must keep the two indexes in lockstep. A chunk is
//! written together with its vector or not at all, and only chunks of the
//! active version of a document are ever returned by a query.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{
    Chunk, CommunityMessage, DigestEntry, Document, EmbeddedChunk, EvidenceKind, Passage, QaLog,
    QaMatch,
};

/// A passage returned by one retrieval index with that index's raw score
/// (BM25 relevance or cosine similarity).
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub passage: Passage,
    pub raw_score: f64,
}

/// Row counts reported by `askbase stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: u64,
    pub active_documents: u64,
    pub chunks: u64,
    pub active_chunks: u64,
    pub digests: u64,
    pub qa_logs: u64,
    pub messages: u64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document_version`](Store::insert_document_version) | Add a new, still inactive version |
/// | [`upsert_chunks`](Store::upsert_chunks) | Atomically write a batch of chunk + vector pairs |
/// | [`deactivate_previous_versions`](Store::deactivate_previous_versions) | Activate one version, deactivate the rest |
/// | [`lexical_query`](Store::lexical_query) | BM25 over active chunks |
/// | [`vector_query`](Store::vector_query) | Cosine similarity over active chunks |
/// | [`digest_query`](Store::digest_query) | Cosine similarity over digests |
/// | [`log_qa`](Store::log_qa) / [`similar_qa`](Store::similar_qa) | Q&A history |
#[async_trait]
pub trait Store: Send + Sync {
    /// The active version of `title`, if any.
    async fn active_document(&self, title: &str) -> Result<Option<Document>>;

    /// Highest version number ever stored for `title`, or 0.
    async fn latest_version(&self, title: &str) -> Result<i64>;

    /// Insert a new document version. It stays invisible to queries until
    /// [`deactivate_previous_versions`](Store::deactivate_previous_versions)
    /// activates it.
    async fn insert_document_version(&self, doc: &Document) -> Result<()>;

    /// Write chunks with their vectors in a single transaction.
    async fn upsert_chunks(&self, batch: &[EmbeddedChunk]) -> Result<()>;

    /// Make `keep_id` the only active version of `title`. Returns how many
    /// previously active versions were deactivated.
    async fn deactivate_previous_versions(&self, title: &str, keep_id: &str) -> Result<u64>;

    /// Delete a document version with its chunks and vectors.
    async fn delete_document(&self, id: &str) -> Result<()>;

    async fn list_documents(&self, include_inactive: bool) -> Result<Vec<Document>>;

    /// Chunks of a document version in index order.
    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Previously stored vectors for the given chunk hashes under `model`.
    async fn cached_vectors(
        &self,
        hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>>;

    /// Full-text ranking over active chunks. Higher score is better.
    async fn lexical_query(&self, query: &str, k: usize) -> Result<Vec<Candidate>>;

    /// Cosine similarity over active chunk vectors.
    async fn vector_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>>;

    /// Cosine similarity over digest vectors.
    async fn digest_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>>;

    /// Insert or replace the digest for `digest.date`.
    async fn upsert_digest(&self, digest: &DigestEntry, vector: &[f32]) -> Result<()>;

    async fn digest_on(&self, date: chrono::NaiveDate) -> Result<Option<DigestEntry>>;

    /// Record an answered question. The question vector, when present,
    /// makes the entry retrievable by [`similar_qa`](Store::similar_qa).
    async fn log_qa(&self, log: &QaLog, question_vector: Option<&[f32]>) -> Result<()>;

    /// Past Q&A entries whose question vector has cosine similarity of at
    /// least `min_similarity`, most similar first.
    async fn similar_qa(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<QaMatch>>;

    async fn record_message(&self, message: &CommunityMessage) -> Result<()>;

    /// Kept messages with `start <= created_at < end`, oldest first.
    async fn kept_messages_between(&self, start: i64, end: i64) -> Result<Vec<CommunityMessage>>;

    /// Delete messages not kept for digests that were created before
    /// `older_than`. Kept messages stay. Returns rows removed.
    async fn purge_messages(&self, older_than: i64) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Build the retrievable form of a document chunk.
pub fn chunk_passage(chunk: &Chunk, title: &str) -> Passage {
    Passage {
        id: chunk.id.clone(),
        kind: EvidenceKind::DocumentChunk,
        document_id: Some(chunk.document_id.clone()),
        title: title.to_string(),
        section: chunk.section.clone(),
        text: chunk.text.clone(),
        token_count: chunk.token_count,
        created_at: chunk.created_at,
    }
}

/// Build the retrievable form of a digest.
pub fn digest_passage(digest: &DigestEntry) -> Passage {
    Passage {
        id: digest.id.clone(),
        kind: EvidenceKind::Digest,
        document_id: None,
        title: digest.title(),
        section: None,
        text: digest.text.clone(),
        token_count: digest.token_count,
        created_at: digest.created_at,
    }
}
