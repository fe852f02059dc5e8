//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All state sits behind one `RwLock`, so every write is atomic with
//! respect to queries. Lexical search is Okapi BM25 computed over the
//! active chunks at query time; vector search is brute-force cosine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::embedding::cosine_similarity;
use crate::index::{lexical_terms, sort_candidates};
use crate::models::{
    Chunk, CommunityMessage, DigestEntry, Document, EmbeddedChunk, QaLog, QaMatch,
    RetrievalSource,
};

use super::{chunk_passage, digest_passage, Candidate, Store, StoreStats};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    model: String,
}

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    chunks: Vec<StoredChunk>,
    digests: BTreeMap<NaiveDate, (DigestEntry, Vec<f32>)>,
    qa: Vec<(QaLog, Option<Vec<f32>>)>,
    messages: Vec<CommunityMessage>,
}

impl State {
    fn active_chunks(&self) -> impl Iterator<Item = (&StoredChunk, &Document)> {
        self.chunks.iter().filter_map(|sc| {
            self.docs
                .get(&sc.chunk.document_id)
                .filter(|d| d.is_active)
                .map(|d| (sc, d))
        })
    }
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    lexical_down: AtomicBool,
    vector_down: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make one index fail every query until switched back. Used to
    /// exercise degraded retrieval.
    pub fn set_unavailable(&self, index: RetrievalSource, down: bool) {
        match index {
            RetrievalSource::Lexical => self.lexical_down.store(down, Ordering::SeqCst),
            RetrievalSource::Vector => self.vector_down.store(down, Ordering::SeqCst),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("store lock poisoned"))
    }
}

fn bm25(state: &State, terms: &[String]) -> Vec<Candidate> {
    let docs: Vec<(&StoredChunk, &Document, Vec<String>)> = state
        .active_chunks()
        .map(|(sc, d)| (sc, d, lexical_terms(&sc.chunk.text)))
        .collect();
    if docs.is_empty() {
        return Vec::new();
    }

    let n = docs.len() as f64;
    let avgdl = docs.iter().map(|(_, _, t)| t.len() as f64).sum::<f64>() / n;
    let unique: HashSet<&String> = terms.iter().collect();

    let idf: HashMap<&String, f64> = unique
        .iter()
        .map(|term| {
            let df = docs.iter().filter(|(_, _, t)| t.contains(term)).count() as f64;
            (*term, (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
        })
        .collect();

    docs.iter()
        .filter_map(|(sc, doc, doc_terms)| {
            let dl = doc_terms.len() as f64;
            let mut score = 0.0;
            for term in &unique {
                let tf = doc_terms.iter().filter(|t| t == term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl.max(1.0));
                score += idf[term] * tf * (BM25_K1 + 1.0) / (tf + norm);
            }
            (score > 0.0).then(|| Candidate {
                passage: chunk_passage(&sc.chunk, &doc.title),
                raw_score: score,
            })
        })
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn active_document(&self, title: &str) -> Result<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .docs
            .values()
            .find(|d| d.title == title && d.is_active)
            .cloned())
    }

    async fn latest_version(&self, title: &str) -> Result<i64> {
        let state = self.read()?;
        Ok(state
            .docs
            .values()
            .filter(|d| d.title == title)
            .map(|d| d.version)
            .max()
            .unwrap_or(0))
    }

    async fn insert_document_version(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        if state.docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        let mut doc = doc.clone();
        doc.is_active = false;
        state.docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn upsert_chunks(&self, batch: &[EmbeddedChunk]) -> Result<()> {
        let mut state = self.write()?;
        if let Some(missing) = batch
            .iter()
            .find(|ec| !state.docs.contains_key(&ec.chunk.document_id))
        {
            bail!("unknown document {}", missing.chunk.document_id);
        }
        for ec in batch {
            state.chunks.retain(|sc| sc.chunk.id != ec.chunk.id);
            state.chunks.push(StoredChunk {
                chunk: ec.chunk.clone(),
                vector: ec.vector.clone(),
                model: ec.model.clone(),
            });
        }
        Ok(())
    }

    async fn deactivate_previous_versions(&self, title: &str, keep_id: &str) -> Result<u64> {
        let mut state = self.write()?;
        if !state.docs.contains_key(keep_id) {
            bail!("unknown document {}", keep_id);
        }
        let now = chrono::Utc::now().timestamp();
        let mut deactivated = 0;
        for doc in state.docs.values_mut().filter(|d| d.title == title) {
            if doc.id == keep_id {
                doc.is_active = true;
                doc.updated_at = now;
            } else if doc.is_active {
                doc.is_active = false;
                doc.updated_at = now;
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut state = self.write()?;
        state.docs.remove(id);
        state.chunks.retain(|sc| sc.chunk.document_id != id);
        Ok(())
    }

    async fn list_documents(&self, include_inactive: bool) -> Result<Vec<Document>> {
        let state = self.read()?;
        let mut docs: Vec<Document> = state
            .docs
            .values()
            .filter(|d| include_inactive || d.is_active)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.title.cmp(&b.title).then(b.version.cmp(&a.version)));
        Ok(docs)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.read()?;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|sc| sc.chunk.document_id == document_id)
            .map(|sc| sc.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn cached_vectors(
        &self,
        hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let wanted: HashSet<&String> = hashes.iter().collect();
        let state = self.read()?;
        Ok(state
            .chunks
            .iter()
            .filter(|sc| sc.model == model && wanted.contains(&sc.chunk.hash))
            .map(|sc| (sc.chunk.hash.clone(), sc.vector.clone()))
            .collect())
    }

    async fn lexical_query(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        if self.lexical_down.load(Ordering::SeqCst) {
            bail!("lexical index offline");
        }
        let terms = lexical_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.read()?;
        let mut candidates = bm25(&state, &terms);
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn vector_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if self.vector_down.load(Ordering::SeqCst) {
            bail!("vector index offline");
        }
        let state = self.read()?;
        let mut candidates: Vec<Candidate> = state
            .active_chunks()
            .map(|(sc, doc)| Candidate {
                passage: chunk_passage(&sc.chunk, &doc.title),
                raw_score: cosine_similarity(vector, &sc.vector) as f64,
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn digest_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        if self.vector_down.load(Ordering::SeqCst) {
            bail!("vector index offline");
        }
        let state = self.read()?;
        let mut candidates: Vec<Candidate> = state
            .digests
            .values()
            .map(|(d, v)| Candidate {
                passage: digest_passage(d),
                raw_score: cosine_similarity(vector, v) as f64,
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn upsert_digest(&self, digest: &DigestEntry, vector: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        state
            .digests
            .insert(digest.date, (digest.clone(), vector.to_vec()));
        Ok(())
    }

    async fn digest_on(&self, date: NaiveDate) -> Result<Option<DigestEntry>> {
        let state = self.read()?;
        Ok(state.digests.get(&date).map(|(d, _)| d.clone()))
    }

    async fn log_qa(&self, log: &QaLog, question_vector: Option<&[f32]>) -> Result<()> {
        let mut state = self.write()?;
        state.qa.push((log.clone(), question_vector.map(|v| v.to_vec())));
        Ok(())
    }

    async fn similar_qa(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<QaMatch>> {
        let state = self.read()?;
        let mut matches: Vec<QaMatch> = state
            .qa
            .iter()
            .filter_map(|(log, v)| {
                let similarity = cosine_similarity(vector, v.as_deref()?) as f64;
                (similarity >= min_similarity).then(|| QaMatch {
                    log: log.clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(b.log.created_at.cmp(&a.log.created_at))
                .then(a.log.id.cmp(&b.log.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn record_message(&self, message: &CommunityMessage) -> Result<()> {
        let mut state = self.write()?;
        state.messages.push(message.clone());
        Ok(())
    }

    async fn kept_messages_between(&self, start: i64, end: i64) -> Result<Vec<CommunityMessage>> {
        let state = self.read()?;
        let mut messages: Vec<CommunityMessage> = state
            .messages
            .iter()
            .filter(|m| m.kept && m.created_at >= start && m.created_at < end)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn purge_messages(&self, older_than: i64) -> Result<u64> {
        let mut state = self.write()?;
        let before = state.messages.len();
        state
            .messages
            .retain(|m| m.kept || m.created_at >= older_than);
        Ok((before - state.messages.len()) as u64)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read()?;
        Ok(StoreStats {
            documents: state.docs.len() as u64,
            active_documents: state.docs.values().filter(|d| d.is_active).count() as u64,
            chunks: state.chunks.len() as u64,
            active_chunks: state.active_chunks().count() as u64,
            digests: state.digests.len() as u64,
            qa_logs: state.qa.len() as u64,
            messages: state.messages.len() as u64,
        })
    }
}
