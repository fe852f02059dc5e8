//! Lexical and vector index adapters.
//!
//! Thin layers over [`Store`] that enforce the ranking contract shared by
//! both indexes: score descending, ties broken by the more recent
//! `created_at`, then by id so repeated queries order identically. Store
//! failures become [`IndexUnavailableError`] tagged with the index, which
//! the retrieval pipeline turns into degraded single-source ranking.


use tracing::debug;

use crate::error::IndexUnavailableError;
use crate::models::RetrievalSource;
use crate::store::{Candidate, Store};

/// Lowercased alphanumeric terms of `text`, in order.
pub fn lexical_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn sort_key(c: &Candidate) -> f64 {
    if c.raw_score.is_nan() {
        f64::NEG_INFINITY
    } else {
        c.raw_score
    }
}

/// Sort by score descending, then newer first, then id ascending. NaN
/// scores sort last.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        sort_key(b)
            .total_cmp(&sort_key(a))
            .then(b.passage.created_at.cmp(&a.passage.created_at))
            .then_with(|| a.passage.id.cmp(&b.passage.id))
    });
}

/// Top-`k` chunks by full-text relevance.
///
/// A query with no usable terms, or no overlap with the corpus, yields an
/// empty list.
pub async fn search_lexical<S: Store + ?Sized>(
    store: &S,
    query: &str,
    k: usize,
) -> Result<Vec<Candidate>, IndexUnavailableError> {
    if k == 0 || lexical_terms(query).is_empty() {
        return Ok(Vec::new());
    }
    let mut candidates =
        store
            .lexical_query(query, k)
            .await
            .map_err(|e| IndexUnavailableError {
                index: RetrievalSource::Lexical,
                reason: format!("{:#}", e),
            })?;
    sort_candidates(&mut candidates);
    candidates.truncate(k);
    debug!(hits = candidates.len(), "lexical search");
    Ok(candidates)
}

/// Top-`k` chunks plus top-`digest_k` digests by cosine similarity,
/// merged into one ranking.
pub async fn search_vector<S: Store + ?Sized>(
    store: &S,
    vector: &[f32],
    k: usize,
    digest_k: usize,
) -> Result<Vec<Candidate>, IndexUnavailableError> {
    let unavailable = |e: anyhow::Error| IndexUnavailableError {
        index: RetrievalSource::Vector,
        reason: format!("{:#}", e),
    };

    let mut candidates = if k > 0 {
        store.vector_query(vector, k).await.map_err(unavailable)?
    } else {
        Vec::new()
    };
    candidates.truncate(k);

    if digest_k > 0 {
        let mut digests = store
            .digest_query(vector, digest_k)
            .await
            .map_err(unavailable)?;
        digests.truncate(digest_k);
        candidates.extend(digests);
    }

    sort_candidates(&mut candidates);
    debug!(hits = candidates.len(), "vector search");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceKind, Passage};

    fn cand(id: &str, score: f64, created_at: i64) -> Candidate {
        Candidate {
            passage: Passage {
                id: id.into(),
                kind: EvidenceKind::DocumentChunk,
                document_id: Some("d".into()),
                title: "T".into(),
                section: None,
                text: "text".into(),
                token_count: 1,
                created_at,
            },
            raw_score: score,
        }
    }

    #[test]
    fn test_lexical_terms() {
        assert_eq!(
            lexical_terms("What's the AI-OFM pricing, v2?"),
            vec!["what", "s", "the", "ai", "ofm", "pricing", "v2"]
        );
        assert!(lexical_terms(" ?! -- ").is_empty());
    }

    #[test]
    fn test_sort_ties_prefer_recent_then_id() {
        let mut c = vec![
            cand("b", 1.0, 10),
            cand("a", 1.0, 10),
            cand("c", 1.0, 20),
            cand("d", 2.0, 0),
        ];
        sort_candidates(&mut c);
        let ids: Vec<&str> = c.iter().map(|c| c.passage.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn test_sort_puts_nan_last() {
        let mut c = vec![
            cand("nan", f64::NAN, 30),
            cand("low", 0.1, 0),
            cand("high", 3.0, 0),
            cand("nan2", f64::NAN, 10),
            cand("mid", 1.0, 0),
        ];
        sort_candidates(&mut c);
        let ids: Vec<&str> = c.iter().map(|c| c.passage.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low", "nan", "nan2"]);
    }
}
