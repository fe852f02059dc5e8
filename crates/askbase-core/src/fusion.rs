//! Hybrid fusion of lexical and vector result sets.
//!
//! # Scoring
//!
//! 1. Each input list is normalized on its own to `[0, 1]`, either by
//!    min-max over the raw scores (default) or by rank position. Raw BM25
//!    and cosine values are never combined directly.
//! 2. Candidates are merged by id. A passage present in only one list gets
//!    `0.0` from the other; it is not otherwise penalized.
//! 3. `score = lexical_weight × lexical + vector_weight × vector`.
//! 4. Sort by score, then normalized vector score, then `created_at`
//!    (newest first), then id. All descending except id.
//! 5. Truncate to `max_candidates`.
//!
//! The merge keys on id through an ordered map and the final sort is
//! total, so fusing `[lexical, vector]` and `[vector, lexical]` produces
//! identical output.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IndexUnavailableError;
use crate::models::{Passage, RetrievalSource};
use crate::store::Candidate;

/// How raw scores within one result list are mapped to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(s - min) / (max - min)`; all-equal lists map to `1.0`.
    #[default]
    MinMax,
    /// `1 - rank / n` with tied scores sharing the better rank.
    Rank,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub normalization: Normalization,
    pub max_candidates: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            lexical_weight: 0.5,
            vector_weight: 0.5,
            normalization: Normalization::MinMax,
            max_candidates: 8,
        }
    }
}

impl FusionParams {
    fn weight(&self, source: RetrievalSource) -> f64 {
        match source {
            RetrievalSource::Lexical => self.lexical_weight,
            RetrievalSource::Vector => self.vector_weight,
        }
    }
}

/// One index's ranked output.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub source: RetrievalSource,
    pub candidates: Vec<Candidate>,
}

/// A fused piece of evidence with its scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedEvidence {
    pub passage: Passage,
    pub score: f64,
    /// Normalized lexical score, `0.0` if absent from the lexical list.
    pub lexical_score: f64,
    /// Normalized vector score, `0.0` if absent from the vector list.
    pub vector_score: f64,
    pub lexical_raw: Option<f64>,
    pub vector_raw: Option<f64>,
}

/// Fusion output plus the indexes that could not contribute.
#[derive(Debug, Clone, Default)]
pub struct FusedResult {
    pub evidence: Vec<FusedEvidence>,
    pub unavailable: Vec<RetrievalSource>,
    pub lexical_hits: usize,
    pub vector_hits: usize,
}

impl FusedResult {
    /// True when ranking came from fewer than both indexes.
    pub fn is_degraded(&self) -> bool {
        !self.unavailable.is_empty()
    }
}

/// Normalize raw scores to `[0, 1]`, preserving input order.
pub fn normalize(candidates: &[Candidate], method: Normalization) -> Vec<f64> {
    if candidates.is_empty() {
        return Vec::new();
    }
    // Non-finite scores rank below everything and normalize to 0.0.
    let finite: Vec<f64> = candidates
        .iter()
        .map(|c| c.raw_score)
        .filter(|s| s.is_finite())
        .collect();

    match method {
        Normalization::MinMax => {
            let s_min = finite.iter().copied().fold(f64::INFINITY, f64::min);
            let s_max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            candidates
                .iter()
                .map(|c| {
                    let s = c.raw_score;
                    if !s.is_finite() {
                        0.0
                    } else if (s_max - s_min).abs() < f64::EPSILON {
                        1.0
                    } else {
                        (s - s_min) / (s_max - s_min)
                    }
                })
                .collect()
        }
        Normalization::Rank => {
            let n = candidates.len() as f64;
            candidates
                .iter()
                .map(|c| {
                    let s = c.raw_score;
                    if !s.is_finite() {
                        return 0.0;
                    }
                    let better = finite.iter().filter(|o| **o > s).count() as f64;
                    1.0 - better / n
                })
                .collect()
        }
    }
}

#[derive(Default)]
struct Merged {
    passage: Option<Passage>,
    lexical: Option<(f64, f64)>,
    vector: Option<(f64, f64)>,
}

fn keep_max(slot: &mut Option<(f64, f64)>, norm: f64, raw: f64) {
    if slot.map_or(true, |(n, _)| norm > n) {
        *slot = Some((norm, raw));
    }
}

/// Merge any number of ranked lists into one deduplicated ranking.
pub fn fuse(lists: &[RankedList], params: &FusionParams) -> Vec<FusedEvidence> {
    let mut merged: BTreeMap<String, Merged> = BTreeMap::new();

    for list in lists {
        let norms = normalize(&list.candidates, params.normalization);
        for (cand, norm) in list.candidates.iter().zip(norms) {
            let entry = merged.entry(cand.passage.id.clone()).or_default();
            if entry.passage.is_none() {
                entry.passage = Some(cand.passage.clone());
            }
            let slot = match list.source {
                RetrievalSource::Lexical => &mut entry.lexical,
                RetrievalSource::Vector => &mut entry.vector,
            };
            keep_max(slot, norm, cand.raw_score);
        }
    }

    let mut fused: Vec<FusedEvidence> = merged
        .into_values()
        .filter_map(|m| {
            let passage = m.passage?;
            let lexical_score = m.lexical.map(|(n, _)| n).unwrap_or(0.0);
            let vector_score = m.vector.map(|(n, _)| n).unwrap_or(0.0);
            Some(FusedEvidence {
                passage,
                score: params.weight(RetrievalSource::Lexical) * lexical_score
                    + params.weight(RetrievalSource::Vector) * vector_score,
                lexical_score,
                vector_score,
                lexical_raw: m.lexical.map(|(_, r)| r),
                vector_raw: m.vector.map(|(_, r)| r),
            })
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.vector_score.total_cmp(&a.vector_score))
            .then(b.passage.created_at.cmp(&a.passage.created_at))
            .then_with(|| a.passage.id.cmp(&b.passage.id))
    });
    fused.truncate(params.max_candidates);
    fused
}

/// Fuse the two index outcomes, degrading to single-source ranking when
/// one index failed. Weights are left as configured, so a degraded
/// ranking keeps the surviving index's relative order.
pub fn fuse_available(
    lexical: Result<Vec<Candidate>, IndexUnavailableError>,
    vector: Result<Vec<Candidate>, IndexUnavailableError>,
    params: &FusionParams,
) -> FusedResult {
    let mut lists = Vec::with_capacity(2);
    let mut result = FusedResult::default();

    for (source, outcome) in [
        (RetrievalSource::Lexical, lexical),
        (RetrievalSource::Vector, vector),
    ] {
        match outcome {
            Ok(candidates) => {
                match source {
                    RetrievalSource::Lexical => result.lexical_hits = candidates.len(),
                    RetrievalSource::Vector => result.vector_hits = candidates.len(),
                }
                lists.push(RankedList { source, candidates });
            }
            Err(e) => {
                warn!(index = %e.index, reason = %e.reason, "retrieval degraded");
                result.unavailable.push(source);
            }
        }
    }

    result.evidence = fuse(&lists, params);
    result
}

/// Count how often each source contributed to the fused ranking.
pub fn contributions(evidence: &[FusedEvidence]) -> HashMap<RetrievalSource, usize> {
    let mut counts = HashMap::new();
    for e in evidence {
        if e.lexical_raw.is_some() {
            *counts.entry(RetrievalSource::Lexical).or_insert(0) += 1;
        }
        if e.vector_raw.is_some() {
            *counts.entry(RetrievalSource::Vector).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceKind;

    fn cand(id: &str, score: f64) -> Candidate {
        cand_at(id, score, 0)
    }

    fn cand_at(id: &str, score: f64, created_at: i64) -> Candidate {
        Candidate {
            passage: Passage {
                id: id.to_string(),
                kind: EvidenceKind::DocumentChunk,
                document_id: Some("d1".into()),
                title: "Doc".into(),
                section: None,
                text: format!("text of {}", id),
                token_count: 10,
                created_at,
            },
            raw_score: score,
        }
    }

    fn lexical(c: Vec<Candidate>) -> RankedList {
        RankedList {
            source: RetrievalSource::Lexical,
            candidates: c,
        }
    }

    fn vector(c: Vec<Candidate>) -> RankedList {
        RankedList {
            source: RetrievalSource::Vector,
            candidates: c,
        }
    }

    fn ids(fused: &[FusedEvidence]) -> Vec<&str> {
        fused.iter().map(|f| f.passage.id.as_str()).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&[], Normalization::MinMax).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let result = normalize(&[cand("c1", 5.0)], Normalization::MinMax);
        assert!((result[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let c = vec![cand("c1", 10.0), cand("c2", 5.0), cand("c3", 0.0)];
        let result = normalize(&c, Normalization::MinMax);
        assert!((result[0] - 1.0).abs() < 1e-9);
        assert!((result[1] - 0.5).abs() < 1e-9);
        assert!(result[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let c = vec![cand("c1", 3.0), cand("c2", 3.0)];
        for score in normalize(&c, Normalization::MinMax) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_normalize_rank_with_ties() {
        let c = vec![cand("a", 9.0), cand("b", 9.0), cand("c", 1.0), cand("d", 0.5)];
        let result = normalize(&c, Normalization::Rank);
        assert_eq!(result, vec![1.0, 1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_normalize_non_finite_scores_sink() {
        let c = vec![cand("a", f64::NAN), cand("b", 2.0), cand("c", 1.0)];
        let result = normalize(&c, Normalization::MinMax);
        assert_eq!(result, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_vector_only_results() {
        let fused = fuse(
            &[
                lexical(vec![]),
                vector(vec![cand("a", 0.9), cand("b", 0.6), cand("c", 0.3)]),
            ],
            &FusionParams::default(),
        );
        assert_eq!(fused.len(), 3);
        assert_eq!(ids(&fused), vec!["a", "b", "c"]);
        for f in &fused {
            assert_eq!(f.lexical_score, 0.0);
            assert!(f.lexical_raw.is_none());
            assert!((f.score - 0.5 * f.vector_score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_shared_chunk_merged_once() {
        let fused = fuse(
            &[
                lexical(vec![cand("x", 12.0), cand("l2", 4.0)]),
                vector(vec![cand("v1", 0.95), cand("x", 0.90), cand("v3", 0.20)]),
            ],
            &FusionParams::default(),
        );
        let count = fused.iter().filter(|f| f.passage.id == "x").count();
        assert_eq!(count, 1);
        assert_eq!(fused[0].passage.id, "x");
        let x = &fused[0];
        assert_eq!(x.lexical_score, 1.0);
        assert!(x.vector_score > 0.9 && x.vector_score < 1.0);
        assert!((x.score - 0.5 * (x.lexical_score + x.vector_score)).abs() < 1e-12);
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let l = lexical(vec![cand("a", 3.0), cand("b", 2.0), cand("c", 1.0)]);
        let v = vector(vec![cand("c", 0.9), cand("d", 0.8), cand("a", 0.1)]);
        let params = FusionParams {
            max_candidates: 10,
            ..FusionParams::default()
        };
        assert_eq!(
            fuse(&[l.clone(), v.clone()], &params),
            fuse(&[v, l], &params)
        );
    }

    #[test]
    fn test_tie_prefers_vector_then_recency() {
        let params = FusionParams {
            max_candidates: 10,
            ..FusionParams::default()
        };
        // "l" is lexical-only, "v" vector-only: equal combined scores.
        let fused = fuse(
            &[lexical(vec![cand("l", 1.0)]), vector(vec![cand("v", 1.0)])],
            &params,
        );
        assert_eq!(ids(&fused), vec!["v", "l"]);

        let fused = fuse(
            &[vector(vec![cand_at("old", 0.5, 10), cand_at("new", 0.5, 20)])],
            &params,
        );
        assert_eq!(ids(&fused), vec!["new", "old"]);
    }

    #[test]
    fn test_truncates_to_max_candidates() {
        let many: Vec<Candidate> = (0..20).map(|i| cand(&format!("c{}", i), i as f64)).collect();
        let params = FusionParams {
            max_candidates: 5,
            ..FusionParams::default()
        };
        let fused = fuse(&[lexical(many)], &params);
        assert_eq!(fused.len(), 5);
        assert_eq!(fused[0].passage.id, "c19");
    }

    #[test]
    fn test_weights_shift_ranking() {
        let l = lexical(vec![cand("lex", 5.0), cand("other", 1.0)]);
        let v = vector(vec![cand("vec", 0.9), cand("other2", 0.1)]);
        let params = FusionParams {
            lexical_weight: 0.2,
            vector_weight: 0.8,
            ..FusionParams::default()
        };
        let fused = fuse(&[l, v], &params);
        assert_eq!(fused[0].passage.id, "vec");
    }

    #[test]
    fn test_degraded_when_index_unavailable() {
        let result = fuse_available(
            Err(IndexUnavailableError {
                index: RetrievalSource::Lexical,
                reason: "fts offline".into(),
            }),
            Ok(vec![cand("a", 0.8), cand("b", 0.4)]),
            &FusionParams::default(),
        );
        assert!(result.is_degraded());
        assert_eq!(result.unavailable, vec![RetrievalSource::Lexical]);
        assert_eq!(ids(&result.evidence), vec!["a", "b"]);
        assert_eq!(result.vector_hits, 2);
    }

    #[test]
    fn test_contributions() {
        let fused = fuse(
            &[
                lexical(vec![cand("a", 2.0), cand("b", 1.0)]),
                vector(vec![cand("a", 0.5)]),
            ],
            &FusionParams::default(),
        );
        let counts = contributions(&fused);
        assert_eq!(counts[&RetrievalSource::Lexical], 2);
        assert_eq!(counts[&RetrievalSource::Vector], 1);
    }
}
