//! Embedding capability trait, content-addressed vector cache, retry
//! schedule, and vector utilities.
//!
//! Concrete providers (OpenAI, Ollama) and the batching manager live in
//! the `askbase` app crate. This module only defines what they share.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;

use crate::chunk::text_hash;
use crate::error::EmbeddingError;

/// An embedding backend.
///
/// Implementations must return exactly one vector of [`Embedder::dims`]
/// values per input text, in input order. Failures are classified as
/// [`EmbeddingError::Transient`] (rate limits, 5xx, timeouts) or
/// [`EmbeddingError::Permanent`] (auth, malformed request, bad model).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Bounded in-memory cache of vectors keyed by model and content hash.
///
/// Identical text under the same model is never sent to the provider
/// twice while the entry is resident.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    fn key(model: &str, hash: &str) -> String {
        format!("{}:{}", model, hash)
    }

    /// Look up a vector by the hash of its text.
    pub fn get(&self, model: &str, hash: &str) -> Option<Arc<Vec<f32>>> {
        self.cache.get(&Self::key(model, hash))
    }

    pub fn get_text(&self, model: &str, text: &str) -> Option<Arc<Vec<f32>>> {
        self.get(model, &text_hash(text))
    }

    pub fn insert(&self, model: &str, hash: &str, vector: Vec<f32>) {
        self.cache.insert(Self::key(model, hash), Arc::new(vector));
    }
}

/// Exponential backoff schedule for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(32_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Check that a provider response matches the request shape.
pub fn validate_batch(
    vectors: &[Vec<f32>],
    expected_count: usize,
    dims: usize,
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_is_keyed_by_model() {
        let cache = EmbeddingCache::new(100);
        let hash = text_hash("hello");
        cache.insert("model-a", &hash, vec![1.0, 2.0]);
        assert_eq!(
            cache.get_text("model-a", "hello").as_deref(),
            Some(&vec![1.0, 2.0])
        );
        assert!(cache.get("model-b", &hash).is_none());
        assert!(cache.get_text("model-a", "other").is_none());
    }

    #[test]
    fn test_retry_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(32));
        assert_eq!(policy.delay_for(60), Duration::from_secs(32));
    }

    #[test]
    fn test_validate_batch() {
        let good = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(validate_batch(&good, 2, 3).is_ok());
        assert_eq!(
            validate_batch(&good, 3, 3),
            Err(EmbeddingError::CountMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            validate_batch(&good, 2, 4),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
