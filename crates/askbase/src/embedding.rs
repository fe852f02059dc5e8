//! Embedding providers and the batching, caching, retrying manager.
//!
//! Providers implement [`Embedder`] and make exactly one HTTP call per
//! batch, classifying failures:
//! - HTTP 429 (rate limited), 5xx, timeouts, connection errors → transient
//! - other HTTP 4xx, malformed responses → permanent
//!
//! [`EmbeddingManager`] sits in front of a provider. It answers from the
//! content-hash cache where it can, splits the remaining texts into
//! batches of `batch_size`, runs up to `concurrency` batches at once, and
//! retries transient failures with exponential backoff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use askbase_core::chunk::text_hash;
use askbase_core::embedding::{validate_batch, Embedder, EmbeddingCache, RetryPolicy};
use askbase_core::EmbeddingError;

use crate::config::EmbeddingConfig;

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`. Every call fails
/// permanently.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Permanent(
            "embedding provider is disabled".to_string(),
        ))
    }
}

fn classify_status(provider: &str, status: reqwest::StatusCode, body: String) -> EmbeddingError {
    let msg = format!("{} API error {}: {}", provider, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        EmbeddingError::Transient(msg)
    } else {
        EmbeddingError::Permanent(msg)
    }
}

fn classify_transport(provider: &str, e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        EmbeddingError::Transient(format!("{} connection error: {}", provider, e))
    } else {
        EmbeddingError::Permanent(format!("{} request failed: {}", provider, e))
    }
}

fn float_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| EmbeddingError::Permanent(format!("Invalid response: {} is not an array", what)))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Permanent(format!("Invalid response: non-numeric {}", what)))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Calls `POST {url}/v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
            dims,
        })
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Permanent("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbeddingError::Permanent("Invalid OpenAI response: missing embedding".into())
        })?;
        indexed.push((index, float_array(embedding, "embedding")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, body_text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("OpenAI response read failed: {}", e)))?;
        parse_openai_response(&json)
    }
}

// ============ Ollama Provider ============

/// Calls `POST {url}/api/embed` on a local Ollama
/// (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            dims,
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::Permanent("Invalid Ollama response: missing embeddings array".into())
        })?
        .iter()
        .map(|e| float_array(e, "embedding"))
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("Ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, body_text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("Ollama response read failed: {}", e)))?;
        parse_ollama_response(&json)
    }
}

/// Create the configured provider.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Manager ============

/// Batching, caching, retrying front for an [`Embedder`].
///
/// Cheap to clone; clones share the provider and the cache.
#[derive(Clone)]
pub struct EmbeddingManager {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    batch_size: usize,
    concurrency: usize,
    retry: RetryPolicy,
}

impl EmbeddingManager {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        cache: EmbeddingCache,
        batch_size: usize,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            cache,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn from_config(embedder: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Self {
        Self::new(
            embedder,
            EmbeddingCache::new(config.cache_capacity),
            config.batch_size,
            config.concurrency,
            config.retry_policy(),
        )
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Seed the cache with vectors loaded from durable storage, keyed by
    /// content hash.
    pub fn preload(&self, vectors: HashMap<String, Vec<f32>>) -> usize {
        let n = vectors.len();
        for (hash, vector) in vectors {
            if vector.len() == self.dims() {
                self.cache.insert(self.model_name(), &hash, vector);
            }
        }
        n
    }

    /// Embed `texts`, one vector per input in input order.
    ///
    /// Cached texts and duplicates within the call are not sent to the
    /// provider. Vectors are returned exactly as the provider produced them.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model_name().to_string();
        let hashes: Vec<String> = texts.iter().map(|t| text_hash(t)).collect();

        let mut resolved: HashMap<String, Arc<Vec<f32>>> = HashMap::new();
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for (text, hash) in texts.iter().zip(&hashes) {
            if !seen.insert(hash.as_str()) {
                continue;
            }
            match self.cache.get(&model, hash) {
                Some(v) => {
                    resolved.insert(hash.clone(), v);
                }
                None => pending.push((hash.clone(), text.clone())),
            }
        }
        debug!(
            total = texts.len(),
            cached = resolved.len(),
            to_embed = pending.len(),
            "embedding batch"
        );

        let batches: Vec<Vec<(String, String)>> = pending
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();

        let results: Vec<Vec<(String, Vec<f32>)>> = stream::iter(batches)
            .map(|batch| async move {
                let inputs: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
                let vectors = self.embed_with_retry(&inputs).await?;
                let pairs: Vec<(String, Vec<f32>)> =
                    batch.into_iter().map(|(h, _)| h).zip(vectors).collect();
                Ok::<_, EmbeddingError>(pairs)
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        for (hash, vector) in results.into_iter().flatten() {
            self.cache.insert(&model, &hash, vector.clone());
            resolved.insert(hash, Arc::new(vector));
        }

        hashes
            .iter()
            .map(|h| {
                resolved
                    .get(h)
                    .map(|v| v.as_ref().clone())
                    .ok_or_else(|| EmbeddingError::Permanent(format!("no vector for hash {}", h)))
            })
            .collect()
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    async fn embed_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt: u32 = 0;
        loop {
            match self.embedder.embed(inputs).await {
                Ok(vectors) => {
                    validate_batch(&vectors, inputs.len(), self.dims())?;
                    return Ok(vectors);
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > self.retry.max_retries {
                        return Err(EmbeddingError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient embedding failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Two-dimensional vectors derived from text length, recording calls.
    struct FakeEmbedder {
        calls: Mutex<Vec<Vec<String>>>,
        transient_failures: AtomicUsize,
        permanent: bool,
        dims: usize,
    }

    impl FakeEmbedder {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                transient_failures: AtomicUsize::new(0),
                permanent: false,
                dims: 2,
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if self.permanent {
                return Err(EmbeddingError::Permanent("401 unauthorized".into()));
            }
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EmbeddingError::Transient("429 rate limited".into()));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![t.len() as f32, 1.0];
                    v.truncate(self.dims);
                    v.resize(self.dims, 0.0);
                    v
                })
                .collect())
        }
    }

    fn manager(fake: Arc<FakeEmbedder>, batch_size: usize, max_retries: u32) -> EmbeddingManager {
        EmbeddingManager::new(
            fake,
            EmbeddingCache::new(100),
            batch_size,
            2,
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        )
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_order_preserved_across_batches() {
        let fake = Arc::new(FakeEmbedder::new());
        let mgr = manager(fake.clone(), 2, 0);
        let input = texts(&["a", "bbb", "cc", "dddd", "eeeee"]);
        let vectors = mgr.embed_batch(&input).await.unwrap();
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 3.0, 2.0, 4.0, 5.0]);
        assert_eq!(fake.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cache_and_duplicates_skip_provider() {
        let fake = Arc::new(FakeEmbedder::new());
        let mgr = manager(fake.clone(), 10, 0);
        mgr.embed_batch(&texts(&["same", "same", "other"]))
            .await
            .unwrap();
        assert_eq!(fake.calls.lock().unwrap()[0].len(), 2);

        let again = mgr.embed_batch(&texts(&["other", "same"])).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(fake.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_texts_embedded_once_each() {
        let fake = Arc::new(FakeEmbedder::new());
        let mgr = manager(fake.clone(), 64, 0);
        let input: Vec<String> = (0..2000).map(|i| "x".repeat(i % 10 + 1)).collect();
        let vectors = mgr.embed_batch(&input).await.unwrap();
        assert_eq!(vectors.len(), 2000);
        for (text, v) in input.iter().zip(&vectors) {
            assert_eq!(v[0], text.len() as f32);
        }
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 10);
    }

    #[tokio::test]
    async fn test_preloaded_vectors_are_reused() {
        let fake = Arc::new(FakeEmbedder::new());
        let mgr = manager(fake.clone(), 10, 0);
        let mut stored = HashMap::new();
        stored.insert(text_hash("persisted"), vec![9.0, 9.0]);
        mgr.preload(stored);
        let v = mgr.embed_query("persisted").await.unwrap();
        assert_eq!(v, vec![9.0, 9.0]);
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let fake = Arc::new(FakeEmbedder::new());
        fake.transient_failures.store(2, Ordering::SeqCst);
        let mgr = manager(fake.clone(), 10, 3);
        let v = mgr.embed_query("hello").await.unwrap();
        assert_eq!(v, vec![5.0, 1.0]);
        assert_eq!(fake.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let fake = Arc::new(FakeEmbedder::new());
        fake.transient_failures.store(10, Ordering::SeqCst);
        let mgr = manager(fake.clone(), 10, 2);
        let err = mgr.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(fake.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut fake = FakeEmbedder::new();
        fake.permanent = true;
        let fake = Arc::new(fake);
        let mgr = manager(fake.clone(), 10, 5);
        let err = mgr.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Permanent(_)));
        assert_eq!(fake.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimensions_rejected() {
        let mut fake = FakeEmbedder::new();
        fake.dims = 3;
        let mgr = manager(Arc::new(fake), 10, 0);
        let err = mgr.embed_query("hello").await.unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
        assert!(parse_ollama_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_classify_status() {
        let s = reqwest::StatusCode::TOO_MANY_REQUESTS;
        assert!(classify_status("OpenAI", s, String::new()).is_transient());
        let s = reqwest::StatusCode::BAD_GATEWAY;
        assert!(classify_status("OpenAI", s, String::new()).is_transient());
        let s = reqwest::StatusCode::UNAUTHORIZED;
        assert!(!classify_status("OpenAI", s, String::new()).is_transient());
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails_permanently() {
        let err = DisabledEmbedder.embed(&texts(&["x"])).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
