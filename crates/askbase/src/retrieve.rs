//! Query pipeline: embed the question, search both indexes concurrently,
//! fuse.

use anyhow::{anyhow, Result};
use askbase_core::fusion::{fuse_available, FusedResult};
use askbase_core::index::{search_lexical, search_vector};
use tracing::info;

use crate::engine::Engine;

/// Fused evidence plus the question vector, which the answer pipeline
/// reuses for Q&A lookup and logging.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub result: FusedResult,
    pub query_vector: Vec<f32>,
}

/// Run hybrid retrieval for `question` under the configured timeout.
///
/// Lexical search starts immediately; vector search starts as soon as the
/// question is embedded. An index failure degrades to single-source
/// ranking. An embedding failure fails the query. On timeout every pending
/// call is dropped; all of them are read-only.
pub async fn retrieve(engine: &Engine, question: &str) -> Result<Retrieval> {
    let r = &engine.config.retrieval;
    let store = engine.store.as_ref();

    let work = async {
        let lexical = search_lexical(store, question, r.lexical_k);
        let vector = async {
            let query_vector = engine.embeddings.embed_query(question).await?;
            let hits = search_vector(store, &query_vector, r.vector_k, r.digest_k).await;
            Ok::<_, anyhow::Error>((query_vector, hits))
        };
        let (lexical, vector) = tokio::join!(lexical, vector);
        let (query_vector, vector_hits) = vector?;
        let result = fuse_available(lexical, vector_hits, &r.fusion_params());
        Ok::<_, anyhow::Error>(Retrieval {
            result,
            query_vector,
        })
    };

    let retrieval = tokio::time::timeout(r.query_timeout(), work)
        .await
        .map_err(|_| anyhow!("Query timed out after {}s", r.query_timeout_secs))??;

    info!(
        lexical_hits = retrieval.result.lexical_hits,
        vector_hits = retrieval.result.vector_hits,
        fused = retrieval.result.evidence.len(),
        degraded = retrieval.result.is_degraded(),
        "retrieval complete"
    );
    Ok(retrieval)
}
