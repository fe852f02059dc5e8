//! Shared state for the ingestion, query, answer and digest pipelines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use askbase_core::embedding::Embedder;
use askbase_core::store::Store;
use askbase_core::tokens::{counter_for, TokenCounter};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, EmbeddingManager};
use crate::generate::{create_generator, Generator};
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Everything a pipeline needs. Cheap to share behind an `Arc`; all
/// fields are read-only except the per-title ingestion locks.
pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub embeddings: EmbeddingManager,
    pub generator: Arc<dyn Generator>,
    pub counter: Arc<dyn TokenCounter>,
    title_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let counter: Arc<dyn TokenCounter> = Arc::from(
            counter_for(&config.chunking.tokenizer).context("Failed to load tokenizer")?,
        );
        let embeddings = EmbeddingManager::from_config(embedder, &config.embedding);
        Ok(Self {
            config: Arc::new(config),
            store,
            embeddings,
            generator,
            counter,
            title_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Open the configured SQLite database (migrating it if needed) and
    /// create the configured providers.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::migrate(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::new(config, store, embedder, generator)
    }

    /// The lock serialising ingestions of `title`.
    pub(crate) fn title_lock(&self, title: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .title_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(title.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Hand back a lock obtained from [`title_lock`](Self::title_lock).
    /// The map entry is dropped once no other ingestion holds or waits on
    /// it, so the map only holds titles with ingestions in flight.
    pub(crate) fn release_title_lock(&self, title: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .title_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one held here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(title);
        }
    }

    #[cfg(test)]
    fn tracked_titles(&self) -> usize {
        self.title_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askbase_core::store::memory::InMemoryStore;

    use crate::config::parse_config;
    use crate::embedding::DisabledEmbedder;
    use crate::generate::DisabledGenerator;

    fn engine() -> Engine {
        let config = parse_config("[db]\npath = \"unused.db\"\n[chunking]\ntokenizer = \"whitespace\"\n")
            .unwrap();
        Engine::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(DisabledEmbedder),
            Arc::new(DisabledGenerator),
        )
        .unwrap()
    }

    #[test]
    fn test_released_lock_is_forgotten() {
        let engine = engine();
        let lock = engine.title_lock("Guide");
        assert_eq!(engine.tracked_titles(), 1);
        engine.release_title_lock("Guide", lock);
        assert_eq!(engine.tracked_titles(), 0);
    }

    #[test]
    fn test_lock_kept_while_another_ingestion_waits() {
        let engine = engine();
        let first = engine.title_lock("Guide");
        let second = engine.title_lock("Guide");
        assert!(Arc::ptr_eq(&first, &second));

        engine.release_title_lock("Guide", first);
        assert_eq!(engine.tracked_titles(), 1);
        engine.release_title_lock("Guide", second);
        assert_eq!(engine.tracked_titles(), 0);
    }
}
