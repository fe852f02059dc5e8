//! Ingestion pipeline: extract → chunk → embed → store → activate.
//!
//! Every ingestion creates a new, inactive document version. Vectors are
//! computed for all of its chunks before anything is written, chunks are
//! written together with their vectors in batches, and only then is the
//! new version activated and older versions deactivated. A failure at any
//! point removes the new version and leaves the previous one serving.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use askbase_core::chunk::{build_chunks, chunk_document, content_fingerprint};
use askbase_core::models::{Document, EmbeddedChunk};
use askbase_core::ChunkingError;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::engine::Engine;
use crate::extract::extract_file;

const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    Updated,
    /// Same text and chunking parameters as the active version.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub title: String,
    pub version: i64,
    pub status: IngestStatus,
    pub chunks: usize,
    pub oversized_chunks: usize,
    /// Chunks whose vector was already stored under the same model.
    pub reused_embeddings: usize,
    pub deactivated_versions: u64,
}

/// Outcome of [`ingest_dir`].
#[derive(Debug, Default)]
pub struct DirReport {
    pub reports: Vec<IngestReport>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Make an upload name safe to use as a title.
///
/// Replaces `<>:"/\|?*` with `_`, trims dots and spaces at both ends, and
/// caps the length. An empty result becomes `unnamed_file`.
pub fn sanitize_title(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    let trimmed: String = replaced
        .trim_matches(|c| c == '.' || c == ' ')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    if trimmed.is_empty() {
        "unnamed_file".to_string()
    } else {
        trimmed
    }
}

/// Title derived from a file name: the sanitized stem.
pub fn title_for_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    sanitize_title(stem)
}

/// Ingest already extracted text as a new version of `title`.
pub async fn ingest_text(
    engine: &Engine,
    title: &str,
    source: &str,
    text: &str,
) -> Result<IngestReport> {
    let title = sanitize_title(title);
    let lock = engine.title_lock(&title);
    let result = {
        let _guard = lock.lock().await;
        ingest_locked(engine, title.clone(), source, text).await
    };
    engine.release_title_lock(&title, lock);
    result
}

async fn ingest_locked(
    engine: &Engine,
    title: String,
    source: &str,
    text: &str,
) -> Result<IngestReport> {
    let store = engine.store.as_ref();
    let chunk_config = engine.config.chunking.chunk_config();
    let fingerprint = content_fingerprint(text, &chunk_config, engine.counter.name());

    if let Some(active) = store.active_document(&title).await? {
        if active.content_hash == fingerprint {
            info!(title = %title, version = active.version, "unchanged, skipping");
            let chunks = store.document_chunks(&active.id).await?;
            return Ok(IngestReport {
                document_id: active.id,
                title,
                version: active.version,
                status: IngestStatus::Unchanged,
                oversized_chunks: chunks.iter().filter(|c| c.oversized).count(),
                chunks: chunks.len(),
                reused_embeddings: chunks.len(),
                deactivated_versions: 0,
            });
        }
    }

    let drafts = chunk_document(text, &chunk_config, engine.counter.as_ref())?;
    if drafts.is_empty() {
        bail!(ChunkingError::Unreadable(format!(
            "'{}' contains no text",
            title
        )));
    }

    let previous = store.latest_version(&title).await?;
    let now = Utc::now().timestamp();
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        title: title.clone(),
        version: previous + 1,
        source: source.to_string(),
        content_hash: fingerprint,
        is_active: false,
        created_at: now,
        updated_at: now,
    };
    let chunks = build_chunks(&doc.id, &drafts, now);
    info!(
        title = %title,
        version = doc.version,
        chunks = chunks.len(),
        "ingesting document"
    );

    let model = engine.embeddings.model_name().to_string();
    let hashes: Vec<String> = chunks
        .iter()
        .map(|c| c.hash.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let stored = store.cached_vectors(&hashes, &model).await?;
    let reused = chunks.iter().filter(|c| stored.contains_key(&c.hash)).count();
    engine.embeddings.preload(stored);

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = engine
        .embeddings
        .embed_batch(&texts)
        .await
        .with_context(|| format!("Failed to embed '{}'", title))?;

    let oversized = chunks.iter().filter(|c| c.oversized).count();
    let chunk_count = chunks.len();
    let embedded: Vec<EmbeddedChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| EmbeddedChunk {
            chunk,
            vector,
            model: model.clone(),
        })
        .collect();

    store.insert_document_version(&doc).await?;
    let written = async {
        for batch in embedded.chunks(engine.config.embedding.batch_size) {
            store.upsert_chunks(batch).await?;
        }
        store.deactivate_previous_versions(&title, &doc.id).await
    }
    .await;

    let deactivated = match written {
        Ok(n) => n,
        Err(e) => {
            if let Err(cleanup) = store.delete_document(&doc.id).await {
                warn!(document_id = %doc.id, error = %cleanup, "failed to remove partial version");
            }
            return Err(e.context(format!("Failed to store '{}'", title)));
        }
    };

    info!(
        title = %title,
        version = doc.version,
        chunks = chunk_count,
        reused_embeddings = reused,
        deactivated,
        "document ingested"
    );

    Ok(IngestReport {
        document_id: doc.id,
        title,
        version: doc.version,
        status: if previous == 0 {
            IngestStatus::Created
        } else {
            IngestStatus::Updated
        },
        chunks: chunk_count,
        oversized_chunks: oversized,
        reused_embeddings: reused,
        deactivated_versions: deactivated,
    })
}

/// Extract and ingest one file. The title defaults to the file stem.
pub async fn ingest_file(engine: &Engine, path: &Path, title: Option<&str>) -> Result<IngestReport> {
    let text = extract_file(path)?;
    let title = match title {
        Some(t) => t.to_string(),
        None => title_for_path(path),
    };
    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    ingest_text(engine, &title, &source, &text).await
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Files under `root` selected by the `[ingest]` globs, sorted by path.
pub fn scan_dir(engine: &Engine, root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Not a directory: {}", root.display());
    }
    let include = build_globset(&engine.config.ingest.include_globs)?;
    let mut excludes = vec!["**/.git/**".to_string()];
    excludes.extend(engine.config.ingest.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if include.is_match(rel) && !exclude.is_match(rel) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Ingest every matching file under `root`. A failing file is recorded
/// and the rest continue.
pub async fn ingest_dir(engine: &Engine, root: &Path) -> Result<DirReport> {
    let files = scan_dir(engine, root)?;
    let mut report = DirReport::default();
    for path in files {
        match ingest_file(engine, &path, None).await {
            Ok(r) => report.reports.push(r),
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "ingestion failed");
                report.failures.push((path, format!("{:#}", e)));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("a/b:c?.pdf"), "a_b_c_.pdf");
        assert_eq!(sanitize_title("  .hidden. "), "hidden");
        assert_eq!(sanitize_title("..."), "unnamed_file");
        assert_eq!(sanitize_title(&"x".repeat(150)).len(), 100);
    }

    #[test]
    fn test_title_for_path() {
        assert_eq!(
            title_for_path(Path::new("/docs/AI-OFM Basics.pdf")),
            "AI-OFM Basics"
        );
    }
}
