//! Schema creation. Every statement is idempotent, so `askbase init` can
//! be re-run safely against an existing database.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        version INTEGER NOT NULL,
        source TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(title, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        section TEXT,
        text TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        hash TEXT NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        oversized INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        UNIQUE(document_id, chunk_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
        document_id TEXT NOT NULL,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digests (
        id TEXT PRIMARY KEY,
        date TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        embedding BLOB NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qa_logs (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        sources_json TEXT NOT NULL DEFAULT '[]',
        latency_ms INTEGER NOT NULL,
        asked_by TEXT,
        embedding BLOB,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id INTEGER NOT NULL,
        sender_id INTEGER NOT NULL,
        text TEXT NOT NULL,
        category TEXT NOT NULL,
        kept INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    // At most one active version per title.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_active_title ON documents(title) WHERE is_active = 1",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_hash ON chunk_vectors(content_hash, model)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_qa_logs_created_at ON qa_logs(created_at DESC)",
];

/// Create all tables and indexes on an open pool.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .context("Failed to create table")?;
    }

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create FTS5 index (is SQLite built with FTS5?)")?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("askbase.sqlite"))
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        for expected in ["chunk_vectors", "chunks", "chunks_fts", "digests", "documents", "messages", "qa_logs"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }
}
