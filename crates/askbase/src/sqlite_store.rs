//! SQLite-backed [`Store`] implementation.
//!
//! Lexical ranking uses the FTS5 `bm25()` function over `chunks_fts`.
//! Vectors are little-endian f32 BLOBs in `chunk_vectors`, compared by
//! brute-force cosine similarity at query time. Both indexes are written
//! in the same transaction as the chunk rows, and every query joins
//! `documents` so only the active version of a title is visible.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use askbase_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use askbase_core::index::{lexical_terms, sort_candidates};
use askbase_core::models::{
    Chunk, CommunityMessage, DigestEntry, Document, EmbeddedChunk, EvidenceKind, Passage, QaLog,
    QaMatch,
};
use askbase_core::store::{digest_passage, Candidate, Store, StoreStats};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Turn free text into an FTS5 query: each alphanumeric term quoted and
/// OR-joined. Returns `None` when nothing searchable is left.
pub fn fts_query(text: &str) -> Option<String> {
    let terms = lexical_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

const DOC_COLUMNS: &str =
    "id, title, version, source, content_hash, is_active, created_at, updated_at";

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        version: row.get("version"),
        source: row.get("source"),
        content_hash: row.get("content_hash"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.chunk_index, c.section, c.text, \
     c.token_count, c.hash, c.metadata_json, c.oversized, c.created_at";

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let token_count: i64 = row.get("token_count");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        section: row.get("section"),
        text: row.get("text"),
        token_count: token_count.max(0) as usize,
        hash: row.get("hash"),
        metadata_json: row.get("metadata_json"),
        oversized: row.get("oversized"),
        created_at: row.get("created_at"),
    }
}

fn row_to_chunk_passage(row: &SqliteRow) -> Passage {
    let token_count: i64 = row.get("token_count");
    Passage {
        id: row.get("id"),
        kind: EvidenceKind::DocumentChunk,
        document_id: Some(row.get("document_id")),
        title: row.get("title"),
        section: row.get("section"),
        text: row.get("text"),
        token_count: token_count.max(0) as usize,
        created_at: row.get("created_at"),
    }
}

fn row_to_digest(row: &SqliteRow) -> Result<DigestEntry> {
    let date: String = row.get("date");
    let token_count: i64 = row.get("token_count");
    Ok(DigestEntry {
        id: row.get("id"),
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("Invalid digest date in store: {}", date))?,
        text: row.get("text"),
        token_count: token_count.max(0) as usize,
        metadata_json: row.get("metadata_json"),
        created_at: row.get("created_at"),
    })
}

fn row_to_qa(row: &SqliteRow) -> Result<QaLog> {
    let sources_json: String = row.get("sources_json");
    Ok(QaLog {
        id: row.get("id"),
        question: row.get("question"),
        answer: row.get("answer"),
        sources: serde_json::from_str(&sources_json).context("Invalid qa_logs.sources_json")?,
        latency_ms: row.get("latency_ms"),
        asked_by: row.get("asked_by"),
        created_at: row.get("created_at"),
    })
}

fn row_to_message(row: &SqliteRow) -> CommunityMessage {
    CommunityMessage {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        sender_id: row.get("sender_id"),
        text: row.get("text"),
        category: row.get("category"),
        kept: row.get("kept"),
        created_at: row.get("created_at"),
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<u64> {
    let n: i64 = sqlx::query_scalar(sql).fetch_one(pool).await?;
    Ok(n.max(0) as u64)
}

#[async_trait]
impl Store for SqliteStore {
    async fn active_document(&self, title: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE title = ? AND is_active = 1",
            DOC_COLUMNS
        ))
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn latest_version(&self, title: &str) -> Result<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM documents WHERE title = ?")
                .bind(title)
                .fetch_one(&self.pool)
                .await?;
        Ok(version.unwrap_or(0))
    }

    async fn insert_document_version(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, version, source, content_hash, is_active,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(doc.version)
        .bind(&doc.source)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert version {} of '{}'", doc.version, doc.title))?;
        Ok(())
    }

    async fn upsert_chunks(&self, batch: &[EmbeddedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for ec in batch {
            let chunk = &ec.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, section, text, token_count,
                                    hash, metadata_json, oversized, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    section = excluded.section,
                    text = excluded.text,
                    token_count = excluded.token_count,
                    hash = excluded.hash,
                    metadata_json = excluded.metadata_json,
                    oversized = excluded.oversized
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.section)
            .bind(&chunk.text)
            .bind(chunk.token_count as i64)
            .bind(&chunk.hash)
            .bind(&chunk.metadata_json)
            .bind(chunk.oversized)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, content_hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    content_hash = excluded.content_hash,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&ec.model)
            .bind(ec.vector.len() as i64)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&ec.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn deactivate_previous_versions(&self, title: &str, keep_id: &str) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ? AND title = ?")
                .bind(keep_id)
                .bind(title)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            bail!("Document {} is not a version of '{}'", keep_id, title);
        }

        // Deactivate first: the partial unique index allows one active row.
        let deactivated = sqlx::query(
            "UPDATE documents SET is_active = 0, updated_at = ? WHERE title = ? AND id != ? AND is_active = 1",
        )
        .bind(now)
        .bind(title)
        .bind(keep_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE documents SET is_active = 1, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(keep_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deactivated)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        // chunks and chunk_vectors follow through ON DELETE CASCADE
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self, include_inactive: bool) -> Result<Vec<Document>> {
        let filter = if include_inactive {
            ""
        } else {
            "WHERE is_active = 1"
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents {} ORDER BY title ASC, version DESC",
            DOC_COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks c WHERE c.document_id = ? ORDER BY c.chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn cached_vectors(
        &self,
        hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        for group in hashes.chunks(500) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT content_hash, embedding FROM chunk_vectors WHERE model = ",
            );
            qb.push_bind(model);
            qb.push(" AND content_hash IN (");
            let mut separated = qb.separated(", ");
            for hash in group {
                separated.push_bind(hash);
            }
            separated.push_unseparated(")");

            for row in qb.build().fetch_all(&self.pool).await? {
                let blob: Vec<u8> = row.get("embedding");
                found.insert(row.get("content_hash"), blob_to_vec(&blob));
            }
        }
        Ok(found)
    }

    async fn lexical_query(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, d.title, bm25(chunks_fts) AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ? AND d.is_active = 1
            ORDER BY rank ASC, c.created_at DESC, c.id ASC
            LIMIT ?
            "#,
            CHUNK_COLUMNS
        ))
        .bind(&fts)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .context("FTS query failed")?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                Candidate {
                    passage: row_to_chunk_passage(row),
                    // bm25() is lower-is-better
                    raw_score: -rank,
                }
            })
            .collect();
        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    async fn vector_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, d.title, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE d.is_active = 1
            "#,
            CHUNK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                Candidate {
                    passage: row_to_chunk_passage(row),
                    raw_score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn digest_query(&self, vector: &[f32], k: usize) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            "SELECT id, date, text, token_count, metadata_json, embedding, created_at FROM digests",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            candidates.push(Candidate {
                passage: digest_passage(&row_to_digest(row)?),
                raw_score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
            });
        }
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    async fn upsert_digest(&self, digest: &DigestEntry, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digests (id, date, text, token_count, metadata_json, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
                id = excluded.id,
                text = excluded.text,
                token_count = excluded.token_count,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(&digest.id)
        .bind(digest.date.format("%Y-%m-%d").to_string())
        .bind(&digest.text)
        .bind(digest.token_count as i64)
        .bind(&digest.metadata_json)
        .bind(vec_to_blob(vector))
        .bind(digest.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn digest_on(&self, date: NaiveDate) -> Result<Option<DigestEntry>> {
        let row = sqlx::query(
            "SELECT id, date, text, token_count, metadata_json, created_at FROM digests WHERE date = ?",
        )
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_digest).transpose()
    }

    async fn log_qa(&self, log: &QaLog, question_vector: Option<&[f32]>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO qa_logs (id, question, answer, sources_json, latency_ms, asked_by,
                                 embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.question)
        .bind(&log.answer)
        .bind(serde_json::to_string(&log.sources)?)
        .bind(log.latency_ms)
        .bind(&log.asked_by)
        .bind(question_vector.map(vec_to_blob))
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn similar_qa(
        &self,
        vector: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<QaMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, question, answer, sources_json, latency_ms, asked_by, embedding, created_at
            FROM qa_logs
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            if similarity >= min_similarity {
                matches.push(QaMatch {
                    log: row_to_qa(row)?,
                    similarity,
                });
            }
        }
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
        sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, sender_id, text, category, kept, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(message.chat_id)
        .bind(message.sender_id)
        .bind(&message.text)
        .bind(&message.category)
        .bind(message.kept)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kept_messages_between(&self, start: i64, end: i64) -> Result<Vec<CommunityMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, sender_id, text, category, kept, created_at
            FROM messages
            WHERE kept = 1 AND created_at >= ? AND created_at < ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn purge_messages(&self, older_than: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < ? AND kept = 0")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            documents: count(&self.pool, "SELECT COUNT(*) FROM documents").await?,
            active_documents: count(
                &self.pool,
                "SELECT COUNT(*) FROM documents WHERE is_active = 1",
            )
            .await?,
            chunks: count(&self.pool, "SELECT COUNT(*) FROM chunks").await?,
            active_chunks: count(
                &self.pool,
                "SELECT COUNT(*) FROM chunks c JOIN documents d ON d.id = c.document_id WHERE d.is_active = 1",
            )
            .await?,
            digests: count(&self.pool, "SELECT COUNT(*) FROM digests").await?,
            qa_logs: count(&self.pool, "SELECT COUNT(*) FROM qa_logs").await?,
            messages: count(&self.pool, "SELECT COUNT(*) FROM messages").await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("What's AI-OFM?").as_deref(),
            Some("\"what\" OR \"s\" OR \"ai\" OR \"ofm\"")
        );
        assert_eq!(fts_query("?? --"), None);
    }
}
