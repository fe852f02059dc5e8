//! Community message intake and daily digests.
//!
//! Chat messages are classified, and only informative ones are kept. Once
//! a day the kept messages are summarised into a digest entry, which is
//! embedded and then retrievable next to document chunks.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use askbase_core::classify::{should_store, MessageCategory, CLASSIFICATION_PROMPT};
use askbase_core::models::{CommunityMessage, DigestEntry};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::Engine;
use crate::generate::{summarize_day, Completion};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Serialize)]
pub struct DigestReport {
    pub date: NaiveDate,
    pub message_count: usize,
    /// `None` when there were no kept messages that day.
    pub digest: Option<DigestEntry>,
}

/// Ask the generation model for a category label.
pub async fn classify_message(engine: &Engine, text: &str) -> Result<MessageCategory> {
    let request = Completion {
        system: CLASSIFICATION_PROMPT.to_string(),
        user: text.to_string(),
        temperature: 0.0,
        max_tokens: 5,
    };
    let label = engine.generator.complete(&request).await?;
    Ok(MessageCategory::parse_label(&label))
}

/// Store a chat message, marking it kept or discarded by its category.
pub async fn record_message(
    engine: &Engine,
    chat_id: i64,
    sender_id: i64,
    text: &str,
    category: MessageCategory,
) -> Result<CommunityMessage> {
    let message = CommunityMessage {
        id: Uuid::new_v4().to_string(),
        chat_id,
        sender_id,
        text: text.to_string(),
        category: category.as_str().to_string(),
        kept: should_store(category),
        created_at: Utc::now().timestamp(),
    };
    engine.store.record_message(&message).await?;
    Ok(message)
}

/// Yesterday in UTC.
pub fn default_digest_date() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

fn day_bounds(date: NaiveDate) -> Result<(i64, i64)> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {}", date))?
        .and_utc()
        .timestamp();
    Ok((start, start + SECONDS_PER_DAY))
}

/// Metadata stored with a digest.
pub fn digest_metadata(date: NaiveDate, messages: &[CommunityMessage]) -> serde_json::Value {
    let chat_ids: BTreeSet<i64> = messages.iter().map(|m| m.chat_id).collect();
    let users: BTreeSet<i64> = messages.iter().map(|m| m.sender_id).collect();
    serde_json::json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "message_count": messages.len(),
        "chat_ids": chat_ids,
        "user_count": users.len(),
    })
}

/// Summarise the kept messages of `date` (default yesterday) into a
/// digest, replacing any digest already stored for that day.
pub async fn generate_digest(engine: &Engine, date: Option<NaiveDate>) -> Result<DigestReport> {
    let date = date.unwrap_or_else(default_digest_date);
    let (start, end) = day_bounds(date)?;
    let messages = engine.store.kept_messages_between(start, end).await?;

    if messages.is_empty() {
        info!(date = %date, "no kept messages, skipping digest");
        return Ok(DigestReport {
            date,
            message_count: 0,
            digest: None,
        });
    }

    let texts: Vec<String> = messages.iter().map(|m| m.text.clone()).collect();
    let summary = summarize_day(engine.generator.as_ref(), date, &texts)
        .await
        .with_context(|| format!("Failed to summarise {}", date))?;
    let vector = engine.embeddings.embed_query(&summary).await?;

    let entry = DigestEntry {
        id: Uuid::new_v4().to_string(),
        date,
        token_count: engine.counter.count(&summary),
        text: summary,
        metadata_json: digest_metadata(date, &messages).to_string(),
        created_at: Utc::now().timestamp(),
    };
    engine.store.upsert_digest(&entry, &vector).await?;
    info!(date = %date, messages = messages.len(), tokens = entry.token_count, "digest stored");

    Ok(DigestReport {
        date,
        message_count: messages.len(),
        digest: Some(entry),
    })
}

/// Delete unkept messages older than `days`.
pub async fn purge_messages(engine: &Engine, days: u32) -> Result<u64> {
    let cutoff = (Utc::now() - Duration::days(i64::from(days))).timestamp();
    let removed = engine.store.purge_messages(cutoff).await?;
    info!(days, removed, "purged old messages");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(chat_id: i64, sender_id: i64) -> CommunityMessage {
        CommunityMessage {
            id: Uuid::new_v4().to_string(),
            chat_id,
            sender_id,
            text: "hi".to_string(),
            category: "INFORMATION".to_string(),
            kept: true,
            created_at: 0,
        }
    }

    #[test]
    fn test_digest_metadata() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let meta = digest_metadata(date, &[message(2, 10), message(1, 10), message(2, 11)]);
        assert_eq!(meta["date"], "2025-03-14");
        assert_eq!(meta["message_count"], 3);
        assert_eq!(meta["chat_ids"], serde_json::json!([1, 2]));
        assert_eq!(meta["user_count"], 2);
    }

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        assert_eq!(day_bounds(date).unwrap(), (86_400, 172_800));
    }
}
