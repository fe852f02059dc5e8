//! CLI command handlers. Results go to stdout, logs to stderr.

use std::path::Path;

use anyhow::{Context, Result};
use askbase_core::classify::MessageCategory;
use askbase_core::fusion::contributions;
use askbase_core::models::RetrievalSource;
use chrono::{DateTime, NaiveDate};

use crate::answer::answer;
use crate::digest::{classify_message, generate_digest, purge_messages, record_message};
use crate::engine::Engine;
use crate::ingest::{ingest_dir, ingest_file, IngestReport, IngestStatus};
use crate::retrieve::retrieve;

fn format_date(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn print_ingest(report: &IngestReport) {
    let status = match report.status {
        IngestStatus::Created => "created",
        IngestStatus::Updated => "updated",
        IngestStatus::Unchanged => "unchanged",
    };
    println!("{} v{} ({})", report.title, report.version, status);
    println!("  chunks: {}", report.chunks);
    if report.oversized_chunks > 0 {
        println!("  oversized chunks: {}", report.oversized_chunks);
    }
    println!("  reused embeddings: {}", report.reused_embeddings);
    if report.deactivated_versions > 0 {
        println!("  deactivated versions: {}", report.deactivated_versions);
    }
    println!("  id: {}", report.document_id);
}

pub async fn run_ingest(engine: &Engine, path: &Path, title: Option<&str>) -> Result<()> {
    let report = ingest_file(engine, path, title)
        .await
        .with_context(|| format!("Failed to ingest {}", path.display()))?;
    print_ingest(&report);
    println!("ok");
    Ok(())
}

pub async fn run_ingest_dir(engine: &Engine, dir: &Path) -> Result<()> {
    let report = ingest_dir(engine, dir).await?;
    for r in &report.reports {
        print_ingest(r);
    }
    for (path, error) in &report.failures {
        println!("FAILED {}: {}", path.display(), error);
    }
    let unchanged = report
        .reports
        .iter()
        .filter(|r| r.status == IngestStatus::Unchanged)
        .count();
    println!();
    println!("ingest-dir {}", dir.display());
    println!("  ingested: {}", report.reports.len() - unchanged);
    println!("  unchanged: {}", unchanged);
    println!("  failed: {}", report.failures.len());
    Ok(())
}

pub async fn run_documents(engine: &Engine, all: bool) -> Result<()> {
    let docs = engine.store.list_documents(all).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in docs {
        println!(
            "{} v{}{}",
            doc.title,
            doc.version,
            if doc.is_active { "" } else { " (inactive)" }
        );
        println!("    source: {}", doc.source);
        println!("    ingested: {}", format_date(doc.created_at));
        println!("    id: {}", doc.id);
    }
    Ok(())
}

pub async fn run_search(engine: &Engine, query: &str, explain: bool) -> Result<()> {
    let retrieval = retrieve(engine, query).await?;
    let result = &retrieval.result;
    for source in &result.unavailable {
        println!("(degraded: {} index unavailable)", source);
    }
    if result.evidence.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, e) in result.evidence.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, e.score, e.passage.citation_label());
        if explain {
            println!(
                "    lexical: {:.3} (raw {})  vector: {:.3} (raw {})",
                e.lexical_score,
                e.lexical_raw
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "-".to_string()),
                e.vector_score,
                e.vector_raw
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        let excerpt: String = e.passage.text.chars().take(200).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", e.passage.id);
        println!();
    }

    if explain {
        let counts = contributions(&result.evidence);
        println!(
            "candidates: {} lexical, {} vector; contributed: {} lexical, {} vector",
            result.lexical_hits,
            result.vector_hits,
            counts.get(&RetrievalSource::Lexical).copied().unwrap_or(0),
            counts.get(&RetrievalSource::Vector).copied().unwrap_or(0),
        );
    }
    Ok(())
}

pub async fn run_ask(engine: &Engine, question: &str, user: Option<&str>) -> Result<()> {
    let answer = answer(engine, question, user).await?;
    println!("{}", answer.text);
    Ok(())
}

pub async fn run_digest(engine: &Engine, date: Option<NaiveDate>) -> Result<()> {
    let report = generate_digest(engine, date).await?;
    match report.digest {
        Some(d) => {
            println!("{} ({} messages)", d.title(), report.message_count);
            println!();
            println!("{}", d.text);
        }
        None => println!("No kept messages on {}.", report.date),
    }
    Ok(())
}

pub async fn run_record_message(
    engine: &Engine,
    chat_id: i64,
    sender_id: i64,
    text: &str,
    label: Option<&str>,
) -> Result<()> {
    let category = match label {
        Some(l) => MessageCategory::parse_label(l),
        None => classify_message(engine, text).await?,
    };
    let message = record_message(engine, chat_id, sender_id, text, category).await?;
    println!(
        "{} ({})",
        message.category,
        if message.kept { "kept" } else { "discarded" }
    );
    Ok(())
}

pub async fn run_purge_messages(engine: &Engine, days: u32) -> Result<()> {
    let removed = purge_messages(engine, days).await?;
    println!("purged {} messages older than {} days", removed, days);
    Ok(())
}
