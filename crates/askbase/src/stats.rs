//! Database statistics for `askbase stats`.

use anyhow::Result;

use crate::engine::Engine;

/// Print document, chunk, digest, Q&A and message counts.
pub async fn run_stats(engine: &Engine) -> Result<()> {
    let stats = engine.store.stats().await?;
    let db_path = &engine.config.db.path;
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("askbase — Database Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Documents:   {} active / {} versions",
        stats.active_documents, stats.documents
    );
    println!(
        "  Chunks:      {} active / {} total",
        stats.active_chunks, stats.chunks
    );
    println!("  Digests:     {}", stats.digests);
    println!("  Q&A logged:  {}", stats.qa_logs);
    println!("  Messages:    {}", stats.messages);
    println!();
    println!(
        "  Embedding:   {} ({} dims)",
        engine.embeddings.model_name(),
        engine.embeddings.dims()
    );
    println!("  Tokenizer:   {}", engine.counter.name());
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
