//! Answer pipeline: retrieve → assemble → generate → cite → log.

use std::time::Instant;

use anyhow::{bail, Result};
use askbase_core::assemble::{assemble, format_sources, AssembledContext, UNVERIFIED_CAVEAT};
use askbase_core::models::{QaLog, QaMatch, RetrievalSource};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::generate::generate_answer;
use crate::retrieve::retrieve;

const FALLBACK_RESPONSES: [&str; 4] = [
    "I don't have specific information about that in my knowledge base. Could you provide more context or ask about a different aspect of the OnlyAi course?",
    "That's not covered in my current knowledge base. Consider uploading relevant documentation or asking about AI-OFM strategies, prompt engineering, or course content.",
    "I don't have that information yet. Try asking about course materials, AI strategies, or workflow optimization techniques that I do have documented.",
    "That's outside my current knowledge scope. I can help with OnlyAi course content, AI implementation strategies, and automation workflows if you'd like to ask about those topics.",
];

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<String>,
    /// Indexes that failed during retrieval.
    pub degraded: Vec<RetrievalSource>,
    /// No evidence was found; `text` is a canned response.
    pub fallback: bool,
    /// Evidence came only from digests or prior Q&A.
    pub caveat: bool,
    pub latency_ms: i64,
    #[serde(skip)]
    pub evidence: AssembledContext,
}

/// Canned reply for questions with no evidence. The same question always
/// gets the same reply.
pub fn fallback_response(question: &str) -> &'static str {
    let digest = Sha256::digest(question.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let idx = (u64::from_be_bytes(head) % FALLBACK_RESPONSES.len() as u64) as usize;
    FALLBACK_RESPONSES[idx]
}

/// Cut `text` to at most `max_chars` characters, preferring a word
/// boundary, and mark the cut with `...`.
pub fn safe_truncate(text: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(SUFFIX.len());
    let mut cut: String = text.chars().take(keep).collect();
    if let Some(pos) = cut.rfind(' ') {
        if pos > 0 {
            cut.truncate(pos);
        }
    }
    format!("{}{}", cut, SUFFIX)
}

/// Join the generated body with the optional caveat and the sources line.
///
/// Only the body is shortened to respect `max_chars`; the caveat and the
/// sources line are always kept whole.
pub fn compose_answer(body: &str, caveat: bool, sources: &str, max_chars: usize) -> String {
    let mut suffix = String::new();
    if caveat {
        suffix.push_str(&format!("\n\n({})", UNVERIFIED_CAVEAT));
    }
    suffix.push_str(&format!("\n\n{}", sources));
    let room = max_chars.saturating_sub(suffix.chars().count());
    format!("{}{}", safe_truncate(body.trim_end(), room), suffix)
}

/// Answer `question`. `asked_by` is recorded in the Q&A log.
pub async fn answer(engine: &Engine, question: &str, asked_by: Option<&str>) -> Result<Answer> {
    let started = Instant::now();
    let question = question.trim();
    if question.is_empty() {
        bail!("Question must not be empty");
    }

    let retrieval = retrieve(engine, question).await?;
    let ev = &engine.config.evidence;

    let qa: Option<Vec<QaMatch>> = if ev.include_qa && ev.qa_k > 0 {
        match engine
            .store
            .similar_qa(&retrieval.query_vector, ev.qa_k, ev.qa_min_similarity)
            .await
        {
            Ok(matches) => Some(matches),
            Err(e) => {
                warn!(error = %e, "prior Q&A lookup failed, continuing without it");
                None
            }
        }
    } else {
        None
    };

    let context = assemble(
        &retrieval.result.evidence,
        ev.token_budget,
        qa.as_deref(),
        engine.counter.as_ref(),
    );
    if let Some(e) = &context.budget_exceeded {
        warn!(budget = e.budget, smallest = e.smallest, "no evidence fits the token budget");
    }

    let generation = &engine.config.generation;
    let (text, fallback, caveat) = if context.is_empty() {
        let text = safe_truncate(fallback_response(question), generation.max_answer_chars);
        (text, true, false)
    } else {
        let body = generate_answer(
            engine.generator.as_ref(),
            &generation.system_prompt,
            &context.context,
            question,
            generation.temperature,
        )
        .await?;
        let caveat = context.requires_caveat();
        let text = compose_answer(
            &body,
            caveat,
            &format_sources(&context.source_labels()),
            generation.max_answer_chars,
        );
        (text, false, caveat)
    };
    let sources = context.source_labels();
    let latency_ms = started.elapsed().as_millis() as i64;

    let log = QaLog {
        id: Uuid::new_v4().to_string(),
        question: question.to_string(),
        answer: text.clone(),
        sources: sources.clone(),
        latency_ms,
        asked_by: asked_by.map(|s| s.to_string()),
        created_at: Utc::now().timestamp(),
    };
    if let Err(e) = engine
        .store
        .log_qa(&log, Some(&retrieval.query_vector))
        .await
    {
        warn!(error = %e, "failed to log Q&A");
    }

    info!(
        latency_ms,
        sources = sources.len(),
        fallback,
        caveat,
        tokens = context.tokens_used,
        "question answered"
    );

    Ok(Answer {
        text,
        sources,
        degraded: retrieval.result.unavailable.clone(),
        fallback,
        caveat,
        latency_ms,
        evidence: context,
    })
}
