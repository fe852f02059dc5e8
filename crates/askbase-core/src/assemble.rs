//! Token-budgeted evidence assembly.
//!
//! Takes the fused ranking, keeps whole passages in rank order until the
//! next one would overflow the budget, then appends prior Q&A matches in
//! whatever budget remains. Passages are never cut: an item is included
//! with its full text and original token count, or not at all.

use chrono::DateTime;
use serde::Serialize;

use crate::error::BudgetExceededError;
use crate::fusion::FusedEvidence;
use crate::models::{EvidenceKind, QaMatch};
use crate::tokens::TokenCounter;

/// Appended to answers built without any document evidence.
pub const UNVERIFIED_CAVEAT: &str = "not verified against primary source";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub label: String,
    pub kind: EvidenceKind,
}

/// One included piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledItem {
    pub id: String,
    pub label: String,
    pub kind: EvidenceKind,
    pub text: String,
    pub token_count: usize,
}

/// The generation context and what went into it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub context: String,
    /// Ordered, deduplicated by label.
    pub citations: Vec<Citation>,
    pub items: Vec<AssembledItem>,
    pub tokens_used: usize,
    /// Included items that are chunks of uploaded documents.
    pub document_evidence_used: usize,
    pub qa_used: usize,
    #[serde(skip)]
    pub budget_exceeded: Option<BudgetExceededError>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True when there is evidence but none of it is a document chunk.
    pub fn requires_caveat(&self) -> bool {
        !self.items.is_empty() && self.document_evidence_used == 0
    }

    /// Citation labels in order.
    pub fn source_labels(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.label.clone()).collect()
    }

    fn push(&mut self, item: AssembledItem) {
        if !self.citations.iter().any(|c| c.label == item.label) {
            self.citations.push(Citation {
                label: item.label.clone(),
                kind: item.kind,
            });
        }
        match item.kind {
            EvidenceKind::DocumentChunk => self.document_evidence_used += 1,
            EvidenceKind::PriorQa => self.qa_used += 1,
            EvidenceKind::Digest => {}
        }
        self.tokens_used += item.token_count;
        self.items.push(item);
    }
}

/// Citation label for a prior Q&A entry, e.g. `Q&A 2025-03-14`.
pub fn qa_label(m: &QaMatch) -> String {
    match DateTime::from_timestamp(m.log.created_at, 0) {
        Some(dt) => format!("Q&A {}", dt.format("%Y-%m-%d")),
        None => "Q&A".to_string(),
    }
}

fn qa_text(m: &QaMatch) -> String {
    format!("Q: {}\nA: {}", m.log.question, m.log.answer)
}

fn render_item(item: &AssembledItem, asked_by: Option<&str>) -> String {
    match item.kind {
        EvidenceKind::DocumentChunk => format!("[Source: {}]\n{}", item.label, item.text),
        EvidenceKind::Digest => format!("[Community digest: {}]\n{}", item.label, item.text),
        EvidenceKind::PriorQa => format!(
            "[Prior community Q&A, not authoritative: {}, asked by {}]\n{}",
            item.label,
            asked_by.unwrap_or("unknown"),
            item.text
        ),
    }
}

/// Select evidence within `token_budget` and format it for generation.
///
/// Budget accounting covers evidence text only; the bracketed headers in
/// the rendered context are not counted. If items were offered but not
/// even the first fits, the result is empty and carries a
/// [`BudgetExceededError`].
pub fn assemble(
    ranked: &[FusedEvidence],
    token_budget: usize,
    qa_context: Option<&[QaMatch]>,
    counter: &dyn TokenCounter,
) -> AssembledContext {
    let mut out = AssembledContext::default();
    let mut blocks = Vec::new();
    let mut smallest: Option<usize> = None;

    for fused in ranked {
        let p = &fused.passage;
        smallest = Some(smallest.map_or(p.token_count, |s| s.min(p.token_count)));
        if out.tokens_used + p.token_count > token_budget {
            break;
        }
        let item = AssembledItem {
            id: p.id.clone(),
            label: p.citation_label(),
            kind: p.kind,
            text: p.text.clone(),
            token_count: p.token_count,
        };
        blocks.push(render_item(&item, None));
        out.push(item);
    }

    for m in qa_context.unwrap_or(&[]) {
        let text = qa_text(m);
        let token_count = counter.count(&text);
        smallest = Some(smallest.map_or(token_count, |s| s.min(token_count)));
        if out.tokens_used + token_count > token_budget {
            break;
        }
        let item = AssembledItem {
            id: m.log.id.clone(),
            label: qa_label(m),
            kind: EvidenceKind::PriorQa,
            text,
            token_count,
        };
        blocks.push(render_item(&item, m.log.asked_by.as_deref()));
        out.push(item);
    }

    if out.items.is_empty() {
        if let Some(smallest) = smallest {
            out.budget_exceeded = Some(BudgetExceededError {
                budget: token_budget,
                smallest,
            });
        }
    }

    out.context = blocks.join("\n\n");
    out
}

/// `Sources: [a, b]` line appended under an answer. Empty for no citations.
pub fn format_sources(labels: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for label in labels {
        if !seen.contains(&label.as_str()) {
            seen.push(label.as_str());
        }
    }
    if seen.is_empty() {
        String::new()
    } else {
        format!("Sources: [{}]", seen.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Passage, QaLog};
    use crate::tokens::WhitespaceCounter;

    fn evidence(id: &str, kind: EvidenceKind, section: Option<&str>, tokens: usize) -> FusedEvidence {
        FusedEvidence {
            passage: Passage {
                id: id.into(),
                kind,
                document_id: Some("d1".into()),
                title: "AI-OFM Basics".into(),
                section: section.map(String::from),
                text: vec!["word"; tokens].join(" "),
                token_count: tokens,
                created_at: 0,
            },
            score: 1.0,
            lexical_score: 1.0,
            vector_score: 1.0,
            lexical_raw: Some(1.0),
            vector_raw: Some(1.0),
        }
    }

    fn doc(id: &str, tokens: usize) -> FusedEvidence {
        evidence(id, EvidenceKind::DocumentChunk, None, tokens)
    }

    fn qa(id: &str, question: &str, answer: &str) -> QaMatch {
        QaMatch {
            log: QaLog {
                id: id.into(),
                question: question.into(),
                answer: answer.into(),
                sources: vec![],
                latency_ms: 5,
                asked_by: Some("user-7".into()),
                created_at: 1_741_910_400, // 2025-03-14
            },
            similarity: 0.9,
        }
    }

    #[test]
    fn test_budget_stops_at_first_overflow() {
        let ranked = vec![doc("a", 300), doc("b", 300), doc("c", 100)];
        let out = assemble(&ranked, 500, None, &WhitespaceCounter);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].id, "a");
        assert_eq!(out.tokens_used, 300);
        assert!(out.budget_exceeded.is_none());
    }

    #[test]
    fn test_items_keep_full_text() {
        let ranked = vec![doc("a", 40), doc("b", 60)];
        let out = assemble(&ranked, 100, None, &WhitespaceCounter);
        for (item, fused) in out.items.iter().zip(&ranked) {
            assert_eq!(item.text, fused.passage.text);
            assert_eq!(item.token_count, fused.passage.token_count);
        }
        assert_eq!(out.tokens_used, 100);
    }

    #[test]
    fn test_nothing_fits_signals_budget_exceeded() {
        let ranked = vec![doc("a", 900), doc("b", 700)];
        let out = assemble(&ranked, 500, None, &WhitespaceCounter);
        assert!(out.is_empty());
        assert!(out.context.is_empty());
        assert_eq!(
            out.budget_exceeded,
            Some(BudgetExceededError {
                budget: 500,
                smallest: 900
            })
        );
    }

    #[test]
    fn test_empty_input_is_not_budget_error() {
        let out = assemble(&[], 500, None, &WhitespaceCounter);
        assert!(out.is_empty());
        assert!(out.budget_exceeded.is_none());
        assert!(!out.requires_caveat());
    }

    #[test]
    fn test_citations_deduplicated_in_order() {
        let ranked = vec![
            evidence("a", EvidenceKind::DocumentChunk, Some("Pricing"), 10),
            evidence("b", EvidenceKind::DocumentChunk, Some("Setup"), 10),
            evidence("c", EvidenceKind::DocumentChunk, Some("Pricing"), 10),
        ];
        let out = assemble(&ranked, 1000, None, &WhitespaceCounter);
        assert_eq!(
            out.source_labels(),
            vec!["AI-OFM Basics - Pricing", "AI-OFM Basics - Setup"]
        );
        assert_eq!(out.document_evidence_used, 3);
    }

    #[test]
    fn test_qa_appended_after_documents_and_tagged() {
        let ranked = vec![doc("a", 10)];
        let matches = vec![qa("q1", "how do I start?", "post daily")];
        let out = assemble(&ranked, 1000, Some(&matches), &WhitespaceCounter);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[1].kind, EvidenceKind::PriorQa);
        assert_eq!(out.qa_used, 1);
        assert!(!out.requires_caveat());
        let doc_pos = out.context.find("[Source: AI-OFM Basics]").unwrap();
        let qa_pos = out.context.find("not authoritative").unwrap();
        assert!(doc_pos < qa_pos);
        assert!(out.context.contains("asked by user-7"));
        assert_eq!(out.citations[1].label, "Q&A 2025-03-14");
    }

    #[test]
    fn test_qa_only_requires_caveat() {
        let matches = vec![qa("q1", "how do I start?", "post daily")];
        let out = assemble(&[], 1000, Some(&matches), &WhitespaceCounter);
        assert_eq!(out.qa_used, 1);
        assert!(out.requires_caveat());
    }

    #[test]
    fn test_digest_only_requires_caveat() {
        let ranked = vec![evidence("g", EvidenceKind::Digest, None, 10)];
        let out = assemble(&ranked, 1000, None, &WhitespaceCounter);
        assert!(out.requires_caveat());
    }

    #[test]
    fn test_qa_respects_remaining_budget() {
        let ranked = vec![doc("a", 95)];
        let matches = vec![qa("q1", "a long question here", "and a long answer too")];
        let out = assemble(&ranked, 100, Some(&matches), &WhitespaceCounter);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.qa_used, 0);
    }

    #[test]
    fn test_format_sources() {
        let labels = vec!["A".to_string(), "B".to_string(), "A".to_string()];
        assert_eq!(format_sources(&labels), "Sources: [A, B]");
        assert_eq!(format_sources(&[]), "");
    }
}
