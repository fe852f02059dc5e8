use std::collections::HashSet;

use askbase_core::assemble::assemble;
use askbase_core::chunk::{chunk_document, ChunkConfig};
use askbase_core::fusion::{fuse, FusedEvidence, FusionParams, Normalization, RankedList};
use askbase_core::models::{EvidenceKind, Passage, RetrievalSource};
use askbase_core::store::Candidate;
use askbase_core::tokens::{Cl100kCounter, WhitespaceCounter};
use proptest::prelude::*;

fn passage(id: u8, tokens: usize) -> Passage {
    Passage {
        id: format!("chunk-{}", id),
        kind: EvidenceKind::DocumentChunk,
        document_id: Some("doc".into()),
        title: format!("Doc {}", id % 4),
        section: None,
        text: vec!["tok"; tokens].join(" "),
        token_count: tokens,
        created_at: i64::from(id % 7),
    }
}

fn list(source: RetrievalSource, hits: &[(u8, f64)]) -> RankedList {
    RankedList {
        source,
        candidates: hits
            .iter()
            .map(|(id, score)| Candidate {
                passage: passage(*id, 5),
                raw_score: *score,
            })
            .collect(),
    }
}

fn document_text() -> impl Strategy<Value = String> {
    let word = "[a-z]{1,12}";
    let paragraph = prop::collection::vec(word, 1..60).prop_map(|w| w.join(" "));
    let block = prop_oneof![
        4 => paragraph,
        1 => "[a-z]{1,10}".prop_map(|h| format!("## {}", h)),
    ];
    prop::collection::vec(block, 0..12).prop_map(|b| b.join("\n\n"))
}

fn chunk_config() -> impl Strategy<Value = ChunkConfig> {
    (8usize..80).prop_flat_map(|max| {
        (Just(max), 0..max).prop_map(|(max_tokens, overlap_tokens)| ChunkConfig {
            max_tokens,
            overlap_tokens,
        })
    })
}

fn hits() -> impl Strategy<Value = Vec<(u8, f64)>> {
    prop::collection::vec((0u8..30, -5.0f64..50.0), 0..15)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rechunking_is_identical(text in document_text(), config in chunk_config()) {
        let counter = Cl100kCounter::new().unwrap();
        let first = chunk_document(&text, &config, &counter).unwrap();
        let second = chunk_document(&text, &config, &counter).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn chunks_respect_token_limit(text in document_text(), config in chunk_config()) {
        let counter = Cl100kCounter::new().unwrap();
        for chunk in chunk_document(&text, &config, &counter).unwrap() {
            if chunk.oversized {
                prop_assert_eq!(chunk.text.split_whitespace().count(), 1);
            } else {
                prop_assert!(
                    chunk.token_count <= config.max_tokens,
                    "{} > {}", chunk.token_count, config.max_tokens
                );
            }
        }
    }

    #[test]
    fn whitespace_chunks_cover_every_word(text in document_text(), config in chunk_config()) {
        let chunks = chunk_document(&text, &config, &WhitespaceCounter).unwrap();
        let body_words: HashSet<&str> = text
            .lines()
            .filter(|l| !l.starts_with("## "))
            .flat_map(|l| l.split_whitespace())
            .collect();
        let chunk_words: HashSet<&str> = chunks
            .iter()
            .flat_map(|c| c.text.split_whitespace())
            .collect();
        prop_assert_eq!(body_words, chunk_words);
    }

    #[test]
    fn fusion_is_commutative(lex in hits(), vec in hits(), rank in any::<bool>()) {
        let params = FusionParams {
            max_candidates: 50,
            normalization: if rank { Normalization::Rank } else { Normalization::MinMax },
            ..FusionParams::default()
        };
        let l = list(RetrievalSource::Lexical, &lex);
        let v = list(RetrievalSource::Vector, &vec);
        prop_assert_eq!(fuse(&[l.clone(), v.clone()], &params), fuse(&[v, l], &params));
    }

    #[test]
    fn fused_ids_are_unique(lex in hits(), vec in hits()) {
        let params = FusionParams { max_candidates: 100, ..FusionParams::default() };
        let fused = fuse(
            &[list(RetrievalSource::Lexical, &lex), list(RetrievalSource::Vector, &vec)],
            &params,
        );
        let ids: HashSet<&str> = fused.iter().map(|f| f.passage.id.as_str()).collect();
        prop_assert_eq!(ids.len(), fused.len());

        let expected: HashSet<u8> = lex.iter().chain(vec.iter()).map(|(id, _)| *id).collect();
        prop_assert_eq!(fused.len(), expected.len());
        for f in &fused {
            prop_assert!((0.0..=1.0).contains(&f.score));
        }
    }

    #[test]
    fn assembler_never_truncates(
        sizes in prop::collection::vec(1usize..400, 0..12),
        budget in 0usize..1500,
    ) {
        let ranked: Vec<FusedEvidence> = sizes
            .iter()
            .enumerate()
            .map(|(i, tokens)| FusedEvidence {
                passage: passage(i as u8, *tokens),
                score: 1.0 - i as f64 * 0.01,
                lexical_score: 0.0,
                vector_score: 0.0,
                lexical_raw: None,
                vector_raw: None,
            })
            .collect();
        let out = assemble(&ranked, budget, None, &WhitespaceCounter);

        prop_assert!(out.tokens_used <= budget);
        for (item, fused) in out.items.iter().zip(&ranked) {
            prop_assert_eq!(&item.id, &fused.passage.id);
            prop_assert_eq!(&item.text, &fused.passage.text);
            prop_assert_eq!(item.token_count, fused.passage.token_count);
        }
        if let Some(next) = ranked.get(out.items.len()) {
            prop_assert!(out.tokens_used + next.passage.token_count > budget);
        }
        prop_assert_eq!(out.budget_exceeded.is_some(), out.items.is_empty() && !ranked.is_empty());
    }
}

#[test]
fn ai_ofm_basics_scenario() {
    let paragraph = |tag: &str| {
        (0..300)
            .map(|i| format!("{}{}", tag, i))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let text = format!("{}\n\n{}\n\n{}", paragraph("a"), paragraph("b"), paragraph("c"));
    let config = ChunkConfig {
        max_tokens: 300,
        overlap_tokens: 50,
    };
    let chunks = chunk_document(&text, &config, &WhitespaceCounter).unwrap();
    assert_eq!(chunks.len(), 4);
    for pair in chunks.windows(2) {
        let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
        let next: Vec<&str> = pair[1].text.split_whitespace().collect();
        assert!(pair[0].token_count <= 300);
        assert_eq!(&prev[prev.len() - 50..], &next[..50]);
    }
}

#[test]
fn same_chunk_top_lexical_second_vector() {
    let lexical = list(RetrievalSource::Lexical, &[(1, 9.0), (2, 4.0), (3, 1.0)]);
    let vector = list(RetrievalSource::Vector, &[(4, 0.9), (1, 0.8), (5, 0.1)]);
    let fused = fuse(&[lexical, vector], &FusionParams::default());
    let hits: Vec<&FusedEvidence> = fused.iter().filter(|f| f.passage.id == "chunk-1").collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(fused[0].passage.id, "chunk-1");
    assert!(hits[0].lexical_raw.is_some() && hits[0].vector_raw.is_some());
}
