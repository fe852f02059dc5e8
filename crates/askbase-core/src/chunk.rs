//! Paragraph- and heading-aware text chunker with token overlap.
//!
//! Splits extracted document text into passages of at most `max_tokens`
//! tokens, measured with the same [`TokenCounter`] the downstream models
//! use. Consecutive passages within a section share `overlap_tokens`
//! tokens so that a fact sitting on a boundary is present in both.
//!
//! # Algorithm
//!
//! 1. Markdown headings (`#` to `######`) open a new section; the heading
//!    text becomes the section label of every chunk under it. Sections are
//!    chunked independently and overlap never crosses a heading.
//! 2. Blank lines separate paragraphs. Form feeds (PDF page breaks) also
//!    separate paragraphs and advance the page counter.
//! 3. Within a section, words are packed greedily into a window of
//!    `max_tokens`. If a paragraph boundary lies at least halfway into a
//!    full window, the chunk ends there instead of mid-paragraph.
//! 4. The next window starts `overlap_tokens` before the previous end,
//!    as long as the overlap and the next word still fit together.
//! 5. A single whitespace-free run larger than `max_tokens` cannot be
//!    split; it is emitted whole as one chunk flagged `oversized`.
//!
//! Output depends only on the input text, the configuration, and the
//! counter, so re-chunking identical text yields identical boundaries.

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::ChunkingError;
use crate::models::Chunk;
use crate::tokens::TokenCounter;

/// Chunk size limits, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_tokens == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_tokens must be > 0".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// A chunk before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub index: usize,
    pub section: Option<String>,
    pub text: String,
    pub token_count: usize,
    /// Page the chunk starts on (1-based; 1 for unpaged text).
    pub page: u32,
    pub oversized: bool,
}

struct Word<'a> {
    text: &'a str,
    tokens: usize,
    para_start: bool,
    page: u32,
}

struct Section<'a> {
    label: Option<String>,
    words: Vec<Word<'a>>,
}

/// Split `text` into ordered chunk drafts.
///
/// Empty or whitespace-only text yields an empty vector.
///
/// # Errors
///
/// - [`ChunkingError::InvalidConfig`] if the limits are inconsistent.
/// - [`ChunkingError::Unreadable`] if the text contains NUL bytes, which
///   only happens when binary content was passed off as text.
pub fn chunk_document(
    text: &str,
    config: &ChunkConfig,
    counter: &dyn TokenCounter,
) -> Result<Vec<ChunkDraft>, ChunkingError> {
    config.validate()?;
    if text.contains('\0') {
        return Err(ChunkingError::Unreadable(
            "text contains NUL bytes".to_string(),
        ));
    }

    let mut drafts = Vec::new();
    for section in split_sections(text, counter) {
        chunk_section(&section, config, counter, &mut drafts);
    }
    Ok(drafts)
}

fn split_sections<'a>(text: &'a str, counter: &dyn TokenCounter) -> Vec<Section<'a>> {
    let mut sections = Vec::new();
    let mut current = Section {
        label: None,
        words: Vec::new(),
    };
    let mut page = 1u32;
    let mut para_start = true;

    for line in text.lines() {
        for (i, segment) in line.split('\u{c}').enumerate() {
            if i > 0 {
                page += 1;
                para_start = true;
            }
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                para_start = true;
                continue;
            }
            if let Some(heading) = heading_text(trimmed) {
                let next = Section {
                    label: Some(heading.to_string()),
                    words: Vec::new(),
                };
                if current.words.is_empty() {
                    current = next;
                } else {
                    sections.push(std::mem::replace(&mut current, next));
                }
                para_start = true;
                continue;
            }
            for word in trimmed.split_whitespace() {
                current.words.push(Word {
                    text: word,
                    tokens: counter.count(word).max(1),
                    para_start,
                    page,
                });
                para_start = false;
            }
        }
    }

    if !current.words.is_empty() {
        sections.push(current);
    }
    sections
}

/// Markdown ATX heading text, if `line` is one.
fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

fn chunk_section(
    section: &Section<'_>,
    config: &ChunkConfig,
    counter: &dyn TokenCounter,
    out: &mut Vec<ChunkDraft>,
) {
    let words = &section.words;
    let n = words.len();
    let mut start = 0;

    while start < n {
        let mut end = start;
        let mut total = 0;
        while end < n && total + words[end].tokens <= config.max_tokens {
            total += words[end].tokens;
            end += 1;
        }

        if end == start {
            let text = words[start].text.to_string();
            let token_count = counter.count(&text);
            warn!(
                section = section.label.as_deref().unwrap_or(""),
                tokens = token_count,
                max_tokens = config.max_tokens,
                "unsplittable token run exceeds chunk limit; emitting oversized chunk"
            );
            out.push(ChunkDraft {
                index: out.len(),
                section: section.label.clone(),
                text,
                token_count,
                page: words[start].page,
                oversized: true,
            });
            start += 1;
            continue;
        }

        let mut stop = if end < n {
            preferred_break(words, start, end, config)
        } else {
            end
        };

        // Per-word counts are not additive under BPE, so measure the
        // rendered text and shrink until it fits.
        let mut text = render(&words[start..stop]);
        let mut token_count = counter.count(&text);
        while token_count > config.max_tokens && stop - start > 1 {
            stop -= 1;
            text = render(&words[start..stop]);
            token_count = counter.count(&text);
        }
        let oversized = token_count > config.max_tokens;
        if oversized {
            warn!(
                tokens = token_count,
                max_tokens = config.max_tokens,
                "chunk exceeds limit after shrinking; emitting oversized chunk"
            );
        }

        out.push(ChunkDraft {
            index: out.len(),
            section: section.label.clone(),
            text,
            token_count,
            page: words[start].page,
            oversized,
        });

        if stop >= n {
            break;
        }
        start = next_start(words, start, stop, config);
    }
}

/// End the chunk at the last paragraph boundary that leaves it at least
/// half full, otherwise at the hard window end.
fn preferred_break(words: &[Word<'_>], start: usize, end: usize, config: &ChunkConfig) -> usize {
    let min_tokens = (config.max_tokens / 2).max(config.overlap_tokens + 1);
    let mut acc = 0;
    let mut best = None;
    for b in start + 1..=end {
        acc += words[b - 1].tokens;
        if b < words.len() && words[b].para_start && acc >= min_tokens {
            best = Some(b);
        }
    }
    best.unwrap_or(end)
}

/// Start of the window after `[start, stop)`: back off by the overlap when
/// the overlap plus the next word still fit, otherwise start fresh.
fn next_start(words: &[Word<'_>], start: usize, stop: usize, config: &ChunkConfig) -> usize {
    if config.overlap_tokens == 0 {
        return stop;
    }
    let mut s = stop;
    let mut acc = 0;
    while s > start && acc < config.overlap_tokens {
        s -= 1;
        acc += words[s].tokens;
    }
    let s = s.max(start + 1);
    let carried: usize = words[s..stop].iter().map(|w| w.tokens).sum();
    if carried + words[stop].tokens > config.max_tokens {
        stop
    } else {
        s
    }
}

fn render(words: &[Word<'_>]) -> String {
    let mut out = String::new();
    for (i, w) in words.iter().enumerate() {
        if i > 0 {
            out.push_str(if w.para_start { "\n\n" } else { " " });
        }
        out.push_str(w.text);
    }
    out
}

/// SHA-256 of `text` as lowercase hex.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of a document's text under a given chunking setup. Two
/// ingestions with the same fingerprint produce identical chunks.
pub fn content_fingerprint(text: &str, config: &ChunkConfig, tokenizer: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(config.max_tokens.to_le_bytes());
    hasher.update(config.overlap_tokens.to_le_bytes());
    hasher.update(tokenizer.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk id derived from the owning document and position.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, index).as_bytes(),
    )
    .to_string()
}

/// Attach drafts to a document, producing storable [`Chunk`]s.
pub fn build_chunks(document_id: &str, drafts: &[ChunkDraft], created_at: i64) -> Vec<Chunk> {
    drafts
        .iter()
        .map(|d| Chunk {
            id: chunk_id(document_id, d.index),
            document_id: document_id.to_string(),
            chunk_index: d.index as i64,
            section: d.section.clone(),
            text: d.text.clone(),
            token_count: d.token_count,
            hash: text_hash(&d.text),
            metadata_json: json!({ "page": d.page, "section": d.section }).to_string(),
            oversized: d.oversized,
            created_at,
        })
        .collect()
}
