//! # askbase
//!
//! Question answering over a private knowledge base. Uploaded documents
//! are chunked, embedded and stored in SQLite behind two indexes (FTS5
//! BM25 and brute-force cosine). Questions are answered from a fused,
//! token-budgeted selection of evidence, with daily community digests and
//! past answers as secondary sources.
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │ PDF / DOCX │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  TXT / MD  │   │  (versioned) │   │ FTS5+Vec  │
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │
//!          question ──▶ retrieve ──▶ fuse ──▶ assemble ──▶ generate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//! | [`sqlite_store`] | `Store` implementation on SQLite |
//! | [`embedding`] | Embedding providers and the batching manager |
//! | [`generate`] | Chat-completion provider and prompts |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`engine`] | Shared pipeline state |
//! | [`ingest`] | Versioned document ingestion |
//! | [`retrieve`] | Hybrid query pipeline |
//! | [`answer`] | Answer generation with citations |
//! | [`digest`] | Community messages and daily digests |

pub mod answer;
pub mod commands;
pub mod config;
pub mod db;
pub mod digest;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod retrieve;
pub mod sqlite_store;
pub mod stats;
