//! # askbase core
//!
//! Retrieval logic shared by every askbase frontend: data models, token
//! counting, the paragraph/heading chunker, the embedding trait and cache,
//! the store abstraction with its lexical and vector adapters, hybrid score
//! fusion, and token-budgeted evidence assembly.
//!
//! This crate contains no database driver, HTTP client, or async runtime.
//! Concrete stores and providers live in the `askbase` application crate.
//!
//! ```text
//!   question ──▶ embed ──▶ vector adapter ─┐
//!        └────────────────▶ lexical adapter ┴──▶ fuse ──▶ assemble ──▶ generate
//! ```

pub mod assemble;
pub mod chunk;
pub mod classify;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod models;
pub mod store;
pub mod tokens;

pub use error::{BudgetExceededError, ChunkingError, EmbeddingError, IndexUnavailableError};
