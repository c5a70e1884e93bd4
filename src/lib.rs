//! # Docuchat
//!
//! A document-grounded chat service. Documents are chunked, embedded, and
//! merged into a persisted similarity-search index by a background build job;
//! a retrieval-augmented chat flow answers questions strictly from the
//! indexed content, streaming the reply while logging every exchange to a
//! per-thread conversation history.
//!
//! ## Architecture
//!
//! ```text
//! document ──▶ extract ──▶ chunk ──▶ embed (batches) ──▶ vector index (file)
//!                              builder: progress + cancellation
//!
//! question ──▶ retrieve top-K ──▶ grounded prompt ──▶ streamed generation
//!       history (SQLite) ──────────────┘                      │
//!       └────────────────── persisted exchange ◀──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | txt/PDF/docx text extraction |
//! | [`chunk`] | Overlapping fixed-size window chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | File-persisted vector index |
//! | [`builder`] | Background index-build job |
//! | [`conversation`] | Thread/message store |
//! | [`retrieve`] | Top-K retrieval |
//! | [`generation`] | Streamed language-model provider |
//! | [`chat`] | RAG orchestration |
//! | [`server`] | HTTP surface (SSE chat, build control) |

pub mod builder;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod migrate;
pub mod retrieve;
pub mod server;
