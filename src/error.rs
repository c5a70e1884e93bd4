//! Shared error taxonomy.
//!
//! Build-time variants (`DocumentNotFound`, `UnreadableDocument`, `EmptyInput`,
//! `EmbeddingProvider`) never reach a status poller as an error value — the
//! builder converts them into a terminal `error` status. Chat-time provider
//! variants surface as an error marker on the answer stream. Nothing in this
//! crate retries automatically; retry policy belongs to the caller.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input text was empty or whitespace-only; there is nothing to chunk.
    #[error("no processable content in input text")]
    EmptyInput,

    /// `overlap` must be strictly smaller than `chunk_size`, both non-zero window.
    #[error("invalid chunking parameters: chunk_size={chunk_size}, overlap={overlap}")]
    InvalidChunking { chunk_size: usize, overlap: usize },

    /// The document path did not resolve to a readable file.
    #[error("document not found: {0}")]
    DocumentNotFound(PathBuf),

    /// The document existed but extraction produced no text.
    #[error("unreadable document: {0}")]
    UnreadableDocument(String),

    /// A query was attempted before any build succeeded.
    #[error("no index available; build the knowledge base first")]
    IndexUnavailable,

    /// The embedding capability provider failed.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// The language-model capability provider failed.
    #[error("generation provider error: {0}")]
    GenerationProvider(String),

    /// A build was submitted while another build is processing.
    #[error("a build is already in progress")]
    BuildInProgress,

    /// Reading or writing the persisted index failed.
    #[error("index storage error: {0}")]
    Index(String),

    /// Conversation store (SQLite) failure.
    #[error("conversation store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
