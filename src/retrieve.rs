//! Top-K retrieval against the persisted index.
//!
//! The index file is reloaded per query, so a chat request always sees the
//! most recently persisted build and never a build's in-memory working copy.

use std::path::PathBuf;
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::index::{Hit, VectorIndex};

pub struct Retriever {
    index_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index_path: PathBuf, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            index_path,
            embedder,
            top_k,
        }
    }

    /// The top-K most relevant chunks for `query`, best first.
    ///
    /// Fails with [`Error::IndexUnavailable`] when no build has succeeded yet
    /// (index file absent or holding zero vectors).
    pub async fn retrieve(&self, query: &str) -> Result<Vec<Hit>> {
        let index = VectorIndex::load(&self.index_path)?.ok_or(Error::IndexUnavailable)?;
        if index.is_empty() {
            return Err(Error::IndexUnavailable);
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        Ok(index.search(&query_vec, self.top_k))
    }
}
