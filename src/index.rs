//! File-persisted similarity-search index.
//!
//! A flat collection of `(vector, chunk_text)` pairs serialized as JSON.
//! `load` returns `None` when no index has ever been persisted; `save` writes
//! to a sibling temp file and renames it into place, so a concurrent reader
//! never observes a half-written index. Search is brute-force cosine over all
//! entries, which is plenty at single-document scale.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// One embedded chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub text: String,
}

/// In-memory form of the persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub dims: usize,
    pub entries: Vec<IndexEntry>,
}

/// A retrieval hit: similarity score plus the chunk text.
#[derive(Debug, Clone)]
pub struct Hit {
    pub score: f32,
    pub text: String,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a batch of (vector, text) pairs. Vectors and texts must be the
    /// same length and in the same order.
    pub fn merge(&mut self, vectors: Vec<Vec<f32>>, texts: &[String]) {
        for (vector, text) in vectors.into_iter().zip(texts.iter()) {
            self.entries.push(IndexEntry {
                vector,
                text: text.clone(),
            });
        }
    }

    /// Top-k entries by cosine similarity to `query`, best first. Ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Hit> {
        let mut hits: Vec<Hit> = self
            .entries
            .iter()
            .map(|e| Hit {
                score: cosine_similarity(query, &e.vector),
                text: e.text.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        hits
    }

    /// Load a persisted index, or `None` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<VectorIndex>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path).map_err(|e| Error::Index(e.to_string()))?;
        let index: VectorIndex =
            serde_json::from_slice(&bytes).map_err(|e| Error::Index(e.to_string()))?;
        Ok(Some(index))
    }

    /// Persist atomically: write a temp file next to the target, then rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Index(e.to_string()))?;
        }
        let bytes = serde_json::to_vec(self).map_err(|e| Error::Index(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, bytes).map_err(|e| Error::Index(e.to_string()))?;
        std::fs::rename(&tmp_path, path).map_err(|e| Error::Index(e.to_string()))?;
        Ok(())
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_or_empty_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn merge_appends_in_order() {
        let mut idx = VectorIndex::new(2);
        idx.merge(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            &["first".to_string(), "second".to_string()],
        );
        idx.merge(vec![vec![1.0, 1.0]], &["third".to_string()]);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.entries[0].text, "first");
        assert_eq!(idx.entries[2].text, "third");
    }

    #[test]
    fn search_ranks_by_similarity() {
        let mut idx = VectorIndex::new(2);
        idx.merge(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
            &["x".to_string(), "y".to_string(), "xy".to_string()],
        );
        let hits = idx.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "x");
        assert_eq!(hits[1].text, "xy");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn load_absent_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        assert!(VectorIndex::load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store/index.json");

        let mut idx = VectorIndex::new(3);
        idx.merge(vec![vec![0.5, 0.25, 0.0]], &["hello".to_string()]);
        idx.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap().unwrap();
        assert_eq!(loaded.dims, 3);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries[0].text, "hello");
        assert_eq!(loaded.entries[0].vector, vec![0.5, 0.25, 0.0]);

        // No temp file left behind
        assert!(!path.with_extension("json.tmp").exists());
    }
}
