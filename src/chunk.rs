//! Fixed-size overlapping window chunker.
//!
//! `split` walks the text producing consecutive windows of `chunk_size`
//! characters advanced by `chunk_size - overlap`; the final window may be
//! shorter and is still emitted. Windows are measured in chars and cut on
//! char boundaries, so multi-byte text never splits a scalar value.
//!
//! The function is pure: the same inputs always produce the same chunks, and
//! concatenating the chunks with the overlap removed reconstructs the input
//! exactly.

use crate::error::{Error, Result};

/// An ordered text segment produced by splitting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the split sequence, starting at 0.
    pub index: usize,
    pub text: String,
    /// Byte offset of the window start in the source text.
    pub offset: usize,
}

/// Split text into overlapping windows.
///
/// Requires `0 <= overlap < chunk_size`. Empty or whitespace-only input is an
/// error rather than an empty sequence — downstream batching must never run
/// on zero chunks.
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(Error::InvalidChunking {
            chunk_size,
            overlap,
        });
    }
    if text.trim().is_empty() {
        return Err(Error::EmptyInput);
    }

    // Byte offset of every char boundary, plus the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + chunk_size).min(n_chars);
        chunks.push(Chunk {
            index: chunks.len(),
            text: text[bounds[start]..bounds[end]].to_string(),
            offset: bounds[start],
        });
        if end == n_chars {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
