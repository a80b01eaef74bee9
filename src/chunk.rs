//! Sliding-window text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! The window advances with stride `chunk_size - overlap`, so consecutive
//! chunks share exactly `overlap` characters. The last window is clipped to
//! the end of the text and is never empty.
//!
//! Sizes and offsets count Unicode scalar values, not bytes, so a window
//! never splits a multi-byte character.

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Check chunking parameters without touching any text.
pub fn validate_params(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfig(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::InvalidConfig(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Split `text` into overlapping windows tagged with `source_path`.
///
/// Returns chunks with contiguous indices starting at 0. Empty text yields
/// no chunks; text shorter than `chunk_size` yields exactly one.
pub fn chunk_text(
    source_path: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate_params(chunk_size, overlap)?;

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;
    let stride = chunk_size - overlap;

    let mut chunks = Vec::with_capacity(total_chars / stride + 1);
    let mut start = 0usize;

    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        chunks.push(Chunk {
            text: text[bounds[start]..bounds[end]].to_string(),
            source_path: source_path.to_string(),
            chunk_index: chunks.len(),
            char_start: start,
            char_end: end,
        });
        if end == total_chars {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}
