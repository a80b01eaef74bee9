//! Top-k retrieval over a loaded index.
//!
//! Every row is scored against the query vector with cosine similarity and
//! the best `k` are returned, highest score first. Equal scores keep index
//! order, so results are fully deterministic for a given index and query.

use std::cmp::Ordering;

use tracing::debug;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{RagError, Result};
use crate::index::Index;
use crate::models::ScoredChunk;

/// Embed `query` and return the `k` most similar chunks.
///
/// When `k` exceeds the number of rows, every row is returned.
pub async fn retrieve_top_k(
    index: &Index,
    query: &str,
    k: usize,
    embedder: &dyn Embedder,
) -> Result<Vec<ScoredChunk>> {
    check_request(index, k)?;
    let query_vector = embedder.embed(query).await?;
    rank(index, &query_vector, k)
}

/// Score every row against an already-embedded query.
pub fn rank(index: &Index, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
    check_request(index, k)?;
    if query_vector.len() != index.dims() {
        return Err(RagError::Embedding(format!(
            "query vector has width {}, index expects {}",
            query_vector.len(),
            index.dims()
        )));
    }

    let mut scored: Vec<(usize, f32)> = (0..index.len())
        .map(|row| (row, cosine_similarity(query_vector, index.vector(row))))
        .collect();

    // Stable sort: ties stay in row order.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);

    debug!(
        rows = index.len(),
        returned = scored.len(),
        best = scored.first().map(|s| s.1),
        "ranked index"
    );

    Ok(scored
        .into_iter()
        .map(|(row, score)| ScoredChunk {
            chunk: index.records()[row].clone(),
            score,
            row,
        })
        .collect())
}

fn check_request(index: &Index, k: usize) -> Result<()> {
    if k == 0 {
        return Err(RagError::InvalidConfig("top_k must be at least 1".to_string()));
    }
    if index.is_empty() {
        return Err(RagError::EmptyIndex);
    }
    Ok(())
}
