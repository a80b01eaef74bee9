//! Core data models used throughout the pipeline.
//!
//! These types represent the chunk records, ranked results, and ingestion
//! outcomes that flow between the chunker, index, retriever, and context
//! assembler.

use serde::{Deserialize, Serialize};

/// A bounded, contiguous slice of one document's text.
///
/// Offsets are character (Unicode scalar value) positions into the extracted
/// document text; `char_end` is exclusive. One record is one row of
/// `chunks.jsonl`, so field names are part of the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl Chunk {
    /// Length of the window in characters.
    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// Row position of the chunk in the index it was retrieved from.
    pub row: usize,
}

/// A document that was skipped during ingestion, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestWarning {
    pub source_path: String,
    pub code: String,
    pub message: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub chunks_written: usize,
    pub documents_ingested: usize,
    /// True when an existing valid index was kept and nothing was embedded.
    pub skipped: bool,
    pub warnings: Vec<IngestWarning>,
}

impl IngestResult {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}
