//! Typed failures for the indexing and retrieval engine.
//!
//! Every fallible library operation returns [`RagError`]. The CLI and server
//! layers wrap it in `anyhow` or map it onto HTTP status codes; nothing in the
//! library swallows an error except per-document extraction problems, which
//! the ingestion pipeline downgrades to warnings.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the library.
pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Bad chunking / retrieval parameters. Raised before any I/O.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A document (or the docs directory) could not be read.
    #[error("cannot read {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// A document has a format the extractor does not handle.
    #[error("unsupported format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Ingestion found no document with extractable text.
    #[error("no documents could be ingested from {}", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index not found at {}; run `rag ingest` first", .0.display())]
    IndexNotFound(PathBuf),

    #[error("index at {} is corrupt: {reason}", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("index has no rows")]
    EmptyIndex,

    #[error("answer generation failed: {0}")]
    Llm(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RagError::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable code, used in HTTP error bodies and warnings.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::InvalidConfig(_) => "invalid_config",
            RagError::Read { .. } => "read_error",
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::EmptyCorpus(_) => "empty_corpus",
            RagError::Embedding(_) => "embedding_error",
            RagError::IndexNotFound(_) => "index_not_found",
            RagError::IndexCorrupt { .. } => "index_corrupt",
            RagError::EmptyIndex => "empty_index",
            RagError::Llm(_) => "llm_error",
            RagError::Io(_) => "io_error",
        }
    }
}
