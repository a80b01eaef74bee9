//! Context assembly for the answer generator.
//!
//! Ranked chunks are rendered in the order given, each under a header line:
//!
//! ```text
//! Source: contracts/msa.pdf (chunk 3, sim=0.812)
//! <chunk text>
//! -----
//! Source: ...
//! ```
//!
//! The header is stable and machine-parseable with [`parse_source_header`].

use crate::config::{CONTEXT_PLACEHOLDER, QUERY_PLACEHOLDER};
use crate::models::ScoredChunk;

/// Placed between consecutive context entries.
pub const SEPARATOR: &str = "\n-----\n";

const HEADER_PREFIX: &str = "Source: ";

/// Concatenate `ranked` into a single context string. An empty slice yields
/// an empty string.
pub fn build_context(ranked: &[ScoredChunk]) -> String {
    ranked
        .iter()
        .map(|scored| {
            format!(
                "{}\n{}",
                source_header(
                    &scored.chunk.source_path,
                    scored.chunk.chunk_index,
                    scored.score
                ),
                scored.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// The attribution line written above each chunk.
pub fn source_header(source_path: &str, chunk_index: usize, score: f32) -> String {
    format!(
        "{}{} (chunk {}, sim={:.3})",
        HEADER_PREFIX, source_path, chunk_index, score
    )
}

/// Recover `(source_path, chunk_index, score)` from a header line, or `None`
/// if the line is not a header.
pub fn parse_source_header(line: &str) -> Option<(String, usize, f32)> {
    let rest = line.strip_prefix(HEADER_PREFIX)?;
    // Search from the right so paths containing " (chunk " still parse.
    let open = rest.rfind(" (chunk ")?;
    let source_path = &rest[..open];
    let inner = rest[open + " (chunk ".len()..].strip_suffix(')')?;
    let (index, sim) = inner.split_once(", sim=")?;
    Some((
        source_path.to_string(),
        index.parse().ok()?,
        sim.parse().ok()?,
    ))
}

/// Fill the `{query}` and `{context}` placeholders of a user prompt template.
///
/// Placeholder-like text inside the question or the retrieved documents is
/// left as is.
pub fn render_user_prompt(template: &str, question: &str, context: &str) -> String {
    template
        .split(CONTEXT_PLACEHOLDER)
        .map(|part| part.replace(QUERY_PLACEHOLDER, question))
        .collect::<Vec<_>>()
        .join(context)
}
