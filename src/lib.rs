//! # RAG Harness
//!
//! Profile-scoped retrieval-augmented generation over local documents.
//!
//! Each profile names a docs directory and an index directory. Ingestion
//! rebuilds the profile's index from scratch; querying embeds the question,
//! ranks every stored chunk by cosine similarity, and hands the top `k`
//! (with source attribution) to a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ docs_dir   │──▶│ Extract +    │──▶│ index_dir            │
//! │ txt/md/pdf │   │ Chunk + Embed│   │ chunks.jsonl         │
//! │ docx       │   └──────────────┘   │ vectors.bin          │
//! └────────────┘                      └──────────┬───────────┘
//!                                                │
//!                          ┌─────────────────────┤
//!                          ▼                     ▼
//!                   ┌────────────┐        ┌────────────┐
//!                   │ CLI (rag)  │        │ HTTP       │
//!                   │ query      │        │ /rag/query │
//!                   └────────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag ingest                          # build the active profile's index
//! rag query "what is the deadline?"   # retrieve + answer
//! rag --profile legal profiles        # show every profile's index health
//! rag serve                           # start the HTTP service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and profile resolution |
//! | [`models`] | Chunk records and pipeline results |
//! | [`chunk`] | Fixed-size overlapping character windows |
//! | [`extract`] | Text extraction for txt, md, pdf, docx |
//! | [`embedding`] | Embedder trait, providers, cosine similarity |
//! | [`index`] | Index build, atomic save, validated load |
//! | [`ingest`] | Discover → extract → chunk → embed → save |
//! | [`retrieve`] | Exhaustive top-k ranking |
//! | [`context`] | Context assembly and prompt rendering |
//! | [`llm`] | Answer generator trait and providers |
//! | [`query`] | Retrieve, assemble, generate; interactive sessions |
//! | [`eval`] | Keyword evaluation against a question dataset |
//! | [`profiles`] | Profile table for `rag profiles` |
//! | [`progress`] | Ingestion progress reporting |
//! | [`server`] | HTTP query service |
//! | [`error`] | Error taxonomy |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod eval;
pub mod extract;
mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod profiles;
pub mod progress;
pub mod query;
pub mod retrieve;
pub mod server;

pub use error::{RagError, Result};
