//! Ingestion pipeline orchestration.
//!
//! Coordinates a full rebuild: discover documents → extract text → chunk →
//! embed → save. Per-document extraction failures are logged and collected
//! as warnings; everything else aborts the run before the existing index is
//! touched.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::{chunk_text, validate_params};
use crate::config::{Config, ProfileConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::extract;
use crate::index::{self, BuildOptions};
use crate::models::{Chunk, IngestResult, IngestWarning};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};

/// Directories never descended into.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Rebuild even when a valid index already exists.
    pub force: bool,
    pub build: BuildOptions,
}

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Path relative to the docs directory, `/`-separated.
    pub source_path: String,
}

/// Rebuild the profile's index from its docs directory.
///
/// With `force == false` an existing valid index short-circuits the run:
/// nothing is read, embedded, or written and `skipped` is set.
pub async fn ingest(
    profile: &ProfileConfig,
    embedder: &dyn Embedder,
    options: &IngestOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestResult> {
    validate_params(profile.chunk_size, profile.chunk_overlap)?;

    if !options.force && index::exists_valid(&profile.index_dir, options.build.dims) {
        info!(
            profile = %profile.name,
            path = %profile.index_dir.display(),
            "index up to date, skipping ingestion"
        );
        return Ok(IngestResult::skipped());
    }

    progress.report(IngestProgressEvent::Discovering {
        profile: profile.name.clone(),
    });
    let mut warnings = Vec::new();
    let documents = discover_documents(profile, &mut warnings)?;
    info!(
        profile = %profile.name,
        documents = documents.len(),
        docs_dir = %profile.docs_dir.display(),
        "discovered documents"
    );

    let mut records: Vec<Chunk> = Vec::new();
    let mut documents_ingested = 0usize;
    let total = documents.len() as u64;

    for (n, doc) in documents.iter().enumerate() {
        match read_document(doc, profile) {
            Ok(chunks) => {
                documents_ingested += 1;
                records.extend(chunks);
            }
            Err(e) => {
                warn!(source = %doc.source_path, error = %e, "skipping document");
                warnings.push(IngestWarning {
                    source_path: doc.source_path.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
        progress.report(IngestProgressEvent::Reading {
            n: n as u64 + 1,
            total,
        });
    }

    if documents_ingested == 0 {
        return Err(RagError::EmptyCorpus(profile.docs_dir.clone()));
    }

    info!(
        chunks = records.len(),
        model = embedder.model_name(),
        "embedding chunks"
    );
    let built = index::build_with_progress(records, embedder, &options.build, progress).await?;
    index::save(&built, &profile.index_dir)?;

    Ok(IngestResult {
        chunks_written: built.len(),
        documents_ingested,
        skipped: false,
        warnings,
    })
}

/// `rag ingest`: rebuild the profile's index and print a summary to stdout.
pub async fn run_ingest(
    config: &Config,
    profile: &ProfileConfig,
    force: bool,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    println!("ingest {}", profile.name);

    let embedder = create_embedder(&config.embedding)?;
    let options = IngestOptions {
        force,
        build: BuildOptions::from_config(&config.embedding),
    };
    let reporter = progress.reporter();
    let result = ingest(profile, embedder.as_ref(), &options, reporter.as_ref()).await?;

    if result.skipped {
        println!("index up to date (use --force to rebuild)");
        return Ok(());
    }

    println!("  documents ingested: {}", result.documents_ingested);
    println!("  chunks written: {}", result.chunks_written);
    println!("  warnings: {}", result.warnings.len());
    for w in &result.warnings {
        println!("    {} [{}]: {}", w.source_path, w.code, w.message);
    }
    println!("  index: {}", profile.index_dir.display());
    println!("ok");

    Ok(())
}

/// Extract and chunk one document. Blank documents count as unreadable.
fn read_document(doc: &SourceDocument, profile: &ProfileConfig) -> Result<Vec<Chunk>> {
    let text = extract::extract_file(&doc.path).map_err(|e| e.into_rag_error(&doc.path))?;
    if text.trim().is_empty() {
        return Err(RagError::Read {
            path: doc.path.clone(),
            message: "no extractable text".to_string(),
        });
    }
    chunk_text(
        &doc.source_path,
        &text,
        profile.chunk_size,
        profile.chunk_overlap,
    )
}

/// List files under the docs directory matching the profile's globs, sorted
/// by relative path. Unreadable directory entries become warnings.
pub fn discover_documents(
    profile: &ProfileConfig,
    warnings: &mut Vec<IngestWarning>,
) -> Result<Vec<SourceDocument>> {
    let root = &profile.docs_dir;
    if !root.is_dir() {
        return Err(RagError::Read {
            path: root.clone(),
            message: "docs directory does not exist".to_string(),
        });
    }

    let include_set = build_globset(&profile.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(profile.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                warn!(path = %path.display(), error = %e, "cannot read directory entry");
                warnings.push(IngestWarning {
                    source_path: relative_path(root, &path),
                    code: "read_error".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let source_path = relative_path(root, entry.path());
        if exclude_set.is_match(&source_path) || !include_set.is_match(&source_path) {
            continue;
        }
        documents.push(SourceDocument {
            path: entry.path().to_path_buf(),
            source_path,
        });
    }

    // Sort for deterministic ordering
    documents.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(documents)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RagError::InvalidConfig(format!("invalid glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::InvalidConfig(format!("invalid glob set: {}", e)))
}
