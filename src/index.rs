//! The persisted pairing of chunk records and embedding vectors.
//!
//! An [`Index`] is an ordered list of [`Chunk`] records and an `n × dims`
//! matrix of `f32` vectors; row `i` embeds `records[i].text`. On disk it is
//! two co-located artifacts inside the profile's index directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `chunks.jsonl` | one JSON object per record, in row order |
//! | `vectors.bin` | header + row-major little-endian `f32` matrix |
//!
//! `vectors.bin` layout:
//!
//! ```text
//! offset  size  field
//! 0       4     magic  b"RAGV"
//! 4       4     format version (u32 LE, currently 1)
//! 8       8     row count (u64 LE)
//! 16      4     dims (u32 LE)
//! 20      ...   rows × dims × f32 LE
//! ```
//!
//! # Atomic replacement
//!
//! [`save`] writes both files into a fresh staging directory beside the
//! index directory and then swaps directories with renames: the live
//! directory is first retired to `.<name>.old-<uuid>`, then the staging
//! directory takes its place. While the live directory is absent, [`load`]
//! reads the retired one, so a reader always sees the complete old pair or
//! the complete new pair and never one new file next to one stale file. A
//! save interrupted in that gap is repaired by the next [`save`].

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EmbeddingConfig;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::Chunk;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

pub const RECORDS_FILE: &str = "chunks.jsonl";
pub const VECTORS_FILE: &str = "vectors.bin";

const VECTOR_MAGIC: &[u8; 4] = b"RAGV";
const VECTOR_FORMAT_VERSION: u32 = 1;
const VECTOR_HEADER_LEN: usize = 20;

/// Chunk records paired positionally with their embedding vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    dims: usize,
    records: Vec<Chunk>,
    /// Row-major, `records.len() * dims` values.
    vectors: Vec<f32>,
}

impl Index {
    /// Assemble an index from records and one vector per record.
    ///
    /// Fails with [`RagError::Embedding`] when the counts differ or any
    /// vector's width is not `dims`.
    pub fn from_rows(dims: usize, records: Vec<Chunk>, rows: Vec<Vec<f32>>) -> Result<Self> {
        if records.len() != rows.len() {
            return Err(RagError::Embedding(format!(
                "{} vectors for {} records",
                rows.len(),
                records.len()
            )));
        }
        let mut vectors = Vec::with_capacity(records.len() * dims);
        for (i, row) in rows.iter().enumerate() {
            check_width(i, row, dims)?;
            vectors.extend_from_slice(row);
        }
        Ok(Self {
            dims,
            records,
            vectors,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Chunk] {
        &self.records
    }

    /// The embedding of row `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.len()`.
    pub fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dims..(row + 1) * self.dims]
    }

    /// Iterate `(record, vector)` pairs in row order.
    pub fn rows(&self) -> impl Iterator<Item = (&Chunk, &[f32])> {
        self.records
            .iter()
            .zip(self.vectors.chunks_exact(self.dims.max(1)))
    }
}

fn check_width(row: usize, vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        return Err(RagError::Embedding(format!(
            "embedding for row {} has {} dimensions, expected {}",
            row,
            vector.len(),
            dims
        )));
    }
    Ok(())
}

/// How records are sent to the embedder during [`build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Declared vector width; every returned vector must match it.
    pub dims: usize,
    /// Records per embedder call.
    pub batch_size: usize,
    /// Maximum batches in flight at once.
    pub concurrency: usize,
}

impl BuildOptions {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            dims: config.dims,
            batch_size: config.batch_size,
            concurrency: config.concurrency,
        }
    }
}

/// Embed every record, in record order, and return the assembled index.
///
/// Nothing is written to disk. Any embedder failure, short response, or
/// vector of the wrong width aborts the whole build.
pub async fn build(
    records: Vec<Chunk>,
    embedder: &dyn Embedder,
    options: &BuildOptions,
) -> Result<Index> {
    build_with_progress(records, embedder, options, &NoProgress).await
}

/// [`build`], reporting the number of embedded records after each batch.
pub async fn build_with_progress(
    records: Vec<Chunk>,
    embedder: &dyn Embedder,
    options: &BuildOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<Index> {
    let dims = options.dims;
    let total = records.len();
    let batch_size = options.batch_size.max(1);

    let mut vectors: Vec<f32> = Vec::with_capacity(total * dims);
    let mut embedded = 0usize;

    {
        // `buffered` yields results in submission order even when later
        // batches finish first.
        let mut batches = stream::iter(records.chunks(batch_size).map(|batch| async move {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let result = embedder.embed_batch(&texts).await;
            (batch.len(), result)
        }))
        .buffered(options.concurrency.max(1));

        while let Some((expected, result)) = batches.next().await {
            let batch_vectors = result?;
            if batch_vectors.len() != expected {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for a batch of {}",
                    batch_vectors.len(),
                    expected
                )));
            }
            for vector in &batch_vectors {
                check_width(embedded, vector, dims)?;
                vectors.extend_from_slice(vector);
                embedded += 1;
            }
            debug!(embedded, total, "embedded batch");
            progress.report(IngestProgressEvent::Embedding {
                n: embedded as u64,
                total: total as u64,
            });
        }
    }

    Ok(Index {
        dims,
        records,
        vectors,
    })
}

/// Persist `index` to `index_dir`, replacing any existing index.
pub fn save(index: &Index, index_dir: &Path) -> Result<()> {
    if index.vectors.len() != index.records.len() * index.dims {
        return Err(RagError::corrupt(
            index_dir,
            format!(
                "refusing to save {} vector values for {} records of width {}",
                index.vectors.len(),
                index.records.len(),
                index.dims
            ),
        ));
    }

    let (parent, name) = split_dir(index_dir)?;
    fs::create_dir_all(&parent)?;
    restore_retired(index_dir, &parent, &name)?;

    let staging = parent.join(format!(".{}.staging-{}", name, Uuid::new_v4()));
    fs::create_dir(&staging)?;
    if let Err(e) = write_artifacts(index, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    swap_into_place(&staging, index_dir, &parent, &name)?;

    info!(
        rows = index.len(),
        dims = index.dims,
        path = %index_dir.display(),
        "index saved"
    );
    Ok(())
}

fn split_dir(index_dir: &Path) -> Result<(PathBuf, String)> {
    let name = index_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            RagError::InvalidConfig(format!(
                "index_dir must name a directory: {}",
                index_dir.display()
            ))
        })?;
    let parent = match index_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((parent, name))
}

fn write_artifacts(index: &Index, dir: &Path) -> Result<()> {
    let mut records = BufWriter::new(File::create(dir.join(RECORDS_FILE))?);
    for record in &index.records {
        serde_json::to_writer(&mut records, record).map_err(std::io::Error::from)?;
        records.write_all(b"\n")?;
    }
    records.flush()?;
    records.get_ref().sync_all()?;

    let mut vectors = BufWriter::new(File::create(dir.join(VECTORS_FILE))?);
    vectors.write_all(VECTOR_MAGIC)?;
    vectors.write_all(&VECTOR_FORMAT_VERSION.to_le_bytes())?;
    vectors.write_all(&(index.records.len() as u64).to_le_bytes())?;
    vectors.write_all(&(index.dims as u32).to_le_bytes())?;
    for value in &index.vectors {
        vectors.write_all(&value.to_le_bytes())?;
    }
    vectors.flush()?;
    vectors.get_ref().sync_all()?;

    Ok(())
}

fn swap_into_place(staging: &Path, index_dir: &Path, parent: &Path, name: &str) -> Result<()> {
    if index_dir.exists() {
        let retired = parent.join(format!(".{}.old-{}", name, Uuid::new_v4()));
        if let Err(e) = fs::rename(index_dir, &retired) {
            let _ = fs::remove_dir_all(staging);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(staging, index_dir) {
            // Put the previous index back so the profile stays queryable.
            let _ = fs::rename(&retired, index_dir);
            let _ = fs::remove_dir_all(staging);
            return Err(e.into());
        }
    } else if let Err(e) = fs::rename(staging, index_dir) {
        let _ = fs::remove_dir_all(staging);
        return Err(e.into());
    }

    for old in retired_dirs(parent, name) {
        if let Err(e) = fs::remove_dir_all(&old) {
            warn!(path = %old.display(), error = %e, "failed to remove previous index");
        }
    }
    Ok(())
}

fn has_artifacts(dir: &Path) -> bool {
    dir.join(RECORDS_FILE).is_file() && dir.join(VECTORS_FILE).is_file()
}

/// Retired copies of `<parent>/<name>`, newest first.
fn retired_dirs(parent: &Path, name: &str) -> Vec<PathBuf> {
    let prefix = format!(".{}.old-", name);
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut dirs: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    dirs.into_iter().map(|(_, path)| path).collect()
}

/// Move the newest complete retired index back into `index_dir` when a
/// previous save stopped between its two renames.
fn restore_retired(index_dir: &Path, parent: &Path, name: &str) -> Result<()> {
    if index_dir.exists() {
        return Ok(());
    }
    if let Some(retired) = retired_dirs(parent, name)
        .into_iter()
        .find(|dir| has_artifacts(dir))
    {
        warn!(
            from = %retired.display(),
            to = %index_dir.display(),
            "restoring index left behind by an interrupted save"
        );
        fs::rename(&retired, index_dir)?;
    }
    Ok(())
}

/// The directory to read `index_dir`'s artifacts from: `index_dir` itself,
/// or its retired copy while a save is between renames.
fn readable_dir(index_dir: &Path) -> Option<PathBuf> {
    if has_artifacts(index_dir) {
        return Some(index_dir.to_path_buf());
    }
    if let Ok((parent, name)) = split_dir(index_dir) {
        if let Some(retired) = retired_dirs(&parent, &name)
            .into_iter()
            .find(|dir| has_artifacts(dir))
        {
            return Some(retired);
        }
    }
    // The swap may have finished while the retired copies were listed.
    has_artifacts(index_dir).then(|| index_dir.to_path_buf())
}

/// Load the index stored in `index_dir`, checking it against `dims`.
///
/// While a [`save`] is between renames the retired copy is read instead.
pub fn load(index_dir: &Path, dims: usize) -> Result<Index> {
    let dir = readable_dir(index_dir)
        .ok_or_else(|| RagError::IndexNotFound(index_dir.to_path_buf()))?;
    match load_from(&dir, index_dir, dims) {
        // The retired copy was removed mid-read; the new index is in place.
        Err(RagError::Io(e))
            if dir.as_path() != index_dir && e.kind() == std::io::ErrorKind::NotFound =>
        {
            load_from(index_dir, index_dir, dims)
        }
        result => result,
    }
}

fn load_from(dir: &Path, index_dir: &Path, dims: usize) -> Result<Index> {
    let records_path = dir.join(RECORDS_FILE);
    let vectors_path = dir.join(VECTORS_FILE);
    if !records_path.is_file() || !vectors_path.is_file() {
        return Err(RagError::IndexNotFound(index_dir.to_path_buf()));
    }

    let (rows, width, vectors) = read_vectors(&vectors_path, index_dir)?;
    if width != dims {
        return Err(RagError::corrupt(
            index_dir,
            format!("vector width is {} but embedding.dims is {}", width, dims),
        ));
    }

    let records = read_records(&records_path, index_dir)?;
    if records.len() != rows {
        return Err(RagError::corrupt(
            index_dir,
            format!("{} vector rows for {} records", rows, records.len()),
        ));
    }

    debug!(rows, dims, path = %index_dir.display(), "index loaded");
    Ok(Index {
        dims,
        records,
        vectors,
    })
}

fn read_vectors(path: &Path, index_dir: &Path) -> Result<(usize, usize, Vec<f32>)> {
    let bytes = fs::read(path)?;
    if bytes.len() < VECTOR_HEADER_LEN || &bytes[0..4] != VECTOR_MAGIC {
        return Err(RagError::corrupt(index_dir, "vectors.bin has no valid header"));
    }

    let version = u32::from_le_bytes(le_array(&bytes[4..8]));
    if version != VECTOR_FORMAT_VERSION {
        return Err(RagError::corrupt(
            index_dir,
            format!("unsupported vectors.bin version {}", version),
        ));
    }
    let rows = u64::from_le_bytes(le_array(&bytes[8..16])) as usize;
    let width = u32::from_le_bytes(le_array(&bytes[16..20])) as usize;

    let payload = &bytes[VECTOR_HEADER_LEN..];
    let expected = rows
        .checked_mul(width)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RagError::corrupt(index_dir, "vectors.bin header overflows"))?;
    if payload.len() != expected {
        return Err(RagError::corrupt(
            index_dir,
            format!(
                "vectors.bin holds {} payload bytes, header declares {} rows × {} dims",
                payload.len(),
                rows,
                width
            ),
        ));
    }

    let vectors = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((rows, width, vectors))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn read_records(path: &Path, index_dir: &Path) -> Result<Vec<Chunk>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Chunk = serde_json::from_str(&line).map_err(|e| {
            RagError::corrupt(
                index_dir,
                format!("chunks.jsonl line {}: {}", line_no + 1, e),
            )
        })?;
        if record.char_end < record.char_start {
            return Err(RagError::corrupt(
                index_dir,
                format!("chunks.jsonl line {}: char_end before char_start", line_no + 1),
            ));
        }
        records.push(record);
    }
    Ok(records)
}

/// Health of an index directory, as reported by `rag profiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Ok { rows: usize },
    Missing,
    Corrupt(String),
}

pub fn status(index_dir: &Path, dims: usize) -> IndexStatus {
    match load(index_dir, dims) {
        Ok(index) => IndexStatus::Ok { rows: index.len() },
        Err(RagError::IndexNotFound(_)) => IndexStatus::Missing,
        Err(e) => IndexStatus::Corrupt(e.to_string()),
    }
}

/// True when `index_dir` holds an index that loads cleanly at `dims`.
pub fn exists_valid(index_dir: &Path, dims: usize) -> bool {
    matches!(status(index_dir, dims), IndexStatus::Ok { .. })
}
