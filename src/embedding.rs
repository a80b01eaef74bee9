//! Embedding capability and provider implementations.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`HashEmbedder`]**: offline, deterministic feature hashing of words.
//! - **`LocalEmbedder`**: runs a model in-process via fastembed
//!   (`local-embeddings` feature).
//!
//! Also provides [`cosine_similarity`], the similarity measure used by the
//! retriever.
//!
//! # Provider Selection
//!
//! [`create_embedder`] picks the implementation once, from configuration.
//! Callers hold a `Box<dyn Embedder>` and never branch on provider names.
//!
//! ```rust
//! # use rag_harness::config::EmbeddingConfig;
//! # use rag_harness::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     model: None,
//!     dims: 256,
//!     batch_size: 64,
//!     concurrency: 4,
//!     max_retries: 0,
//!     timeout_secs: 30,
//!     url: None,
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 256);
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::http;

/// Turns text into fixed-width vectors.
///
/// `embed_batch` must return one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the configured vector width.
    fn dims(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text, e.g. a search query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))
    }
}

// ============ OpenAI ============

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Embedder backed by `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("embedding.model required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self {
            client: http::client(config.timeout_secs).map_err(RagError::Embedding)?,
            api_key,
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(RagError::Embedding)?;

        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            RagError::Embedding("invalid OpenAI response: missing data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item.get("embedding").ok_or_else(|| {
            RagError::Embedding("invalid OpenAI response: missing embedding".to_string())
        })?;
        indexed.push((index, json_to_vec(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("embedding.model required for Ollama provider".to_string())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http::client(config.timeout_secs).map_err(RagError::Embedding)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(RagError::Embedding)?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::Embedding(
                    "invalid Ollama response: missing embeddings array".to_string(),
                )
            })?;
        embeddings.iter().map(json_to_vec).collect()
    }
}

fn json_to_vec(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| RagError::Embedding("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::Embedding("embedding value is not a number".to_string()))
        })
        .collect()
}

// ============ Hash ============

/// Offline embedder: hashes each lower-cased word into one of `dims`
/// buckets, counts occurrences, and L2-normalises.
///
/// Texts sharing words get positive similarity; texts with no words map to
/// the zero vector. Bucket selection uses SHA-256, so vectors are stable
/// across platforms and toolchain versions.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return vector;
        }

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::config::EmbeddingConfig;
    use crate::error::{RagError, Result};

    use super::Embedder;

    /// In-process embedder; the model is downloaded on first use.
    pub struct LocalEmbedder {
        model: Arc<Mutex<fastembed::TextEmbedding>>,
        model_name: String,
        dims: usize,
        batch_size: usize,
    }

    fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
            other => Err(RagError::InvalidConfig(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 bge-large-en-v1.5, nomic-embed-text-v1.5",
                other
            ))),
        }
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model(&model_name)?)
                    .with_show_download_progress(true),
            )
            .map_err(|e| {
                RagError::Embedding(format!("failed to initialize local model: {}", e))
            })?;

            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dims: config.dims,
                batch_size: config.batch_size,
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| RagError::Embedding("local model lock poisoned".to_string()))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| RagError::Embedding(format!("local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| RagError::Embedding(format!("local embedding task failed: {}", e)))?
        }
    }
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the `local-embeddings` feature) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(RagError::InvalidConfig(
            "Local embedding provider requires --features local-embeddings".to_string(),
        )),
        other => Err(RagError::InvalidConfig(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` when either vector has zero norm, or for empty vectors or
/// vectors of different lengths, so the result is never NaN.
///
/// # Formula
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
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
    if denom < f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
