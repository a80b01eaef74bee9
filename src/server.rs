//! HTTP query service for one profile.
//!
//! The index is loaded once at start-up and shared read-only by every
//! request; rebuilding the index requires a restart.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, profile, and chunk count |
//! | `POST` | `/rag/query` | Answer a question from the profile's index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_error` (502), `llm_error`
//! (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::{Config, LlmConfig, ProfileConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::error::RagError;
use crate::index::{self, Index};
use crate::llm::{create_generator, AnswerGenerator};
use crate::query::{answer_question, QueryOptions};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    profile: Arc<ProfileConfig>,
    llm: Arc<LlmConfig>,
    index: Arc<Index>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn AnswerGenerator>,
}

impl AppState {
    pub fn new(
        profile: ProfileConfig,
        llm: LlmConfig,
        index: Index,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            llm: Arc::new(llm),
            index: Arc::new(index),
            embedder,
            generator,
        }
    }
}

/// Load the profile's index and serve it on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config, profile: &ProfileConfig) -> anyhow::Result<()> {
    let index = index::load(&profile.index_dir, config.embedding.dims)
        .with_context(|| format!("cannot serve profile '{}'", profile.name))?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
    let generator: Arc<dyn AnswerGenerator> =
        Arc::from(create_generator(&config.llm, &profile.user_prompt)?);

    info!(
        profile = %profile.name,
        chunks = index.len(),
        embedder = embedder.model_name(),
        llm = generator.model_name(),
        "index loaded"
    );
    if !config.llm.is_enabled() {
        warn!("answer generation is disabled; /rag/query will return llm_error");
    }

    let state = AppState::new(
        profile.clone(),
        config.llm.clone(),
        index,
        embedder,
        generator,
    );
    let app = router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("RAG server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Routes with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rag/query", post(handle_query))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        match err {
            RagError::InvalidConfig(_) => bad_request(message),
            RagError::Embedding(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "embedding_error",
                message,
            },
            RagError::Llm(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "llm_error",
                message,
            },
            _ => {
                error!(error = %message, "query failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message,
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    profile: String,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        profile: state.profile.name.clone(),
        chunks: state.index.len(),
    })
}

// ============ POST /rag/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    profile: String,
    used_top_k: usize,
    chunks: Vec<ChunkRef>,
}

#[derive(Serialize)]
struct ChunkRef {
    source: String,
    chunk_index: usize,
    similarity: f32,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be at least 1"));
    }

    let options = QueryOptions {
        top_k: req.top_k,
        context_only: false,
    };
    let outcome = answer_question(
        &state.profile,
        &state.llm,
        &state.index,
        &req.question,
        state.embedder.as_ref(),
        state.generator.as_ref(),
        &options,
    )
    .await?;

    let answer = match outcome.answer {
        Some(result) => result?,
        None => String::new(),
    };

    Ok(Json(QueryResponse {
        answer,
        profile: state.profile.name.clone(),
        used_top_k: outcome.used_top_k,
        chunks: outcome
            .chunks
            .iter()
            .map(|c| ChunkRef {
                source: c.chunk.source_path.clone(),
                chunk_index: c.chunk.chunk_index,
                similarity: c.score,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::Result;
    use crate::llm::DisabledGenerator;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedGenerator;

    #[async_trait]
    impl AnswerGenerator for FixedGenerator {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn answer(
            &self,
            _system_prompt: &str,
            _context: &str,
            question: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Ok(format!("answer to: {}", question))
        }
    }

    async fn state(generator: Arc<dyn AnswerGenerator>) -> AppState {
        let embedder = HashEmbedder::new(256);
        let texts = vec![
            "the warranty lasts two years".to_string(),
            "shipping takes five days".to_string(),
        ];
        let rows = embedder.embed_batch(&texts).await.unwrap();
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                text: t.clone(),
                source_path: format!("policy{}.md", i),
                chunk_index: 0,
                char_start: 0,
                char_end: t.len(),
            })
            .collect();
        let index = Index::from_rows(256, records, rows).unwrap();
        let profile = ProfileConfig {
            name: "support".to_string(),
            docs_dir: PathBuf::from("docs"),
            index_dir: PathBuf::from("index"),
            chunk_size: 100,
            chunk_overlap: 10,
            top_k: 1,
            include_globs: vec![],
            exclude_globs: vec![],
            system_prompt: String::new(),
            user_prompt: "{query}{context}".to_string(),
        };
        AppState::new(
            profile,
            LlmConfig::default(),
            index,
            Arc::new(embedder),
            generator,
        )
    }

    async fn spawn(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_reports_profile_and_chunks() {
        let base = spawn(state(Arc::new(FixedGenerator)).await).await;
        let body: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["profile"], "support");
        assert_eq!(body["chunks"], 2);
    }

    #[tokio::test]
    async fn query_returns_answer_and_sources() {
        let base = spawn(state(Arc::new(FixedGenerator)).await).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/rag/query", base))
            .json(&serde_json::json!({ "question": "how long is the warranty", "top_k": 5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["answer"], "answer to: how long is the warranty");
        assert_eq!(body["profile"], "support");
        assert_eq!(body["used_top_k"], 5);
        let chunks = body["chunks"].as_array().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0]["source"], "policy0.md");
    }

    #[tokio::test]
    async fn bad_requests_use_error_shape() {
        let base = spawn(state(Arc::new(FixedGenerator)).await).await;
        let client = reqwest::Client::new();

        for body in [
            serde_json::json!({ "question": "   " }),
            serde_json::json!({ "question": "warranty", "top_k": 0 }),
            serde_json::json!({ "top_k": 3 }),
        ] {
            let resp = client
                .post(format!("{}/rag/query", base))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400);
            let err: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(err["error"]["code"], "bad_request");
        }
    }

    #[tokio::test]
    async fn disabled_llm_is_bad_gateway() {
        let base = spawn(state(Arc::new(DisabledGenerator)).await).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/rag/query", base))
            .json(&serde_json::json!({ "question": "shipping" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
        let err: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(err["error"]["code"], "llm_error");
    }
}
