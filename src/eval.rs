//! Keyword evaluation of a profile's answers.
//!
//! A dataset is a JSON file of questions, each with the keywords a good
//! answer must mention. Every case runs the normal query path; a case passes
//! when all of its keywords appear (case-insensitively) in the answer, or in
//! the retrieved context when generation is skipped.
//!
//! ```json
//! {
//!   "description": "RFP smoke questions",
//!   "cases": [
//!     { "id": "deadline", "question": "When is the submission deadline?",
//!       "expected_keywords": ["march", "2025"] }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, ProfileConfig};
use crate::embedding::create_embedder;
use crate::index;
use crate::query::{answer_question, generator_for, QueryOptions, Session};

/// Dataset file looked up next to the profile's index when none is given.
pub const DEFAULT_DATASET_FILE: &str = "eval.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalDataset {
    #[serde(default)]
    pub description: String,
    pub cases: Vec<EvalCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCase {
    /// Key used in reports; defaults to the case's position.
    #[serde(default)]
    pub id: String,
    pub question: String,
    /// Every keyword must appear for the case to pass.
    #[serde(default)]
    pub expected_keywords: Vec<String>,
}

impl EvalDataset {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read eval dataset from {}", path.display()))?;
        let mut dataset: EvalDataset = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse eval dataset from {}", path.display()))?;
        for (i, case) in dataset.cases.iter_mut().enumerate() {
            if case.id.is_empty() {
                case.id = format!("case-{}", i + 1);
            }
        }
        Ok(dataset)
    }

    /// Structural problems worth reporting. None of them stop a run.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.cases.is_empty() {
            warnings.push("dataset has zero cases".to_string());
            return warnings;
        }

        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert(case.id.as_str()) {
                warnings.push(format!("duplicate case id: {}", case.id));
            }
            if case.question.trim().is_empty() {
                warnings.push(format!("case {}: question is empty", case.id));
            }
            if normalized_keywords(&case.expected_keywords).is_empty() {
                warnings.push(format!(
                    "case {}: no expected_keywords, it always passes",
                    case.id
                ));
            }
        }
        warnings
    }
}

/// What keyword hits were matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoredAgainst {
    Answer,
    Context,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub question: String,
    pub expected_keywords: Vec<String>,
    pub hits: Vec<String>,
    pub passed: bool,
    pub latency_secs: f64,
    /// `source#chunk` for each retrieved chunk, best first.
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub profile: String,
    pub scored_against: ScoredAgainst,
    pub total: usize,
    pub passed: usize,
    pub pass_rate: f64,
    pub mean_latency_secs: f64,
    pub cases: Vec<CaseResult>,
}

/// Lower-cased, trimmed, non-empty keywords.
fn normalized_keywords(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// The expected keywords that occur in `text`, ignoring case.
pub fn keyword_hits(expected: &[String], text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    normalized_keywords(expected)
        .into_iter()
        .filter(|k| haystack.contains(k.as_str()))
        .collect()
}

/// Run every case through the session's query path.
///
/// A case that fails to retrieve or generate is recorded as failed with its
/// error; the run continues with the next case.
pub async fn evaluate(session: &Session<'_>, dataset: &EvalDataset) -> EvalReport {
    let scored_against = if session.options.context_only {
        ScoredAgainst::Context
    } else {
        ScoredAgainst::Answer
    };

    let mut cases = Vec::with_capacity(dataset.cases.len());
    for case in &dataset.cases {
        let expected = normalized_keywords(&case.expected_keywords);
        let started = Instant::now();
        let outcome = answer_question(
            session.profile,
            session.llm,
            session.index,
            &case.question,
            session.embedder,
            session.generator,
            &session.options,
        )
        .await;
        let latency = started.elapsed();

        let mut result = CaseResult {
            id: case.id.clone(),
            question: case.question.clone(),
            expected_keywords: expected.clone(),
            hits: Vec::new(),
            passed: false,
            latency_secs: latency.as_secs_f64(),
            sources: Vec::new(),
            answer: None,
            error: None,
        };

        match outcome {
            Ok(outcome) => {
                result.sources = outcome
                    .chunks
                    .iter()
                    .map(|c| format!("{}#{}", c.chunk.source_path, c.chunk.chunk_index))
                    .collect();
                match outcome.answer {
                    None => {
                        result.hits = keyword_hits(&expected, &outcome.context);
                        result.passed = result.hits.len() == expected.len();
                    }
                    Some(Ok(answer)) => {
                        result.hits = keyword_hits(&expected, &answer);
                        result.passed = result.hits.len() == expected.len();
                        result.answer = Some(answer);
                    }
                    Some(Err(e)) => result.error = Some(e.to_string()),
                }
            }
            Err(e) => result.error = Some(e.to_string()),
        }

        info!(
            case = %result.id,
            passed = result.passed,
            latency_ms = latency.as_millis() as u64,
            "eval case"
        );
        cases.push(result);
    }

    let total = cases.len();
    let passed = cases.iter().filter(|c| c.passed).count();
    let (pass_rate, mean_latency_secs) = if total == 0 {
        (0.0, 0.0)
    } else {
        let latency: f64 = cases.iter().map(|c| c.latency_secs).sum();
        (passed as f64 / total as f64, latency / total as f64)
    };

    EvalReport {
        profile: session.profile.name.clone(),
        scored_against,
        total,
        passed,
        pass_rate,
        mean_latency_secs,
        cases,
    }
}

/// `<index_dir>/../eval.json`, i.e. beside the profile's index.
pub fn default_dataset_path(profile: &ProfileConfig) -> PathBuf {
    profile
        .index_dir
        .parent()
        .unwrap_or(&profile.index_dir)
        .join(DEFAULT_DATASET_FILE)
}

/// `rag eval`: score the profile against a dataset and print a summary.
///
/// With `output` the full report is also written there as JSON.
pub async fn run_eval(
    config: &Config,
    profile: &ProfileConfig,
    dataset_path: Option<&Path>,
    output: Option<&Path>,
    options: &QueryOptions,
) -> anyhow::Result<()> {
    let dataset_path = dataset_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_dataset_path(profile));
    println!("profile: {}", profile.name);
    println!("dataset: {}", dataset_path.display());

    let dataset = EvalDataset::load(&dataset_path)?;
    for warning in dataset.validate() {
        warn!(dataset = %dataset_path.display(), "{}", warning);
    }
    if dataset.cases.is_empty() {
        println!("no eval cases found");
        return Ok(());
    }

    let index = index::load(&profile.index_dir, config.embedding.dims)?;
    let embedder = create_embedder(&config.embedding)?;
    let generator = generator_for(config, profile, options.context_only)?;
    let session = Session {
        profile,
        llm: &config.llm,
        index: &index,
        embedder: embedder.as_ref(),
        generator: generator.as_ref(),
        options: *options,
    };

    let report = evaluate(&session, &dataset).await;

    let mut out = std::io::stdout().lock();
    for case in &report.cases {
        let status = if case.passed { "PASS" } else { "FAIL" };
        write!(
            out,
            "[{}] {}: {} | hits={:?} | latency={:.2}s",
            status, case.id, case.question, case.hits, case.latency_secs
        )?;
        if let Some(error) = &case.error {
            write!(out, " | error: {}", error)?;
        }
        writeln!(out)?;
    }
    writeln!(out, "{}", "-".repeat(60))?;
    writeln!(
        out,
        "overall: {}/{} passed ({:.0}%)",
        report.passed,
        report.total,
        report.pass_rate * 100.0
    )?;
    writeln!(out, "average latency: {:.2}s", report.mean_latency_secs)?;

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write eval results to {}", path.display()))?;
        writeln!(out, "results: {}", path.display())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::embedding::{Embedder, HashEmbedder};
    use crate::error::Result;
    use crate::index::Index;
    use crate::llm::{AnswerGenerator, DisabledGenerator};
    use crate::models::Chunk;
    use async_trait::async_trait;

    /// Answers with the context it was given.
    struct ContextEcho;

    #[async_trait]
    impl AnswerGenerator for ContextEcho {
        fn model_name(&self) -> &str {
            "context-echo"
        }

        async fn answer(
            &self,
            _system_prompt: &str,
            context: &str,
            _question: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Ok(context.to_uppercase())
        }
    }

    fn profile() -> ProfileConfig {
        ProfileConfig {
            name: "eval".to_string(),
            docs_dir: PathBuf::from("docs"),
            index_dir: PathBuf::from("data/eval/index"),
            chunk_size: 100,
            chunk_overlap: 0,
            top_k: 1,
            include_globs: vec![],
            exclude_globs: vec![],
            system_prompt: String::new(),
            user_prompt: "{query}\n{context}".to_string(),
        }
    }

    async fn index(embedder: &HashEmbedder) -> Index {
        let texts = [
            "the warranty lasts two years from delivery",
            "shipping takes five business days",
        ];
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                text: t.to_string(),
                source_path: format!("policy{}.md", i),
                chunk_index: 0,
                char_start: 0,
                char_end: t.len(),
            })
            .collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let rows = embedder.embed_batch(&owned).await.unwrap();
        Index::from_rows(embedder.dims(), records, rows).unwrap()
    }

    fn dataset() -> EvalDataset {
        serde_json::from_str(
            r#"{
                "cases": [
                    { "id": "warranty", "question": "how long is the warranty",
                      "expected_keywords": ["Two Years", " warranty "] },
                    { "id": "refunds", "question": "how long does shipping take",
                      "expected_keywords": ["five", "refund"] }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn keyword_hits_ignore_case_and_blanks() {
        let expected = vec!["Rust".to_string(), "  ".to_string(), "cargo".to_string()];
        assert_eq!(keyword_hits(&expected, "RUST and Cargo"), vec!["rust", "cargo"]);
        assert_eq!(keyword_hits(&expected, "python"), Vec::<String>::new());
    }

    #[test]
    fn validate_reports_structural_problems() {
        let dataset: EvalDataset = serde_json::from_str(
            r#"{ "cases": [
                { "id": "a", "question": "q", "expected_keywords": ["x"] },
                { "id": "a", "question": " ", "expected_keywords": [] }
            ] }"#,
        )
        .unwrap();
        let warnings = dataset.validate();
        assert!(warnings.iter().any(|w| w.contains("duplicate case id: a")));
        assert!(warnings.iter().any(|w| w.contains("question is empty")));
        assert!(warnings.iter().any(|w| w.contains("always passes")));

        let empty = EvalDataset {
            description: String::new(),
            cases: vec![],
        };
        assert_eq!(empty.validate(), vec!["dataset has zero cases"]);
    }

    #[test]
    fn load_fills_missing_ids() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("eval.json");
        std::fs::write(
            &path,
            r#"{ "cases": [ { "question": "q1" }, { "id": "named", "question": "q2" } ] }"#,
        )
        .unwrap();
        let dataset = EvalDataset::load(&path).unwrap();
        assert_eq!(dataset.cases[0].id, "case-1");
        assert_eq!(dataset.cases[1].id, "named");
        assert!(EvalDataset::load(&tmp.path().join("missing.json")).is_err());
    }

    #[test]
    fn default_dataset_sits_beside_the_index() {
        assert_eq!(
            default_dataset_path(&profile()),
            PathBuf::from("data/eval/eval.json")
        );
    }

    #[tokio::test]
    async fn scores_answers_against_keywords() {
        let embedder = HashEmbedder::new(256);
        let idx = index(&embedder).await;
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = Session {
            profile: &profile,
            llm: &llm,
            index: &idx,
            embedder: &embedder,
            generator: &ContextEcho,
            options: QueryOptions::default(),
        };

        let report = evaluate(&session, &dataset()).await;
        assert_eq!(report.scored_against, ScoredAgainst::Answer);
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.pass_rate, 0.5);

        let warranty = &report.cases[0];
        assert!(warranty.passed);
        assert_eq!(warranty.hits, vec!["two years", "warranty"]);
        assert_eq!(warranty.sources, vec!["policy0.md#0"]);
        assert!(warranty.answer.is_some());

        let refunds = &report.cases[1];
        assert!(!refunds.passed);
        assert_eq!(refunds.hits, vec!["five"]);
    }

    #[tokio::test]
    async fn context_only_scores_retrieved_context() {
        let embedder = HashEmbedder::new(256);
        let idx = index(&embedder).await;
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = Session {
            profile: &profile,
            llm: &llm,
            index: &idx,
            embedder: &embedder,
            generator: &DisabledGenerator,
            options: QueryOptions {
                top_k: Some(2),
                context_only: true,
            },
        };

        let report = evaluate(&session, &dataset()).await;
        assert_eq!(report.scored_against, ScoredAgainst::Context);
        assert!(report.cases[0].passed);
        assert_eq!(report.cases[0].sources.len(), 2);
        assert!(report.cases.iter().all(|c| c.answer.is_none() && c.error.is_none()));
    }

    #[tokio::test]
    async fn generation_errors_fail_the_case() {
        let embedder = HashEmbedder::new(256);
        let idx = index(&embedder).await;
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = Session {
            profile: &profile,
            llm: &llm,
            index: &idx,
            embedder: &embedder,
            generator: &DisabledGenerator,
            options: QueryOptions::default(),
        };

        let report = evaluate(&session, &dataset()).await;
        assert_eq!(report.passed, 0);
        assert_eq!(report.pass_rate, 0.0);
        assert!(report.cases[0].error.as_deref().unwrap().contains("disabled"));
        assert_eq!(report.cases[0].sources.len(), 1);
    }
}
