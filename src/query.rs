//! Question answering over a profile's index.
//!
//! Retrieve → assemble context → generate. A generation failure does not
//! discard the retrieval: the outcome still carries the ranked chunks and
//! context so callers can show sources.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::{Config, LlmConfig, ProfileConfig};
use crate::context::build_context;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::index::{self, Index};
use crate::llm::{create_generator, AnswerGenerator, DisabledGenerator};
use crate::models::ScoredChunk;
use crate::retrieve::retrieve_top_k;

/// Words that end an interactive session.
const EXIT_WORDS: &[&str] = &["exit", "quit"];

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Overrides the profile's `top_k`.
    pub top_k: Option<usize>,
    /// Skip the generator and return retrieval results only.
    pub context_only: bool,
}

#[derive(Debug)]
pub struct QueryOutcome {
    pub used_top_k: usize,
    pub chunks: Vec<ScoredChunk>,
    pub context: String,
    /// `None` when generation was skipped.
    pub answer: Option<Result<String>>,
}

/// Answer `question` from `index` using the profile's prompts.
///
/// Retrieval errors are returned directly. Generator errors are reported in
/// [`QueryOutcome::answer`].
pub async fn answer_question(
    profile: &ProfileConfig,
    llm: &LlmConfig,
    index: &Index,
    question: &str,
    embedder: &dyn Embedder,
    generator: &dyn AnswerGenerator,
    options: &QueryOptions,
) -> Result<QueryOutcome> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::InvalidConfig("question must not be empty".to_string()));
    }
    let k = options.top_k.unwrap_or(profile.top_k);

    let chunks = retrieve_top_k(index, question, k, embedder).await?;
    let context = build_context(&chunks);
    info!(
        profile = %profile.name,
        k,
        retrieved = chunks.len(),
        "retrieved context"
    );

    let answer = if options.context_only {
        None
    } else {
        let result = generator
            .answer(
                &profile.system_prompt,
                &context,
                question,
                llm.temperature,
                llm.max_tokens,
            )
            .await;
        if let Err(e) = &result {
            warn!(model = generator.model_name(), error = %e, "answer generation failed");
        }
        Some(result)
    };

    Ok(QueryOutcome {
        used_top_k: k,
        chunks,
        context,
        answer,
    })
}

/// The configured generator, or [`DisabledGenerator`] when generation is
/// skipped so that `--context-only` never needs LLM credentials.
pub fn generator_for(
    config: &Config,
    profile: &ProfileConfig,
    context_only: bool,
) -> Result<Box<dyn AnswerGenerator>> {
    if context_only {
        Ok(Box::new(DisabledGenerator))
    } else {
        create_generator(&config.llm, &profile.user_prompt)
    }
}

/// `rag query`: answer a question and print the result to stdout.
///
/// When generation fails the retrieved sources are still printed and the
/// error is returned, so the process exits non-zero.
pub async fn run_query(
    config: &Config,
    profile: &ProfileConfig,
    question: &str,
    options: &QueryOptions,
    show_chunks: bool,
) -> anyhow::Result<()> {
    let index = index::load(&profile.index_dir, config.embedding.dims)?;
    let embedder = create_embedder(&config.embedding)?;
    let generator = generator_for(config, profile, options.context_only)?;

    let outcome = answer_question(
        profile,
        &config.llm,
        &index,
        question,
        embedder.as_ref(),
        generator.as_ref(),
        options,
    )
    .await?;

    let mut out = std::io::stdout().lock();
    match outcome.answer {
        None => {
            writeln!(out, "{}", outcome.context)?;
        }
        Some(Ok(answer)) => {
            writeln!(out, "=== Answer ===")?;
            writeln!(out, "{}", answer)?;
            if show_chunks {
                writeln!(out)?;
                write_sources(&mut out, &outcome.chunks)?;
            }
        }
        Some(Err(e)) => {
            write_sources(&mut out, &outcome.chunks)?;
            return Err(e.into());
        }
    }

    Ok(())
}

/// Everything one interactive session needs, loaded once.
pub struct Session<'a> {
    pub profile: &'a ProfileConfig,
    pub llm: &'a LlmConfig,
    pub index: &'a Index,
    pub embedder: &'a dyn Embedder,
    pub generator: &'a dyn AnswerGenerator,
    pub options: QueryOptions,
}

/// `rag query` without a question: load the index once, then answer one
/// question per line from stdin until `exit`, `quit`, or end of input.
pub async fn run_interactive(
    config: &Config,
    profile: &ProfileConfig,
    options: &QueryOptions,
) -> anyhow::Result<()> {
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
    let mut out = std::io::stdout();
    writeln!(
        out,
        "RAG assistant ready for profile '{}' ({} chunks). Type 'exit' or 'quit' to stop.",
        profile.name,
        index.len()
    )?;
    let asked = interactive_loop(&session, BufReader::new(tokio::io::stdin()), &mut out).await?;
    info!(profile = %profile.name, asked, "interactive session ended");
    Ok(())
}

/// Read questions line by line and write each turn's output to `out`.
///
/// Blank lines are ignored. A failed turn is reported on stderr and the
/// session continues. Returns the number of questions asked.
pub async fn interactive_loop<R, W>(
    session: &Session<'_>,
    input: R,
    out: &mut W,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut asked = 0;
    loop {
        write!(out, "question> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let question = line.trim();
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            break;
        }
        if question.is_empty() {
            continue;
        }
        asked += 1;

        let outcome = match answer_question(
            session.profile,
            session.llm,
            session.index,
            question,
            session.embedder,
            session.generator,
            &session.options,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };

        match outcome.answer {
            None => writeln!(out, "{}", outcome.context)?,
            Some(Ok(answer)) => {
                writeln!(out, "=== Answer ===")?;
                writeln!(out, "{}", answer)?;
                writeln!(out)?;
                write_sources(out, &outcome.chunks)?;
            }
            Some(Err(e)) => {
                write_sources(out, &outcome.chunks)?;
                eprintln!("error: {}", e);
            }
        }
        writeln!(out)?;
    }
    writeln!(out, "Goodbye.")?;
    Ok(asked)
}

fn write_sources(out: &mut impl Write, chunks: &[ScoredChunk]) -> std::io::Result<()> {
    writeln!(out, "=== Sources ===")?;
    for (rank, c) in chunks.iter().enumerate() {
        writeln!(
            out,
            "{}. [{:.3}] {} (chunk {})",
            rank + 1,
            c.score,
            c.chunk.source_path,
            c.chunk.chunk_index
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::llm::DisabledGenerator;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records what it was asked and echoes the context length.
    struct EchoGenerator {
        seen: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn answer(
            &self,
            system_prompt: &str,
            context: &str,
            question: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            self.seen.lock().unwrap().push((
                system_prompt.to_string(),
                context.to_string(),
                question.to_string(),
            ));
            Ok(format!("{} chars of context", context.len()))
        }
    }

    fn profile() -> ProfileConfig {
        ProfileConfig {
            name: "test".to_string(),
            docs_dir: PathBuf::from("docs"),
            index_dir: PathBuf::from("index"),
            chunk_size: 100,
            chunk_overlap: 0,
            top_k: 1,
            include_globs: vec![],
            exclude_globs: vec![],
            system_prompt: "Use only the context.".to_string(),
            user_prompt: "{query}\n{context}".to_string(),
        }
    }

    async fn index(embedder: &HashEmbedder) -> Index {
        let texts = ["invoices are due in thirty days", "the office closes at noon"];
        let records: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                text: t.to_string(),
                source_path: format!("doc{}.txt", i),
                chunk_index: 0,
                char_start: 0,
                char_end: t.len(),
            })
            .collect();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let rows = embedder.embed_batch(&owned).await.unwrap();
        Index::from_rows(embedder.dims(), records, rows).unwrap()
    }

    #[tokio::test]
    async fn passes_context_and_prompts_to_generator() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let generator = EchoGenerator {
            seen: Mutex::new(Vec::new()),
        };

        let outcome = answer_question(
            &profile(),
            &LlmConfig::default(),
            &idx,
            "  when are invoices due?  ",
            &embedder,
            &generator,
            &QueryOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.used_top_k, 1);
        assert_eq!(outcome.chunks[0].chunk.source_path, "doc0.txt");
        assert!(outcome.context.starts_with("Source: doc0.txt (chunk 0, sim="));
        assert!(outcome.answer.unwrap().is_ok());

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "Use only the context.");
        assert_eq!(seen[0].1, outcome.context);
        assert_eq!(seen[0].2, "when are invoices due?");
    }

    #[tokio::test]
    async fn generation_failure_keeps_retrieval() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let options = QueryOptions {
            top_k: Some(5),
            context_only: false,
        };

        let outcome = answer_question(
            &profile(),
            &LlmConfig::default(),
            &idx,
            "office hours",
            &embedder,
            &DisabledGenerator,
            &options,
        )
        .await
        .unwrap();

        assert_eq!(outcome.used_top_k, 5);
        assert_eq!(outcome.chunks.len(), 2);
        assert!(matches!(outcome.answer, Some(Err(RagError::Llm(_)))));
    }

    #[tokio::test]
    async fn context_only_skips_generator() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let options = QueryOptions {
            top_k: None,
            context_only: true,
        };

        let outcome = answer_question(
            &profile(),
            &LlmConfig::default(),
            &idx,
            "office",
            &embedder,
            &DisabledGenerator,
            &options,
        )
        .await
        .unwrap();
        assert!(outcome.answer.is_none());
        assert!(!outcome.context.is_empty());
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let embedder = HashEmbedder::new(16);
        let idx = index(&embedder).await;
        let err = answer_question(
            &profile(),
            &LlmConfig::default(),
            &idx,
            "   ",
            &embedder,
            &DisabledGenerator,
            &QueryOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
    }

    #[test]
    fn context_only_does_not_need_llm_credentials() {
        let config = crate::config::parse_config(
            r#"active_profile = "test"

[embedding]
provider = "hash"
dims = 64

[llm]
provider = "openai"
model = "gpt-4.1-mini"

[profiles.test]
docs_dir = "docs"
index_dir = "index"
"#,
            std::path::Path::new("."),
        )
        .unwrap();
        let profile = config.resolve_profile(None).unwrap();

        let generator = generator_for(&config, &profile, true).unwrap();
        assert_eq!(generator.model_name(), DisabledGenerator.model_name());
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(generator_for(&config, &profile, false).is_err());
        }
    }

    fn session<'a>(
        profile: &'a ProfileConfig,
        llm: &'a LlmConfig,
        index: &'a Index,
        embedder: &'a HashEmbedder,
        generator: &'a dyn AnswerGenerator,
        context_only: bool,
    ) -> Session<'a> {
        Session {
            profile,
            llm,
            index,
            embedder,
            generator,
            options: QueryOptions {
                top_k: None,
                context_only,
            },
        }
    }

    #[tokio::test]
    async fn interactive_loop_answers_until_quit() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let generator = EchoGenerator {
            seen: Mutex::new(Vec::new()),
        };
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = session(&profile, &llm, &idx, &embedder, &generator, false);

        let input: &[u8] = b"when are invoices due?\n\n   \nwhen does the office close?\nQUIT\nnever asked\n";
        let mut out = Vec::new();
        let asked = interactive_loop(&session, input, &mut out).await.unwrap();

        assert_eq!(asked, 2);
        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].2, "when does the office close?");

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("=== Answer ===").count(), 2);
        assert_eq!(out.matches("=== Sources ===").count(), 2);
        assert!(out.contains("1. ["));
        assert!(out.trim_end().ends_with("Goodbye."));
    }

    #[tokio::test]
    async fn interactive_loop_survives_failed_turns_and_ends_at_eof() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = session(&profile, &llm, &idx, &embedder, &DisabledGenerator, false);

        let input: &[u8] = b"office hours\ninvoices";
        let mut out = Vec::new();
        let asked = interactive_loop(&session, input, &mut out).await.unwrap();

        assert_eq!(asked, 2);
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("=== Sources ===").count(), 2);
        assert!(!out.contains("=== Answer ==="));
        assert!(out.trim_end().ends_with("Goodbye."));
    }

    #[tokio::test]
    async fn interactive_context_only_prints_context() {
        let embedder = HashEmbedder::new(128);
        let idx = index(&embedder).await;
        let (profile, llm) = (profile(), LlmConfig::default());
        let session = session(&profile, &llm, &idx, &embedder, &DisabledGenerator, true);

        let input: &[u8] = b"invoices due\nexit\n";
        let mut out = Vec::new();
        interactive_loop(&session, input, &mut out).await.unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Source: doc0.txt (chunk 0, sim="));
        assert!(!out.contains("=== Sources ==="));
    }
}
