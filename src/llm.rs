//! Answer generation providers.
//!
//! An [`AnswerGenerator`] turns a system prompt, assembled context, and
//! question into answer text. The user message is rendered from the
//! profile's template (see [`render_user_prompt`]), so every provider sends
//! the same two-message chat:
//!
//! ```text
//! system: <profile system_prompt>
//! user:   <profile user_prompt with {query} and {context} filled in>
//! ```
//!
//! [`create_generator`] selects the provider once from `[llm]` config.

use async_trait::async_trait;
use tracing::debug;

use crate::config::LlmConfig;
use crate::context::render_user_prompt;
use crate::error::{RagError, Result};
use crate::http;

/// Produces an answer from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn answer(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat completions via `POST /v1/chat/completions`. Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    user_prompt: String,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig, user_prompt: &str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("llm.model required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self {
            client: http::client(config.timeout_secs).map_err(RagError::Llm)?,
            api_key,
            model,
            user_prompt: user_prompt.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_prompt, &self.user_prompt, context, question),
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let json = http::post_json(
            &self.client,
            OPENAI_CHAT_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(RagError::Llm)?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                RagError::Llm("invalid OpenAI response: missing choices[0].message.content".to_string())
            })?;
        debug!(model = %self.model, chars = content.len(), "received answer");
        Ok(content.trim().to_string())
    }
}

/// Chat via a local Ollama instance (`POST {url}/api/chat`, non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    user_prompt: String,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig, user_prompt: &str) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::InvalidConfig("llm.model required for Ollama provider".to_string())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http::client(config.timeout_secs).map_err(RagError::Llm)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            user_prompt: user_prompt.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn answer(
        &self,
        system_prompt: &str,
        context: &str,
        question: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_prompt, &self.user_prompt, context, question),
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(RagError::Llm)?;

        let content = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                RagError::Llm("invalid Ollama response: missing message.content".to_string())
            })?;
        Ok(content.trim().to_string())
    }
}

/// Used when `[llm] provider = "disabled"`: every call fails, so callers
/// fall back to showing the retrieved context.
pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn answer(
        &self,
        _system_prompt: &str,
        _context: &str,
        _question: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        Err(RagError::Llm(
            "answer generation is disabled ([llm] provider = \"disabled\")".to_string(),
        ))
    }
}

fn chat_messages(
    system_prompt: &str,
    user_template: &str,
    context: &str,
    question: &str,
) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": system_prompt },
        { "role": "user", "content": render_user_prompt(user_template, question, context) },
    ])
}

/// Create the generator named by `config.provider`.
///
/// `user_prompt` is the active profile's template; it must contain the
/// `{query}` and `{context}` placeholders.
pub fn create_generator(config: &LlmConfig, user_prompt: &str) -> Result<Box<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::new(config, user_prompt)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config, user_prompt)?)),
        "disabled" => Ok(Box::new(DisabledGenerator)),
        other => Err(RagError::InvalidConfig(format!(
            "Unknown llm provider: {}",
            other
        ))),
    }
}
