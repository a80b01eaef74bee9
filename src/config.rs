//! TOML configuration with named profiles.
//!
//! The configuration is loaded once at process start by [`load_config`] and
//! the active profile resolved into a [`ProfileConfig`] by
//! [`Config::resolve_profile`]. Both values are passed by reference into the
//! ingestion and query paths; there is no process-wide configuration state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Placeholders the user prompt template must contain.
pub const QUERY_PLACEHOLDER: &str = "{query}";
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub active_profile: String,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub profiles: BTreeMap<String, ProfileSettings>,
    /// Directory relative profile paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One `[profiles.<name>]` table, as written in the file.
#[derive(Debug, Deserialize, Clone)]
pub struct ProfileSettings {
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_user_prompt")]
    pub user_prompt: String,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_top_k() -> usize {
    5
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}
fn default_system_prompt() -> String {
    "You are an assistant that answers questions about the user's documents. \
     Use ONLY the provided context to answer. If something is not in the context, \
     say you don't know."
        .to_string()
}
fn default_user_prompt() -> String {
    "Question:\n{query}\n\nContext:\n{context}\n\nUsing ONLY the context above, answer the question."
        .to_string()
}

/// The active profile with paths resolved and settings validated.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub name: String,
    pub docs_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for self-hosted providers (Ollama).
    #[serde(default)]
    pub url: Option<String>,
}

fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            url: None,
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7332".to_string()
}

impl Config {
    /// Resolve a profile by name, or the file's `active_profile` when `None`.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<ProfileConfig> {
        let name = name.unwrap_or(&self.active_profile);
        let settings = self.profiles.get(name).with_context(|| {
            format!(
                "Unknown profile: '{}'. Configured profiles: {}",
                name,
                self.profile_names().join(", ")
            )
        })?;

        Ok(ProfileConfig {
            name: name.to_string(),
            docs_dir: self.resolve_path(&settings.docs_dir),
            index_dir: self.resolve_path(&settings.index_dir),
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            top_k: settings.top_k,
            include_globs: settings.include_globs.clone(),
            exclude_globs: settings.exclude_globs.clone(),
            system_prompt: settings.system_prompt.clone(),
            user_prompt: settings.user_prompt.clone(),
        })
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

pub fn parse_config(content: &str, base_dir: &Path) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.base_dir = base_dir.to_path_buf();
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    parse_config(&content, base_dir)
}

fn validate(config: &Config) -> Result<()> {
    if config.profiles.is_empty() {
        bail!("at least one [profiles.<name>] table is required");
    }
    if !config.profiles.contains_key(&config.active_profile) {
        bail!(
            "active_profile '{}' has no [profiles.{}] table",
            config.active_profile,
            config.active_profile
        );
    }

    for (name, p) in &config.profiles {
        crate::chunk::validate_params(p.chunk_size, p.chunk_overlap)
            .with_context(|| format!("profiles.{}", name))?;
        if p.top_k == 0 {
            bail!("profiles.{}.top_k must be >= 1", name);
        }
        for placeholder in [QUERY_PLACEHOLDER, CONTEXT_PLACEHOLDER] {
            if !p.user_prompt.contains(placeholder) {
                bail!(
                    "profiles.{}.user_prompt must contain the {} placeholder",
                    name,
                    placeholder
                );
            }
        }
    }

    // Validate embedding
    let emb = &config.embedding;
    if emb.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if emb.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if emb.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }
    match emb.provider.as_str() {
        "openai" | "ollama" => {
            if emb.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    emb.provider
                );
            }
        }
        "hash" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, hash, or local.",
            other
        ),
    }

    // Validate llm
    let llm = &config.llm;
    match llm.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if llm.model.is_none() {
                bail!(
                    "llm.model must be specified when provider is '{}'",
                    llm.provider
                );
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if llm.max_tokens == 0 {
        bail!("llm.max_tokens must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
active_profile = "rfp"

[embedding]
provider = "hash"
dims = 64

[profiles.rfp]
docs_dir = "docs/rfp"
index_dir = "data/rfp/index"

[profiles.legal]
docs_dir = "/srv/legal/docs"
index_dir = "/srv/legal/index"
chunk_size = 400
chunk_overlap = 50
top_k = 8
"#;

    #[test]
    fn defaults_applied() {
        let cfg = parse_config(MINIMAL, Path::new("/project")).unwrap();
        let p = cfg.resolve_profile(None).unwrap();
        assert_eq!(p.name, "rfp");
        assert_eq!(p.chunk_size, 1000);
        assert_eq!(p.chunk_overlap, 200);
        assert_eq!(p.top_k, 5);
        assert_eq!(cfg.embedding.batch_size, 64);
        assert_eq!(cfg.llm.provider, "disabled");
        assert!((cfg.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.server.bind, "127.0.0.1:7332");
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let cfg = parse_config(MINIMAL, Path::new("/project")).unwrap();
        let p = cfg.resolve_profile(None).unwrap();
        assert_eq!(p.docs_dir, PathBuf::from("/project/docs/rfp"));
        assert_eq!(p.index_dir, PathBuf::from("/project/data/rfp/index"));

        let legal = cfg.resolve_profile(Some("legal")).unwrap();
        assert_eq!(legal.docs_dir, PathBuf::from("/srv/legal/docs"));
        assert_eq!(legal.top_k, 8);
    }

    #[test]
    fn unknown_profile_rejected() {
        let cfg = parse_config(MINIMAL, Path::new(".")).unwrap();
        let err = cfg.resolve_profile(Some("nope")).unwrap_err();
        assert!(err.to_string().contains("legal, rfp"));
    }

    #[test]
    fn missing_active_profile_rejected() {
        let content = MINIMAL.replace("active_profile = \"rfp\"", "active_profile = \"hr\"");
        assert!(parse_config(&content, Path::new(".")).is_err());
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let content = MINIMAL.replace("chunk_overlap = 50", "chunk_overlap = 400");
        let err = parse_config(&content, Path::new(".")).unwrap_err();
        assert!(format!("{:#}", err).contains("chunk_overlap"));
    }

    #[test]
    fn openai_requires_model() {
        let content = MINIMAL.replace("provider = \"hash\"", "provider = \"openai\"");
        assert!(parse_config(&content, Path::new(".")).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let content = MINIMAL.replace("provider = \"hash\"", "provider = \"cohere\"");
        assert!(parse_config(&content, Path::new(".")).is_err());
    }

    #[test]
    fn user_prompt_needs_placeholders() {
        let content = format!(
            "{}\nuser_prompt = \"Answer: {{query}}\"\n",
            MINIMAL.trim_end()
        );
        let err = parse_config(&content, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn example_config_is_valid() {
        let content = include_str!("../config/rag.example.toml");
        let config = parse_config(content, Path::new("/srv/rag/config")).unwrap();
        assert_eq!(config.profile_names(), vec!["legal", "rfp"]);
        let legal = config.resolve_profile(Some("legal")).unwrap();
        assert_eq!(legal.top_k, 6);
        assert_eq!(legal.index_dir, Path::new("/srv/rag/config/../data/legal/index"));
        assert!(config.llm.is_enabled());
    }
}
