//! Configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! and `APP_*` env vars (`APP_RETRIEVAL__TOP_K=8`). Paths accept `~` and `${VAR}`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an already assembled figment, e.g. one built in a test.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment) }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("Failed to get '{}': {}", key, e)))
    }

    /// Typed view over every section, validated.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::config(format!("Failed to read settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub synthesis: SynthesisSettings,
    pub retry: RetrySettings,
    pub source: SourceSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()?;
        if self.index.keep_generations == 0 {
            return Err(Error::config("index.keep_generations must be at least 1"));
        }
        Ok(())
    }
}

/// Window sizes in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_size: 1000, overlap: 200 }
    }
}

impl ChunkingSettings {
    pub fn new(max_size: usize, overlap: usize) -> Self { Self { max_size, overlap } }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("chunking.max_size must be positive"));
        }
        if self.overlap >= self.max_size {
            return Err(Error::config(format!(
                "chunking.overlap ({}) must be smaller than chunking.max_size ({})",
                self.overlap, self.max_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Sentence-transformer weights loaded from `model_dir`.
    Local,
    /// Token hashing; deterministic, no model files.
    Hashed,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "hashed" | "fake" => Ok(Self::Hashed),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::config(format!(
                "unknown embedding backend '{other}'. Expected 'local', 'hashed', or 'openai'."
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub model_dir: Option<String>,
    pub dimension: usize,
    pub max_len: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Local,
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            dimension: 384,
            max_len: 256,
            batch_size: 32,
            concurrency: 4,
            timeout_secs: 30,
            api_base: None,
            api_key: None,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::config("embedding.dimension must be positive"));
        }
        if self.batch_size == 0 || self.concurrency == 0 {
            return Err(Error::config("embedding.batch_size and embedding.concurrency must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub dir: String,
    pub keep_generations: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { dir: "~/.newsrag/index".to_string(), keep_generations: 2 }
    }
}

impl IndexSettings {
    pub fn resolved_dir(&self) -> PathBuf { expand_path(&self.dir) }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 4, min_score: 0.2 }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::config("retrieval.top_k must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(Error::config("retrieval.min_score must lie within [-1, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub model: String,
    pub temperature: f32,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Ask the provider for schema-constrained JSON output.
    pub json_schema: bool,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            api_base: None,
            api_key: None,
            timeout_secs: 60,
            json_schema: true,
        }
    }
}

impl SynthesisSettings {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_ms: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub max_links: usize,
    pub max_results: usize,
    pub exclude_hosts: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self { max_links: 2, max_results: 5, exclude_hosts: vec!["duckduckgo".to_string()], timeout_secs: 20 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
