//! Configuration management

use crate::error::{CodeQaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directories skipped when walking a repository
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".cache",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "target",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub answer: AnswerConfig,
}

/// Index location, scanning and build limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding persisted indexes (defaults to the user cache dir)
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    /// Glob pattern for source files, relative to the repository root
    #[serde(default = "default_pattern")]
    pub pattern: String,

    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    #[serde(default = "default_true")]
    pub exclude_hidden: bool,

    /// Upper bound for one index build, in seconds
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
}

impl IndexConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: std::env::var("CODEQA_INDEX_DIR").ok().map(PathBuf::from),
            pattern: default_pattern(),
            exclude_dirs: default_exclude_dirs(),
            exclude_hidden: true,
            build_timeout_secs: default_build_timeout(),
        }
    }
}

/// Chunk extraction limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Source prefix length fed to the embedder
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,

    /// Lines kept in the degraded chunk of an unparseable file
    #[serde(default = "default_raw_fallback_lines")]
    pub raw_fallback_lines: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_embed_chars: default_max_embed_chars(),
            raw_fallback_lines: default_raw_fallback_lines(),
        }
    }
}

/// Which embedding implementation to load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local deterministic feature-hashing model
    Hashing,
    /// OpenAI-compatible embeddings endpoint
    Http,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,

    /// Base URL of the embeddings service (http backend only)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Upper bound for a single embedding call, in seconds
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let url = std::env::var("CODEQA_EMBEDDING_URL").ok();
        Self {
            backend: if url.is_some() {
                EmbeddingBackend::Http
            } else {
                default_backend()
            },
            url,
            model: default_embedding_model(),
            dimensions: std::env::var("CODEQA_EMBEDDING_DIMS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_dimensions),
            api_key: std::env::var("CODEQA_EMBEDDING_API_KEY").ok(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

/// Retrieval sizing and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Result size for implementation and method-usage questions
    #[serde(default = "default_precise_k")]
    pub precise_k: usize,

    /// Result size for purpose and generic questions
    #[serde(default = "default_broad_k")]
    pub broad_k: usize,

    /// Similarity floor for chunks admitted without an exact name match
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Place exact entity matches ahead of every similarity match
    #[serde(default = "default_true")]
    pub exact_match_boost: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            precise_k: default_precise_k(),
            broad_k: default_broad_k(),
            min_score: default_min_score(),
            exact_match_boost: true,
        }
    }
}

/// Markdown rendering limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Excerpts longer than this are shown truncated with a full-text block
    #[serde(default = "default_excerpt_max_lines")]
    pub excerpt_max_lines: usize,

    /// Lines shown in a truncated excerpt preview
    #[serde(default = "default_preview_lines")]
    pub preview_lines: usize,

    /// Hits rendered in a generic answer
    #[serde(default = "default_generic_max_hits")]
    pub generic_max_hits: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            excerpt_max_lines: default_excerpt_max_lines(),
            preview_lines: default_preview_lines(),
            generic_max_hits: default_generic_max_hits(),
        }
    }
}

fn default_pattern() -> String {
    "**/*.py".to_string()
}

fn default_exclude_dirs() -> Vec<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect()
}

fn default_true() -> bool {
    true
}

fn default_build_timeout() -> u64 {
    600
}

fn default_max_embed_chars() -> usize {
    1500
}

fn default_raw_fallback_lines() -> usize {
    50
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Hashing
}

fn default_embedding_model() -> String {
    std::env::var("CODEQA_EMBEDDING_MODEL")
        .unwrap_or_else(|_| "sentence-transformers/all-MiniLM-L6-v2".to_string())
}

fn default_dimensions() -> usize {
    384
}

fn default_embed_timeout() -> u64 {
    30
}

fn default_precise_k() -> usize {
    3
}

fn default_broad_k() -> usize {
    8
}

fn default_min_score() -> f32 {
    0.2
}

fn default_excerpt_max_lines() -> usize {
    15
}

fn default_preview_lines() -> usize {
    10
}

fn default_generic_max_hits() -> usize {
    3
}

impl Config {
    /// Load config from default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load config from an explicit path, using defaults when it does not exist
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CONFIG_DIR_NAME)
            .join("config.yml")
    }

    /// Root directory for persisted indexes
    pub fn index_root(&self) -> PathBuf {
        self.index.index_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(crate::CACHE_DIR_NAME)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(CodeQaError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.backend == EmbeddingBackend::Http && self.embedding.url.is_none() {
            return Err(CodeQaError::Config(
                "embedding.url is required for the http backend".to_string(),
            ));
        }
        if self.retrieval.precise_k == 0 || self.retrieval.broad_k == 0 {
            return Err(CodeQaError::Config(
                "retrieval k values must be greater than zero".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(CodeQaError::Config(
                "retrieval.min_score must lie in [-1, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "retrieval:\n  precise_k: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.retrieval.precise_k, 5);
        assert_eq!(config.retrieval.broad_k, 8);
        assert_eq!(config.index.pattern, "**/*.py");
        assert_eq!(config.answer.excerpt_max_lines, 15);
    }

    #[test]
    fn test_http_backend_requires_url() {
        let mut config = Config::default();
        config.embedding.backend = EmbeddingBackend::Http;
        config.embedding.url = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(temp.path().join("absent.yml")).unwrap();
        assert_eq!(config.extractor.raw_fallback_lines, 50);
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "answer:\n  generic_max_hits: 5\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.answer.generic_max_hits, 5);
    }
}
