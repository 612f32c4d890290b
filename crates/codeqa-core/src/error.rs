//! Error types for codeqa

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using CodeQaError
pub type Result<T> = std::result::Result<T, CodeQaError>;

/// Error type alias for convenience
pub type Error = CodeQaError;

/// Pipeline phase in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Extract,
    Embed,
    Persist,
    Load,
    Query,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Extract => "extract",
            Self::Embed => "embed",
            Self::Persist => "persist",
            Self::Load => "load",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable classification of errors for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    IndexMissing,
    IndexStale,
    BuildInProgress,
    EntityNotFound,
    EmptyRetrieval,
    ModelUnavailable,
    Timeout,
    Storage,
    InvalidInput,
    Internal,
}

/// Main error type for codeqa
#[derive(Debug, Error)]
pub enum CodeQaError {
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("No index exists for {0}")]
    IndexMissing(PathBuf),

    #[error("Index for {0} is stale")]
    IndexStale(PathBuf),

    #[error("An index build is already in progress for {0}")]
    BuildInProgress(PathBuf),

    #[error("No indexed symbol matches the question")]
    EntityNotFound,

    #[error("No relevant code found")]
    EmptyRetrieval,

    #[error("Embedding model unavailable during {phase}: {message}")]
    EmbeddingModelUnavailable { phase: Phase, message: String },

    #[error("Timed out during {phase} for {path}")]
    Timeout { phase: Phase, path: PathBuf },

    #[error("Storage error for {path}: {message}")]
    Storage { path: PathBuf, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CodeQaError {
    pub fn model_unavailable(phase: Phase, message: impl Into<String>) -> Self {
        Self::EmbeddingModelUnavailable {
            phase,
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::IndexMissing(_) => ErrorKind::IndexMissing,
            Self::IndexStale(_) => ErrorKind::IndexStale,
            Self::BuildInProgress(_) => ErrorKind::BuildInProgress,
            Self::EntityNotFound => ErrorKind::EntityNotFound,
            Self::EmptyRetrieval => ErrorKind::EmptyRetrieval,
            Self::EmbeddingModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Storage { .. } | Self::Database(_) | Self::Io(_) | Self::WalkDir(_) => {
                ErrorKind::Storage
            }
            Self::GlobPattern(_) | Self::Config(_) | Self::InvalidInput(_) | Self::Yaml(_) => {
                ErrorKind::InvalidInput
            }
            Self::Serialization(_) | Self::Http(_) | Self::Regex(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Conditions that are handled locally and degrade gracefully
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Parse
                | ErrorKind::EntityNotFound
                | ErrorKind::EmptyRetrieval
                | ErrorKind::IndexMissing
                | ErrorKind::IndexStale
        )
    }

    /// Short message suitable for end users
    pub fn user_message(&self) -> String {
        match self {
            Self::BuildInProgress(path) => format!(
                "The index for {} is being rebuilt. Try again shortly.",
                path.display()
            ),
            Self::EmbeddingModelUnavailable { phase, .. } => {
                format!("The embedding model is unavailable ({phase}). Try again later.")
            }
            Self::Timeout { phase, .. } => format!("The request timed out during {phase}."),
            Self::InvalidInput(msg) | Self::Config(msg) => msg.clone(),
            Self::EmptyRetrieval | Self::EntityNotFound => {
                "No relevant code was found for this question.".to_string()
            }
            other => match other.kind() {
                ErrorKind::Storage => {
                    "The repository index could not be read or written.".to_string()
                }
                _ => "The question could not be answered.".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CodeQaError::BuildInProgress(PathBuf::from("/repo")).kind(),
            ErrorKind::BuildInProgress
        );
        assert_eq!(
            CodeQaError::model_unavailable(Phase::Embed, "down").kind(),
            ErrorKind::ModelUnavailable
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(CodeQaError::EntityNotFound.is_recoverable());
        assert!(!CodeQaError::model_unavailable(Phase::Query, "x").is_recoverable());
    }

    #[test]
    fn test_user_message_has_no_internals() {
        let err = CodeQaError::storage("/repo", "disk I/O error at sqlite3.c:1234");
        let msg = err.user_message();
        assert!(!msg.contains("sqlite3.c"));
    }
}
