//! Embedding models
//!
//! One [`Embedder`] instance embeds both chunk text and question text. The
//! configured backend is constructed lazily on first use and shared through
//! [`SharedEmbedder`]; every call is bounded by a caller-supplied timeout.

mod hashing;
mod http;

pub use hashing::{tokenize, HashingEmbedder, STOP_WORDS};
pub use http::HttpEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{CodeQaError, Phase, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Texts sent to the model per request during a build
pub const EMBED_BATCH_SIZE: usize = 32;

/// Embedding generation trait
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for batch of texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Construct the backend named by the configuration
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        EmbeddingBackend::Http => Ok(Arc::new(HttpEmbedder::new(config)?)),
    }
}

/// Process-wide embedder, constructed on first use
pub struct SharedEmbedder {
    config: EmbeddingConfig,
    cell: OnceCell<Arc<dyn Embedder>>,
}

impl SharedEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    /// Wrap an already constructed model
    pub fn from_embedder(config: EmbeddingConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            cell: OnceCell::new_with(Some(embedder)),
        }
    }

    /// Model instance, loading it if needed
    pub async fn get(&self) -> Result<Arc<dyn Embedder>> {
        let embedder = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!(
                    backend = ?self.config.backend,
                    model = %self.config.model,
                    "loading embedding model"
                );
                from_config(&self.config)
                    .map_err(|e| CodeQaError::model_unavailable(Phase::Load, e.to_string()))
            })
            .await?;
        Ok(Arc::clone(embedder))
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Embed one text under the configured timeout
    pub async fn embed(&self, text: &str, phase: Phase, repo: &Path) -> Result<Vec<f32>> {
        let embedder = self.get().await?;
        let vector = bounded(self.timeout(), phase, repo, embedder.embed(text)).await?;
        check_dimensions(std::slice::from_ref(&vector), embedder.dimensions(), phase)?;
        Ok(vector)
    }

    /// Embed many texts in batches, each batch under the configured timeout
    pub async fn embed_all(
        &self,
        texts: &[String],
        phase: Phase,
        repo: &Path,
    ) -> Result<Vec<Vec<f32>>> {
        let embedder = self.get().await?;
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let embedded = bounded(self.timeout(), phase, repo, embedder.embed_batch(batch)).await?;
            if embedded.len() != batch.len() {
                return Err(CodeQaError::model_unavailable(
                    phase,
                    format!("expected {} embeddings, got {}", batch.len(), embedded.len()),
                ));
            }
            check_dimensions(&embedded, embedder.dimensions(), phase)?;
            vectors.extend(embedded);
            tracing::debug!(done = vectors.len(), total = texts.len(), "embedded batch");
        }

        Ok(vectors)
    }
}

async fn bounded<T>(
    limit: Duration,
    phase: Phase,
    repo: &Path,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e @ CodeQaError::EmbeddingModelUnavailable { .. })) => Err(e),
        Ok(Err(e)) => Err(CodeQaError::model_unavailable(phase, e.to_string())),
        Err(_) => Err(CodeQaError::Timeout {
            phase,
            path: repo.to_path_buf(),
        }),
    }
}

fn check_dimensions(vectors: &[Vec<f32>], expected: usize, phase: Phase) -> Result<()> {
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(CodeQaError::model_unavailable(
            phase,
            format!("expected {expected}-dimensional vectors, got {}", bad.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(CodeQaError::InvalidInput("model crashed".to_string()))
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0; 3]])
        }

        fn dimensions(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_lazy_default_backend() {
        let shared = SharedEmbedder::new(EmbeddingConfig {
            backend: EmbeddingBackend::Hashing,
            url: None,
            ..Default::default()
        });
        let vector = shared
            .embed("UserService", Phase::Query, Path::new("/repo"))
            .await
            .unwrap();
        assert_eq!(vector.len(), 384);
    }

    #[tokio::test]
    async fn test_failures_become_model_unavailable() {
        let shared =
            SharedEmbedder::from_embedder(EmbeddingConfig::default(), Arc::new(BrokenEmbedder));
        let err = shared
            .embed("x", Phase::Query, Path::new("/repo"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodeQaError::EmbeddingModelUnavailable { phase: Phase::Query, .. }
        ));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let shared =
            SharedEmbedder::from_embedder(EmbeddingConfig::default(), Arc::new(BrokenEmbedder));
        let err = shared
            .embed_all(&["a".to_string()], Phase::Embed, Path::new("/repo"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodeQaError::EmbeddingModelUnavailable { phase: Phase::Embed, .. }
        ));
    }
}
