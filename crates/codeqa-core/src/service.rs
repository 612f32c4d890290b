//! Question answering facade
//!
//! [`CodeQa`] ties the pieces together: it keeps one index per repository
//! fresh, classifies each question, and answers it either from aggregated
//! statistics or from retrieved chunks.

use crate::answer::{Answer, Assembler, Evidence};
use crate::config::Config;
use crate::embed::{Embedder, SharedEmbedder};
use crate::error::{CodeQaError, Result};
use crate::index::{BuildReport, IndexRegistry};
use crate::retrieve::Retriever;
use crate::router::classify;
use crate::source::{FileSystemSource, SourceTree};
use crate::stats::RepositoryStats;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Answers questions about local repositories
pub struct CodeQa {
    config: Config,
    registry: IndexRegistry,
    embedder: Arc<SharedEmbedder>,
    retriever: Retriever,
    assembler: Assembler,
}

impl CodeQa {
    /// Service reading repositories from disk with the configured model
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let source: Arc<dyn SourceTree> = Arc::new(FileSystemSource::new(&config.index));
        let embedder = Arc::new(SharedEmbedder::new(config.embedding.clone()));
        Ok(Self::assemble_parts(config, source, embedder))
    }

    /// Service over a custom source tree and an already constructed model
    pub fn with_parts(
        config: Config,
        source: Arc<dyn SourceTree>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.validate()?;
        let embedder = Arc::new(SharedEmbedder::from_embedder(
            config.embedding.clone(),
            embedder,
        ));
        Ok(Self::assemble_parts(config, source, embedder))
    }

    /// Service with the default configuration file, or defaults when absent
    pub fn from_default_config() -> Result<Self> {
        Self::new(Config::load()?)
    }

    fn assemble_parts(
        config: Config,
        source: Arc<dyn SourceTree>,
        embedder: Arc<SharedEmbedder>,
    ) -> Self {
        Self {
            registry: IndexRegistry::new(&config, source, Arc::clone(&embedder)),
            retriever: Retriever::new(config.retrieval.clone()),
            assembler: Assembler::new(config.answer.clone()),
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// Answer a question about the repository at `repo_path`
    pub async fn answer(&self, repo_path: &Path, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CodeQaError::InvalidInput("question is empty".to_string()));
        }
        let started = Instant::now();

        let handle = self.registry.handle(repo_path)?;
        let (snapshot, report) = handle.ensure_fresh().await?;
        let classification = classify(question, &snapshot.chunks);
        tracing::debug!(
            intent = %classification.intent,
            entities = classification.entities.len(),
            reused = report.reused,
            "classified question"
        );

        let answer = if classification.intent.uses_retrieval() {
            if classification.entities.is_empty() {
                tracing::debug!(error = %CodeQaError::EntityNotFound, "ranking by similarity only");
            }
            let result = self
                .retriever
                .retrieve(question, &classification, &snapshot, &self.embedder)
                .await?;
            if result.is_empty() {
                tracing::debug!(error = %CodeQaError::EmptyRetrieval, "answering not found");
            }
            self.assembler
                .assemble(question, &classification, Evidence::Retrieved(&result))
        } else {
            let stats = RepositoryStats::from_snapshot(&snapshot);
            self.assembler
                .assemble(question, &classification, Evidence::Statistics(&stats))
        };

        tracing::info!(
            repo = %handle.repo_root().display(),
            intent = %answer.intent,
            cited = answer.cited.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );
        Ok(answer)
    }

    /// Force a full rebuild of a repository's index
    pub async fn build(&self, repo_path: &Path) -> Result<BuildReport> {
        self.registry.handle(repo_path)?.rebuild().await
    }

    /// Make sure a current index is served, building only when needed
    pub async fn ensure_index(&self, repo_path: &Path) -> Result<BuildReport> {
        let (_, report) = self.registry.handle(repo_path)?.ensure_fresh().await?;
        Ok(report)
    }

    /// Counts and size metrics of a repository's current index
    pub async fn stats(&self, repo_path: &Path) -> Result<RepositoryStats> {
        let (snapshot, _) = self.registry.handle(repo_path)?.ensure_fresh().await?;
        Ok(RepositoryStats::from_snapshot(&snapshot))
    }

    /// Forget a repository's index, in memory and on disk
    pub async fn invalidate(&self, repo_path: &Path) -> Result<()> {
        self.registry.invalidate(repo_path).await
    }

    /// Name of the embedding model, loading it if needed
    pub async fn model_name(&self) -> Result<String> {
        Ok(self.embedder.get().await?.model_name().to_string())
    }
}
