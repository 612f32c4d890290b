//! Embedding index
//!
//! An [`IndexSnapshot`] is an immutable, fully validated set of chunks with
//! a parallel vector store. Snapshots are built from a repository, persisted
//! to SQLite and served through the per-path handles of an
//! [`IndexRegistry`].

mod registry;
pub mod store;

pub use registry::{BuildReport, IndexHandle, IndexRegistry};

use crate::embed::SharedEmbedder;
use crate::error::{CodeQaError, Phase, Result};
use crate::extract::{Chunk, Extractor, SkippedFile};
use crate::source::SourceFile;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Convert f32 embedding to bytes
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert bytes to f32 embedding
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Similarity search over the vectors of one snapshot.
///
/// Rows are positions in the snapshot's chunk list. Results are ordered by
/// score descending, ties by ascending chunk id.
pub trait VectorStore: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// Similarity of one row to the query
    fn score(&self, row: usize, query: &[f32]) -> f32;

    /// Up to `k` `(row, score)` pairs
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;
}

/// Exact brute-force store, adequate at single-repository scale
#[derive(Debug, Clone, Default)]
pub struct FlatVectorStore {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
}

impl FlatVectorStore {
    pub fn new(ids: Vec<String>, vectors: Vec<Vec<f32>>, dimensions: usize) -> Result<Self> {
        if ids.len() != vectors.len() {
            return Err(CodeQaError::InvalidInput(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(CodeQaError::InvalidInput(format!(
                "vector of length {} in a {dimensions}-dimensional store",
                bad.len()
            )));
        }
        Ok(Self {
            ids,
            vectors,
            dimensions,
        })
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }
}

impl VectorStore for FlatVectorStore {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn score(&self, row: usize, query: &[f32]) -> f32 {
        self.vectors
            .get(row)
            .map(|v| cosine_similarity(v, query))
            .unwrap_or(0.0)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(row, v)| (row, cosine_similarity(v, query)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        scored.truncate(k);
        scored
    }
}

/// Immutable, validated index of one repository
#[derive(Debug)]
pub struct IndexSnapshot {
    pub repo_root: PathBuf,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub dimensions: usize,
    pub file_count: usize,
    pub chunks: Vec<Chunk>,
    pub store: FlatVectorStore,
    pub skipped_files: Vec<SkippedFile>,
    by_id: HashMap<String, usize>,
}

/// Descriptive fields of a snapshot
#[derive(Debug, Clone)]
pub struct SnapshotMeta {
    pub repo_root: PathBuf,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub dimensions: usize,
    pub file_count: usize,
    pub skipped_files: Vec<SkippedFile>,
}

impl IndexSnapshot {
    /// Assemble a snapshot, rejecting mismatched chunk and vector lists
    pub fn new(meta: SnapshotMeta, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(CodeQaError::storage(
                &meta.repo_root,
                format!("{} chunks but {} vectors", chunks.len(), vectors.len()),
            ));
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let store = FlatVectorStore::new(ids, vectors, meta.dimensions)
            .map_err(|e| CodeQaError::storage(&meta.repo_root, e.to_string()))?;
        let by_id = chunks
            .iter()
            .enumerate()
            .map(|(row, c)| (c.id.clone(), row))
            .collect();

        Ok(Self {
            repo_root: meta.repo_root,
            fingerprint: meta.fingerprint,
            built_at: meta.built_at,
            model: meta.model,
            dimensions: meta.dimensions,
            file_count: meta.file_count,
            chunks,
            store,
            skipped_files: meta.skipped_files,
            by_id,
        })
    }

    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            repo_root: self.repo_root.clone(),
            fingerprint: self.fingerprint.clone(),
            built_at: self.built_at,
            model: self.model.clone(),
            dimensions: self.dimensions,
            file_count: self.file_count,
            skipped_files: self.skipped_files.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|&row| &self.chunks[row])
    }

    pub fn row_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Chunks with exactly this qualified name, by (file_path, start_line)
    pub fn chunks_named(&self, qualified_name: &str) -> Vec<&Chunk> {
        let mut found: Vec<&Chunk> = self
            .chunks
            .iter()
            .filter(|c| c.qualified_name == qualified_name)
            .collect();
        found.sort_by(|a, b| (&a.file_path, a.start_line).cmp(&(&b.file_path, b.start_line)));
        found
    }

    /// Methods and nested classes owned by a class chunk
    pub fn children_of(&self, id: &str) -> Vec<&Chunk> {
        self.chunks
            .iter()
            .filter(|c| c.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Distinct file paths with at least one chunk
    pub fn files(&self) -> BTreeSet<&str> {
        self.chunks.iter().map(|c| c.file_path.as_str()).collect()
    }

    /// Nearest chunks to a query vector
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(&Chunk, f32)> {
        self.store
            .search(query, k)
            .into_iter()
            .map(|(row, score)| (&self.chunks[row], score))
            .collect()
    }
}

/// Extract and embed a repository into a new validated snapshot
pub async fn build_snapshot(
    repo_root: &Path,
    files: Vec<SourceFile>,
    fingerprint: String,
    extractor: &Extractor,
    embedder: &SharedEmbedder,
) -> Result<IndexSnapshot> {
    let non_empty_files = files.iter().filter(|f| !f.is_blank()).count();
    let file_count = files.len();

    let worker = extractor.clone();
    let report = tokio::task::spawn_blocking(move || worker.extract_all(&files))
        .await
        .map_err(|e| anyhow::anyhow!("extraction task failed: {e}"))?;

    if non_empty_files > 0 && report.chunks.is_empty() {
        return Err(CodeQaError::storage(
            repo_root,
            format!("{non_empty_files} non-empty files produced no chunks"),
        ));
    }

    let texts: Vec<String> = report
        .chunks
        .iter()
        .map(|c| c.embedding_text(extractor.max_embed_chars()))
        .collect();
    let vectors = embedder.embed_all(&texts, Phase::Embed, repo_root).await?;
    let model = embedder.get().await?;

    let meta = SnapshotMeta {
        repo_root: repo_root.to_path_buf(),
        fingerprint,
        built_at: Utc::now(),
        model: model.model_name().to_string(),
        dimensions: model.dimensions(),
        file_count,
        skipped_files: report.skipped,
    };
    let snapshot = IndexSnapshot::new(meta, report.chunks, vectors)?;

    tracing::debug!(
        repo = %repo_root.display(),
        chunks = snapshot.len(),
        skipped = snapshot.skipped_files.len(),
        "built index snapshot"
    );
    Ok(snapshot)
}
