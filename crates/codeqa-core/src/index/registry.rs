//! Per-repository index handles
//!
//! The registry creates one [`IndexHandle`] per canonical repository path on
//! first use. A handle serves its current snapshot to any number of readers
//! and allows one build at a time; a build request that finds another build
//! running is rejected with `BuildInProgress`.

use super::{build_snapshot, store, IndexSnapshot};
use crate::config::Config;
use crate::embed::SharedEmbedder;
use crate::error::{CodeQaError, Phase, Result};
use crate::extract::Extractor;
use crate::source::{fingerprint, SourceFile, SourceTree};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Outcome of making an index available
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub chunks: usize,
    pub files: usize,
    pub skipped_files: usize,
    pub duration_ms: u64,
    /// True when an existing snapshot or persisted artifact was served
    pub reused: bool,
}

impl BuildReport {
    fn for_snapshot(snapshot: &IndexSnapshot, started: Instant, reused: bool) -> Self {
        Self {
            chunks: snapshot.len(),
            files: snapshot.file_count,
            skipped_files: snapshot.skipped_files.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            reused,
        }
    }
}

/// Everything a handle needs to scan, extract, embed and persist
struct BuildContext {
    source: Arc<dyn SourceTree>,
    embedder: Arc<SharedEmbedder>,
    extractor: Extractor,
    build_timeout: Duration,
}

/// Index lifecycle of one repository
pub struct IndexHandle {
    repo_root: PathBuf,
    index_dir: PathBuf,
    served: RwLock<Option<Arc<IndexSnapshot>>>,
    building: tokio::sync::Mutex<()>,
    ctx: Arc<BuildContext>,
}

impl IndexHandle {
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Currently served snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.served.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_building(&self) -> bool {
        self.building.try_lock().is_err()
    }

    /// Serve a snapshot matching the current repository state.
    ///
    /// Reuses the served snapshot or the persisted artifact when their
    /// fingerprint matches, otherwise rebuilds. While another build runs,
    /// the previously served snapshot is returned; with none to serve the
    /// call fails with `BuildInProgress`.
    pub async fn ensure_fresh(&self) -> Result<(Arc<IndexSnapshot>, BuildReport)> {
        let started = Instant::now();
        let Ok(_guard) = self.building.try_lock() else {
            return match self.snapshot() {
                Some(snapshot) => {
                    tracing::debug!(
                        repo = %self.repo_root.display(),
                        "serving previous index during rebuild"
                    );
                    let report = BuildReport::for_snapshot(&snapshot, started, true);
                    Ok((snapshot, report))
                }
                None => Err(CodeQaError::BuildInProgress(self.repo_root.clone())),
            };
        };

        let deadline = tokio::time::Instant::now() + self.ctx.build_timeout;
        let files = self.scan(deadline).await?;
        let current = fingerprint(&files);

        if let Some(snapshot) = self.snapshot().filter(|s| s.fingerprint == current) {
            let report = BuildReport::for_snapshot(&snapshot, started, true);
            return Ok((snapshot, report));
        }

        if let Some(snapshot) = self.load_persisted(&current, deadline).await? {
            let snapshot = self.publish(snapshot);
            let report = BuildReport::for_snapshot(&snapshot, started, true);
            tracing::info!(
                repo = %self.repo_root.display(),
                chunks = report.chunks,
                "loaded persisted index"
            );
            return Ok((snapshot, report));
        }

        if self.snapshot().is_some() {
            tracing::info!(repo = %self.repo_root.display(), "index is stale, rebuilding");
        } else {
            tracing::info!(repo = %self.repo_root.display(), "no index, building");
        }
        let snapshot = self.build(files, current, deadline).await?;
        let report = BuildReport::for_snapshot(&snapshot, started, false);
        Ok((snapshot, report))
    }

    /// Rebuild unconditionally; fails with `BuildInProgress` if a build runs
    pub async fn rebuild(&self) -> Result<BuildReport> {
        let started = Instant::now();
        let Ok(_guard) = self.building.try_lock() else {
            tracing::warn!(repo = %self.repo_root.display(), "rejected concurrent index build");
            return Err(CodeQaError::BuildInProgress(self.repo_root.clone()));
        };

        let deadline = tokio::time::Instant::now() + self.ctx.build_timeout;
        let files = self.scan(deadline).await?;
        let current = fingerprint(&files);
        let snapshot = self.build(files, current, deadline).await?;
        Ok(BuildReport::for_snapshot(&snapshot, started, false))
    }

    /// Compare the served snapshot with the repository without building
    pub async fn is_stale(&self) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.ctx.build_timeout;
        let files = self.scan(deadline).await?;
        Ok(self
            .snapshot()
            .map_or(true, |s| s.fingerprint != fingerprint(&files)))
    }

    async fn scan(&self, deadline: tokio::time::Instant) -> Result<Vec<SourceFile>> {
        within(
            deadline,
            Phase::Scan,
            &self.repo_root,
            self.ctx.source.list_files(&self.repo_root),
        )
        .await
    }

    async fn load_persisted(
        &self,
        current: &str,
        deadline: tokio::time::Instant,
    ) -> Result<Option<IndexSnapshot>> {
        let dir = self.index_dir.clone();
        let loaded = within(deadline, Phase::Load, &self.repo_root, async move {
            tokio::task::spawn_blocking(move || store::load(&dir))
                .await
                .map_err(|e| anyhow::anyhow!("index load task failed: {e}"))?
        })
        .await;

        let snapshot = match loaded {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(e @ CodeQaError::Timeout { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    repo = %self.repo_root.display(),
                    error = %e,
                    "unreadable index artifact"
                );
                return Ok(None);
            }
        };

        let model = self.ctx.embedder.get().await?;
        if snapshot.fingerprint != current
            || snapshot.model != model.model_name()
            || snapshot.dimensions != model.dimensions()
        {
            tracing::debug!(repo = %self.repo_root.display(), "persisted index is stale");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn build(
        &self,
        files: Vec<SourceFile>,
        current: String,
        deadline: tokio::time::Instant,
    ) -> Result<Arc<IndexSnapshot>> {
        let snapshot = within(
            deadline,
            Phase::Embed,
            &self.repo_root,
            build_snapshot(
                &self.repo_root,
                files,
                current,
                &self.ctx.extractor,
                &self.ctx.embedder,
            ),
        )
        .await?;

        let snapshot = Arc::new(snapshot);
        let to_write = Arc::clone(&snapshot);
        let dir = self.index_dir.clone();
        let temp = within(deadline, Phase::Persist, &self.repo_root, async move {
            tokio::task::spawn_blocking(move || store::write_temp(&to_write, &dir))
                .await
                .map_err(|e| anyhow::anyhow!("index write task failed: {e}"))?
        })
        .await?;

        // commit and publish must stay free of await points
        store::commit(temp, &self.index_dir)?;
        tracing::info!(
            repo = %self.repo_root.display(),
            chunks = snapshot.len(),
            skipped = snapshot.skipped_files.len(),
            "index built"
        );
        Ok(self.publish_arc(snapshot))
    }

    fn publish(&self, snapshot: IndexSnapshot) -> Arc<IndexSnapshot> {
        self.publish_arc(Arc::new(snapshot))
    }

    fn publish_arc(&self, snapshot: Arc<IndexSnapshot>) -> Arc<IndexSnapshot> {
        match self.served.write() {
            Ok(mut guard) => *guard = Some(Arc::clone(&snapshot)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&snapshot)),
        }
        snapshot
    }
}

/// Run `fut` unless `deadline` passes first
async fn within<T>(
    deadline: tokio::time::Instant,
    phase: Phase,
    repo: &Path,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(repo = %repo.display(), %phase, "index build timed out");
            Err(CodeQaError::Timeout {
                phase,
                path: repo.to_path_buf(),
            })
        }
    }
}

/// Owner of every index handle in the process
pub struct IndexRegistry {
    index_root: PathBuf,
    handles: Mutex<HashMap<PathBuf, Arc<IndexHandle>>>,
    ctx: Arc<BuildContext>,
}

impl IndexRegistry {
    pub fn new(
        config: &Config,
        source: Arc<dyn SourceTree>,
        embedder: Arc<SharedEmbedder>,
    ) -> Self {
        Self {
            index_root: config.index_root(),
            handles: Mutex::new(HashMap::new()),
            ctx: Arc::new(BuildContext {
                source,
                embedder,
                extractor: Extractor::new(config.extractor.clone()),
                build_timeout: config.index.build_timeout(),
            }),
        }
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    /// Handle for a repository, created on first use
    pub fn handle(&self, repo_path: &Path) -> Result<Arc<IndexHandle>> {
        let repo_root = canonical_repo(repo_path)?;
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| anyhow::anyhow!("index registry lock poisoned"))?;

        let handle = handles.entry(repo_root.clone()).or_insert_with(|| {
            tracing::debug!(repo = %repo_root.display(), "creating index handle");
            Arc::new(IndexHandle {
                index_dir: store::index_dir_for(&self.index_root, &repo_root),
                repo_root: repo_root.clone(),
                served: RwLock::new(None),
                building: tokio::sync::Mutex::new(()),
                ctx: Arc::clone(&self.ctx),
            })
        });
        Ok(Arc::clone(handle))
    }

    /// Handle for a repository only if one was already created
    pub fn get(&self, repo_path: &Path) -> Option<Arc<IndexHandle>> {
        let repo_root = canonical_repo(repo_path).ok()?;
        self.handles.lock().ok()?.get(&repo_root).cloned()
    }

    /// Drop the handle of a repository and delete its persisted index
    pub async fn invalidate(&self, repo_path: &Path) -> Result<()> {
        let repo_root = canonical_repo(repo_path)?;
        self.handles
            .lock()
            .map_err(|_| anyhow::anyhow!("index registry lock poisoned"))?
            .remove(&repo_root);

        let dir = store::index_dir_for(&self.index_root, &repo_root);
        tokio::task::spawn_blocking(move || store::remove(&dir))
            .await
            .map_err(|e| anyhow::anyhow!("index removal task failed: {e}"))??;
        tracing::info!(repo = %repo_root.display(), "index invalidated");
        Ok(())
    }
}

fn canonical_repo(repo_path: &Path) -> Result<PathBuf> {
    let root = repo_path.canonicalize().map_err(|e| {
        CodeQaError::InvalidInput(format!(
            "repository path {} is not accessible: {e}",
            repo_path.display()
        ))
    })?;
    if !root.is_dir() {
        return Err(CodeQaError::InvalidInput(format!(
            "repository path {} is not a directory",
            repo_path.display()
        )));
    }
    Ok(root)
}
