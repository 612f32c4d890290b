//! Repository file access
//!
//! The extractor consumes `(path, content, modification time)` triples. They
//! come from a [`SourceTree`] so tests and embedders can supply files without
//! touching the filesystem; [`FileSystemSource`] walks a local checkout.

use crate::config::IndexConfig;
use crate::error::Result;
use glob::Pattern;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::{DirEntry, WalkDir};

/// One source file of a repository
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Repository-relative path with `/` separators
    pub path: String,
    pub content: String,
    pub modified: SystemTime,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            modified,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Supplier of repository files
#[async_trait::async_trait]
pub trait SourceTree: Send + Sync {
    /// List every indexable file under `root`, sorted by path
    async fn list_files(&self, root: &Path) -> Result<Vec<SourceFile>>;
}

/// Walks a local directory tree
#[derive(Debug, Clone)]
pub struct FileSystemSource {
    pattern: String,
    exclude_dirs: Vec<String>,
    exclude_hidden: bool,
}

impl FileSystemSource {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            exclude_dirs: config.exclude_dirs.clone(),
            exclude_hidden: config.exclude_hidden,
        }
    }

    fn walk(&self, root: &Path) -> Result<Vec<SourceFile>> {
        let pattern = Pattern::new(&self.pattern)?;
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.should_skip(e));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| path.to_string_lossy().to_string());

            if !pattern.matches(&relative) {
                continue;
            }

            let bytes = std::fs::read(path)?;
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let modified = entry.metadata()?.modified()?;
            files.push(SourceFile::new(relative, content, modified));
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(root = %root.display(), files = files.len(), "scanned repository");
        Ok(files)
    }

    fn should_skip(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();

        if self.exclude_hidden && name.starts_with('.') {
            return true;
        }

        entry.file_type().is_dir() && self.exclude_dirs.iter().any(|d| name == d.as_str())
    }
}

impl Default for FileSystemSource {
    fn default() -> Self {
        Self::new(&IndexConfig::default())
    }
}

#[async_trait::async_trait]
impl SourceTree for FileSystemSource {
    async fn list_files(&self, root: &Path) -> Result<Vec<SourceFile>> {
        let this = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || this.walk(&root))
            .await
            .map_err(|e| anyhow::anyhow!("repository scan task failed: {e}"))?
    }
}

/// Aggregate signature of repository file state
pub fn fingerprint(files: &[SourceFile]) -> String {
    let mut entries: Vec<(&str, usize, u128)> = files
        .iter()
        .map(|f| {
            let nanos = f
                .modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            (f.path.as_str(), f.content.len(), nanos)
        })
        .collect();
    entries.sort();

    let mut hasher = blake3::Hasher::new();
    for (path, len, nanos) in entries {
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(len as u64).to_le_bytes());
        hasher.update(&nanos.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let a = SourceFile::new("a.py", "x = 1", at(10));
        let b = SourceFile::new("b.py", "y = 2", at(20));
        assert_eq!(
            fingerprint(&[a.clone(), b.clone()]),
            fingerprint(&[b, a])
        );
    }

    #[test]
    fn test_fingerprint_detects_mtime_and_size() {
        let base = fingerprint(&[SourceFile::new("a.py", "x = 1", at(10))]);
        assert_ne!(base, fingerprint(&[SourceFile::new("a.py", "x = 1", at(11))]));
        assert_ne!(base, fingerprint(&[SourceFile::new("a.py", "x = 10", at(10))]));
    }

    #[tokio::test]
    async fn test_walk_filters_and_skips() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join("pkg/service.py"), "class A:\n    pass\n").unwrap();
        std::fs::write(root.join("main.py"), "print(1)\n").unwrap();
        std::fs::write(root.join("README.md"), "# readme").unwrap();
        std::fs::write(root.join("__pycache__/cached.py"), "x = 1").unwrap();
        std::fs::write(root.join(".hidden/secret.py"), "x = 1").unwrap();

        let files = FileSystemSource::default().list_files(root).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "pkg/service.py"]);
    }
}
