//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use codeqa_core::{CodeQa, Config, Embedder, FileSystemSource, HashingEmbedder, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Hashing embedder that counts batch calls and can be slowed down on demand
pub struct TestEmbedder {
    inner: HashingEmbedder,
    pub batch_calls: AtomicUsize,
    slow: AtomicBool,
    delay: Duration,
}

impl TestEmbedder {
    pub fn new(dimensions: usize, delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(dimensions),
            batch_calls: AtomicUsize::new(0),
            slow: AtomicBool::new(false),
            delay,
        }
    }

    pub fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for TestEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub fn config(index_dir: &Path) -> Config {
    let mut config = Config::default();
    config.index.index_dir = Some(index_dir.to_path_buf());
    config.embedding.timeout_secs = 30;
    config
}

pub fn service_with(config: Config, embedder: Arc<TestEmbedder>) -> CodeQa {
    let source = Arc::new(FileSystemSource::new(&config.index));
    CodeQa::with_parts(config, source, embedder).unwrap()
}

pub fn test_embedder(config: &Config) -> Arc<TestEmbedder> {
    Arc::new(TestEmbedder::new(
        config.embedding.dimensions,
        Duration::from_millis(300),
    ))
}

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub const USERS_PY: &str = r#""""User management."""

class UserService:
    """Loads users from the database and caches them."""

    def __init__(self, db):
        self.db = db
        self.cache = {}

    def get_user(self, user_id):
        """Fetch a user.

        :param user_id: Primary key of the user.
        """
        if user_id in self.cache:
            return self.cache[user_id]
        user = self.db.load(user_id)
        self.cache[user_id] = user
        return user

    def delete_user(self, user_id):
        self.cache.pop(user_id, None)
        self.db.delete(user_id)

    def list_users(self):
        return list(self.cache.values())

    def count_users(self):
        return len(self.cache)


def normalize_email(email):
    """Lowercase and strip an email address."""
    return email.strip().lower()
"#;

pub const REPORTS_PY: &str = r#""""Report rendering."""

class ReportBuilder:
    """Assembles tabular reports."""

    def __init__(self, title):
        self.title = title
        self.rows = []

    def add_row(self, row):
        self.rows.append(row)

    def header(self):
        return self.title.upper()

    def render(self):
        lines = [self.header()]
        for row in self.rows:
            lines.append(", ".join(str(c) for c in row))
        return "\n".join(lines)

    def size(self):
        return len(self.rows)


def export_csv(builder, path):
    """Write a report to disk."""
    line_one = builder.header()
    line_two = builder.size()
    line_three = builder.render()
    with open(path, "w") as handle:
        handle.write(line_one)
        handle.write("\n")
        handle.write(str(line_two))
        handle.write("\n")
        handle.write(line_three)
        handle.write("\n")
        handle.flush()
    summary = {"title": line_one, "rows": line_two}
    total = sum(1 for _ in builder.rows)
    summary["total"] = total
    return summary
"#;

/// Two classes, two top-level functions and ten methods
pub fn fixture_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "app/users.py", USERS_PY);
    write(dir.path(), "app/reports.py", REPORTS_PY);
    dir
}
