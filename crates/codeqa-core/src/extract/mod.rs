//! Chunk extraction
//!
//! Parses each source file into an ordered sequence of typed chunks
//! (module / class / method / function) with exact line ranges. A file that
//! fails to parse degrades to a single raw chunk and is reported as skipped;
//! it never aborts extraction of the other files.

pub mod parser;
pub mod python;
pub mod types;

pub use python::{module_name_for_path, SyntaxNode};
pub use types::{compute_chunk_id, truncate_chars, Chunk, ChunkKind};

use crate::config::ExtractorConfig;
use crate::error::{CodeQaError, Result};
use crate::source::SourceFile;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A file whose definitions could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Outcome of extracting a whole repository
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub chunks: Vec<Chunk>,
    pub files_seen: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Chunk extractor for one source grammar
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Extract the chunks of a single file.
    ///
    /// Returns `CodeQaError::Parse` when the file has syntax errors. Blank
    /// files yield no chunks; any other parseable file yields at least its
    /// module chunk.
    pub fn extract(&self, file_path: &str, content: &str) -> Result<Vec<Chunk>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tree = parser::parse(content, file_path)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(CodeQaError::Parse {
                path: file_path.to_string(),
                message: describe_error(root),
            });
        }

        let mut chunks = python::PythonExtractor::new(content, file_path).extract(root);
        sort_chunks(&mut chunks);
        debug!(path = file_path, chunks = chunks.len(), "extracted chunks");
        Ok(chunks)
    }

    /// Degraded chunk holding the first lines of an unparseable file
    pub fn fallback_chunk(&self, file_path: &str, content: &str) -> Chunk {
        let lines: Vec<&str> = content
            .lines()
            .take(self.config.raw_fallback_lines.max(1))
            .collect();
        let qualified_name = module_name_for_path(file_path);
        Chunk {
            id: compute_chunk_id(file_path, ChunkKind::Module, &qualified_name, 1),
            kind: ChunkKind::Module,
            qualified_name,
            file_path: file_path.to_string(),
            start_line: 1,
            end_line: lines.len().max(1),
            signature: String::new(),
            docstring: None,
            source_text: lines.join("\n"),
            parent_id: None,
            degraded: true,
        }
    }

    /// Extract every file, recovering per-file parse failures
    pub fn extract_all(&self, files: &[SourceFile]) -> ExtractReport {
        let mut report = ExtractReport {
            files_seen: files.len(),
            ..Default::default()
        };

        for file in files {
            match self.extract(&file.path, &file.content) {
                Ok(chunks) => report.chunks.extend(chunks),
                Err(e) => {
                    warn!(path = %file.path, error = %e, "falling back to raw chunk");
                    report.chunks.push(self.fallback_chunk(&file.path, &file.content));
                    report.skipped.push(SkippedFile {
                        path: file.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        sort_chunks(&mut report.chunks);
        report
    }

    pub fn max_embed_chars(&self) -> usize {
        self.config.max_embed_chars
    }
}

/// Deterministic order: file path, start line, then kind
pub fn sort_chunks(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.start_line.cmp(&b.start_line))
            .then(a.kind.cmp(&b.kind))
            .then(a.id.cmp(&b.id))
    });
}

fn describe_error(root: tree_sitter::Node<'_>) -> String {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return format!("syntax error at line {}", node.start_position().row + 1);
        }
        if node.has_error() {
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    "syntax error".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn file(path: &str, content: &str) -> SourceFile {
        SourceFile::new(path, content, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn test_broken_file_is_isolated() {
        let files = vec![
            file("bad.py", "def broken(:\n    return 1\n"),
            file("good.py", "def ok():\n    return 1\n"),
        ];
        let report = Extractor::default().extract_all(&files);

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, "bad.py");
        assert!(report
            .chunks
            .iter()
            .any(|c| c.file_path == "good.py" && c.kind == ChunkKind::Function));

        let degraded: Vec<&Chunk> = report.chunks.iter().filter(|c| c.degraded).collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].file_path, "bad.py");
        assert_eq!(degraded[0].kind, ChunkKind::Module);
    }

    #[test]
    fn test_module_and_same_named_function_have_distinct_ids() {
        let files = vec![
            file("main.py", "def main():\n    return 1\n"),
            file("pkg/__init__.py", "def pkg():\n    return 2\n"),
        ];
        let report = Extractor::default().extract_all(&files);
        assert!(report.skipped.is_empty());
        assert_eq!(report.chunks.len(), 4);

        let mut ids: Vec<&str> = report.chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_file_without_definitions_keeps_module_chunk() {
        let chunks = Extractor::default()
            .extract("consts.py", "A = 1\nB = 2\n")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Module);
        assert_eq!(chunks[0].qualified_name, "consts");
    }

    #[test]
    fn test_blank_file_yields_nothing() {
        assert!(Extractor::default().extract("empty.py", "  \n").unwrap().is_empty());
    }

    #[test]
    fn test_fallback_chunk_limits_lines() {
        let config = ExtractorConfig {
            raw_fallback_lines: 2,
            ..Default::default()
        };
        let chunk = Extractor::new(config).fallback_chunk("x.py", "a\nb\nc\nd\n");
        assert_eq!(chunk.source_text, "a\nb");
        assert_eq!((chunk.start_line, chunk.end_line), (1, 2));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let source = "class A:\n    def f(self):\n        pass\n\ndef g():\n    pass\n";
        let extractor = Extractor::default();
        let first = extractor.extract("a.py", source).unwrap();
        let second = extractor.extract("a.py", source).unwrap();
        assert_eq!(first, second);
    }
}
