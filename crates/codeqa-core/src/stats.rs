//! Statistical aggregation over chunk metadata
//!
//! Counts never go through retrieval: they filter the chunk list of a
//! snapshot by kind, so a method is never also counted as a function.

use crate::extract::{Chunk, ChunkKind};
use crate::index::IndexSnapshot;
use crate::router::CountTarget;
use serde::Serialize;
use std::collections::BTreeSet;

/// Number of indexed items of one target
pub fn count(target: CountTarget, snapshot: &IndexSnapshot) -> usize {
    count_chunks(target, &snapshot.chunks)
}

pub fn count_chunks(target: CountTarget, chunks: &[Chunk]) -> usize {
    match target {
        CountTarget::Kind(kind) => chunks.iter().filter(|c| c.kind == kind).count(),
        CountTarget::Files => chunks
            .iter()
            .map(|c| c.file_path.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
    }
}

/// Repository-wide counts and size metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryStats {
    pub functions: usize,
    pub methods: usize,
    pub classes: usize,
    pub modules: usize,
    pub files: usize,
    pub total_lines: usize,
    pub blank_lines: usize,
    pub comment_lines: usize,
    /// Files that failed to parse and were indexed as raw text
    pub degraded_files: usize,
}

impl RepositoryStats {
    pub fn compute(chunks: &[Chunk]) -> Self {
        let mut stats = Self {
            functions: count_chunks(CountTarget::Kind(ChunkKind::Function), chunks),
            methods: count_chunks(CountTarget::Kind(ChunkKind::Method), chunks),
            classes: count_chunks(CountTarget::Kind(ChunkKind::Class), chunks),
            modules: count_chunks(CountTarget::Kind(ChunkKind::Module), chunks),
            files: count_chunks(CountTarget::Files, chunks),
            ..Default::default()
        };

        for module in chunks.iter().filter(|c| c.kind == ChunkKind::Module) {
            if module.degraded {
                stats.degraded_files += 1;
            }
            for line in module.source_text.lines() {
                let trimmed = line.trim();
                stats.total_lines += 1;
                if trimmed.is_empty() {
                    stats.blank_lines += 1;
                } else if trimmed.starts_with('#') {
                    stats.comment_lines += 1;
                }
            }
        }

        stats
    }

    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Self {
        Self::compute(&snapshot.chunks)
    }

    pub fn get(&self, target: CountTarget) -> usize {
        match target {
            CountTarget::Kind(ChunkKind::Function) => self.functions,
            CountTarget::Kind(ChunkKind::Method) => self.methods,
            CountTarget::Kind(ChunkKind::Class) => self.classes,
            CountTarget::Kind(ChunkKind::Module) => self.modules,
            CountTarget::Files => self.files,
        }
    }

    pub fn code_lines(&self) -> usize {
        self.total_lines - self.blank_lines - self.comment_lines
    }

    pub fn avg_methods_per_class(&self) -> f64 {
        if self.classes == 0 {
            0.0
        } else {
            self.methods as f64 / self.classes as f64
        }
    }
}
