//! Retriever
//!
//! Exact entity matches come first, in entity order; the remaining slots are
//! filled by cosine similarity above a floor, score descending with ties
//! broken by ascending chunk id.

use crate::config::RetrievalConfig;
use crate::embed::SharedEmbedder;
use crate::error::{Phase, Result};
use crate::extract::{Chunk, ChunkKind};
use crate::index::{IndexSnapshot, VectorStore};
use crate::router::{Classification, Intent};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// One retrieved chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub chunk: Chunk,
    /// Cosine similarity to the question, in [-1, 1]
    pub score: f32,
    /// Admitted because its qualified name was mentioned in the question
    pub exact_match: bool,
}

/// Ranked chunks judged relevant to a question
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<Hit>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.chunk.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hits.iter().any(|h| h.chunk.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Hit> {
        self.hits.iter().find(|h| h.chunk.id == id)
    }
}

/// Entity-boosted similarity search over one snapshot
#[derive(Debug, Clone, Default)]
pub struct Retriever {
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Result size for an intent
    pub fn k_for(&self, intent: Intent) -> usize {
        match intent {
            Intent::Implementation | Intent::MethodUsage => self.config.precise_k,
            Intent::Purpose | Intent::Generic | Intent::StatCount => self.config.broad_k,
        }
    }

    /// Embed the question and rank the snapshot against it
    pub async fn retrieve(
        &self,
        question: &str,
        classification: &Classification,
        snapshot: &IndexSnapshot,
        embedder: &SharedEmbedder,
    ) -> Result<RetrievalResult> {
        let query = embedder
            .embed(question, Phase::Query, &snapshot.repo_root)
            .await?;
        Ok(self.rank(snapshot, &query, classification, self.k_for(classification.intent)))
    }

    /// Rank chunks for an already embedded question
    pub fn rank(
        &self,
        snapshot: &IndexSnapshot,
        query: &[f32],
        classification: &Classification,
        k: usize,
    ) -> RetrievalResult {
        if k == 0 || snapshot.is_empty() {
            return RetrievalResult::default();
        }
        if classification.entities.is_empty() {
            tracing::debug!("no entity in question, ranking by similarity only");
        }

        let score_of = |chunk: &Chunk| {
            snapshot
                .row_of(&chunk.id)
                .map(|row| snapshot.store.score(row, query))
                .unwrap_or(0.0)
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut exact: Vec<Hit> = Vec::new();
        for entity in &classification.entities {
            for chunk in snapshot.chunks_named(&entity.qualified_name) {
                if seen.insert(chunk.id.as_str()) {
                    exact.push(Hit {
                        chunk: chunk.clone(),
                        score: score_of(chunk),
                        exact_match: true,
                    });
                }
            }
        }

        // Methods of a class asked about are its description, not fill.
        let listing = classification.member_listing().is_some();
        let mut members: Vec<Hit> = Vec::new();
        if classification.intent == Intent::Purpose || listing {
            for class in exact.iter().filter(|h| h.chunk.kind == ChunkKind::Class) {
                for child in snapshot.children_of(&class.chunk.id) {
                    if child.kind == ChunkKind::Method && seen.insert(child.id.as_str()) {
                        members.push(Hit {
                            chunk: child.clone(),
                            score: score_of(child),
                            exact_match: false,
                        });
                    }
                }
            }
            if listing {
                members.sort_by(|a, b| a.chunk.start_line.cmp(&b.chunk.start_line));
            } else {
                members.sort_by(by_score_then_id);
            }
        }

        if listing && !exact.is_empty() {
            let hits: Vec<Hit> = exact.into_iter().chain(members).collect();
            tracing::debug!(hits = hits.len(), "listing class members");
            return RetrievalResult { hits };
        }

        let mut fill: Vec<Hit> = Vec::new();
        for (chunk, score) in snapshot.search(query, snapshot.len()) {
            if score < self.config.min_score {
                break;
            }
            if seen.insert(chunk.id.as_str()) {
                fill.push(Hit {
                    chunk: chunk.clone(),
                    score,
                    exact_match: false,
                });
            }
        }

        let mut hits: Vec<Hit> = if self.config.exact_match_boost {
            exact.into_iter().chain(members).chain(fill).collect()
        } else {
            let mut all: Vec<Hit> = exact.into_iter().chain(members).chain(fill).collect();
            all.sort_by(by_score_then_id);
            all
        };
        hits.truncate(k);

        tracing::debug!(
            hits = hits.len(),
            exact = hits.iter().filter(|h| h.exact_match).count(),
            k,
            "retrieved chunks"
        );
        RetrievalResult { hits }
    }
}

fn by_score_then_id(a: &Hit, b: &Hit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::compute_chunk_id;
    use crate::index::SnapshotMeta;
    use crate::router::classify;
    use chrono::Utc;
    use std::path::PathBuf;

    fn chunk(kind: ChunkKind, name: &str, line: usize, parent: Option<&str>) -> Chunk {
        Chunk {
            id: compute_chunk_id("svc.py", kind, name, line),
            kind,
            qualified_name: name.to_string(),
            file_path: "svc.py".to_string(),
            start_line: line,
            end_line: line + 1,
            signature: String::new(),
            docstring: None,
            source_text: format!("# {name}"),
            parent_id: parent.map(str::to_string),
            degraded: false,
        }
    }

    /// Three orthogonal directions: class, its method, an unrelated function
    fn snapshot() -> IndexSnapshot {
        let class = chunk(ChunkKind::Class, "UserService", 1, None);
        let method = chunk(ChunkKind::Method, "UserService.get_user", 2, Some(&class.id));
        let func = chunk(ChunkKind::Function, "render_chart", 10, None);
        let meta = SnapshotMeta {
            repo_root: PathBuf::from("/repo"),
            fingerprint: "fp".to_string(),
            built_at: Utc::now(),
            model: "test".to_string(),
            dimensions: 3,
            file_count: 1,
            skipped_files: Vec::new(),
        };
        IndexSnapshot::new(
            meta,
            vec![class, method, func],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
        )
        .unwrap()
    }

    fn names(result: &RetrievalResult) -> Vec<&str> {
        result.hits.iter().map(|h| h.chunk.qualified_name.as_str()).collect()
    }

    #[test]
    fn test_exact_match_precedes_similarity() {
        let snapshot = snapshot();
        let c = classify("How is UserService implemented?", &snapshot.chunks);
        let result = Retriever::default().rank(&snapshot, &[0.0, 0.0, 1.0], &c, 3);
        assert_eq!(names(&result), vec!["UserService", "render_chart"]);
        assert!(result.hits[0].exact_match);
        assert!(!result.hits[1].exact_match);
    }

    #[test]
    fn test_purpose_admits_class_methods() {
        let snapshot = snapshot();
        let c = classify("What does UserService do?", &snapshot.chunks);
        let result = Retriever::default().rank(&snapshot, &[0.0, 0.0, 1.0], &c, 8);
        assert_eq!(
            names(&result),
            vec!["UserService", "UserService.get_user", "render_chart"]
        );
    }

    #[test]
    fn test_member_listing_skips_similarity_fill() {
        let snapshot = snapshot();
        let c = classify("What methods does UserService have?", &snapshot.chunks);
        let result = Retriever::default().rank(&snapshot, &[0.0, 0.0, 1.0], &c, 1);
        assert_eq!(names(&result), vec!["UserService", "UserService.get_user"]);
    }

    #[test]
    fn test_similarity_floor_gives_empty_result() {
        let snapshot = snapshot();
        let c = classify("Where is the payment gateway?", &snapshot.chunks);
        let result = Retriever::default().rank(&snapshot, &[-1.0, -1.0, -1.0], &c, 8);
        assert!(result.is_empty());
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let snapshot = snapshot();
        let c = classify("Where are things?", &snapshot.chunks);
        let query = [0.5, 0.5, 0.5];
        let first = Retriever::default().rank(&snapshot, &query, &c, 8);
        let second = Retriever::default().rank(&snapshot, &query, &c, 8);
        assert_eq!(first, second);
        // equal scores fall back to ascending id
        let ids = first.ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_k_by_intent() {
        let retriever = Retriever::default();
        assert_eq!(retriever.k_for(Intent::Implementation), 3);
        assert_eq!(retriever.k_for(Intent::MethodUsage), 3);
        assert_eq!(retriever.k_for(Intent::Purpose), 8);
        assert_eq!(retriever.k_for(Intent::Generic), 8);
    }

    #[test]
    fn test_result_truncated_to_k() {
        let snapshot = snapshot();
        let c = classify("Where are things?", &snapshot.chunks);
        let result = Retriever::default().rank(&snapshot, &[0.5, 0.5, 0.5], &c, 2);
        assert_eq!(result.len(), 2);
    }
}
