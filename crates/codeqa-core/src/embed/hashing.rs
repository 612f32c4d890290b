//! Local feature-hashing embedder
//!
//! Identifier-aware bag of words hashed into a fixed number of signed
//! buckets. Deterministic across runs and platforms, needs no model files,
//! and scores texts sharing identifier words as similar.

use super::Embedder;
use crate::error::Result;
use crate::router::normalize::split_words;
use async_trait::async_trait;

/// Words carrying no signal for code search
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "class", "def", "do", "does", "else",
    "for", "from", "function", "how", "i", "if", "import", "in", "is", "it", "me", "method", "none",
    "not", "of", "on", "or", "pass", "return", "self", "that", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "with", "work", "works", "you",
];

const MODEL_NAME: &str = "feature-hashing";

/// Lowercase content words of `text`, identifiers split into their parts
pub fn tokenize(text: &str) -> Vec<String> {
    split_words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Deterministic embedder based on signed feature hashing
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}
