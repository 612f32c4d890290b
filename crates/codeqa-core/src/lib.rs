//! Codeqa Core Library
//!
//! Question answering over a local Python repository.
//!
//! # Features
//! - Syntax-aware chunking of modules, classes, methods and functions
//! - Flat cosine-similarity index persisted in SQLite, one per repository
//! - Rule-based intent routing with case-convention-insensitive symbol matching
//! - Entity-boosted retrieval and exact statistics from chunk metadata
//! - Markdown answers with verbatim, cited excerpts

pub mod answer;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod index;
pub mod retrieve;
pub mod router;
pub mod service;
pub mod source;
pub mod stats;

pub use answer::{Answer, Assembler, Evidence};
pub use config::{
    AnswerConfig, Config, EmbeddingBackend, EmbeddingConfig, ExtractorConfig, IndexConfig,
    RetrievalConfig,
};
pub use embed::{Embedder, HashingEmbedder, HttpEmbedder, SharedEmbedder};
pub use error::{CodeQaError, Error, ErrorKind, Phase, Result};
pub use extract::{Chunk, ChunkKind, ExtractReport, Extractor, SkippedFile};
pub use index::{
    BuildReport, FlatVectorStore, IndexHandle, IndexRegistry, IndexSnapshot, VectorStore,
};
pub use retrieve::{Hit, RetrievalResult, Retriever};
pub use router::{classify, Classification, CountTarget, Entity, Intent};
pub use service::CodeQa;
pub use source::{FileSystemSource, SourceFile, SourceTree};
pub use stats::RepositoryStats;

/// Default cache directory name
pub const CACHE_DIR_NAME: &str = "codeqa";

/// Default config directory name
pub const CONFIG_DIR_NAME: &str = "codeqa";
