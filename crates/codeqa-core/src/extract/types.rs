//! Core chunk types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of citable unit extracted from a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Module,
    Class,
    Method,
    Function,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 4] = [Self::Module, Self::Class, Self::Method, Self::Function];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Class => "class",
            Self::Method => "method",
            Self::Function => "function",
        }
    }

    /// Plural noun used in rendered answers
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Module => "modules",
            Self::Class => "classes",
            Self::Method => "methods",
            Self::Function => "functions",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(Self::Module),
            "class" => Ok(Self::Class),
            "method" => Ok(Self::Method),
            "function" => Ok(Self::Function),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// A citable unit of source code with exact file/line provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub kind: ChunkKind,
    pub qualified_name: String,
    pub file_path: String,
    /// 1-indexed, inclusive
    pub start_line: usize,
    /// 1-indexed, inclusive
    pub end_line: usize,
    pub signature: String,
    pub docstring: Option<String>,
    /// Verbatim source, never truncated
    pub source_text: String,
    /// Owning class for methods and nested classes
    pub parent_id: Option<String>,
    /// Set on the fallback chunk of a file that failed to parse
    #[serde(default)]
    pub degraded: bool,
}

impl Chunk {
    /// Last segment of the qualified name
    pub fn short_name(&self) -> &str {
        self.qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.qualified_name)
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Text fed to the embedding model: name, kind, signature, docstring and
    /// a bounded prefix of the source.
    pub fn embedding_text(&self, max_source_chars: usize) -> String {
        let mut text = format!("{} {}\n", self.qualified_name, self.kind);
        if !self.signature.is_empty() {
            text.push_str(&self.signature);
            text.push('\n');
        }
        if let Some(doc) = &self.docstring {
            text.push_str(doc);
            text.push('\n');
        }
        text.push_str(truncate_chars(&self.source_text, max_source_chars));
        text
    }
}

/// Stable chunk id: hash of file path, kind, qualified name and start line.
///
/// The kind keeps `main.py` apart from a `def main():` on its first line.
pub fn compute_chunk_id(
    file_path: &str,
    kind: ChunkKind,
    qualified_name: &str,
    start_line: usize,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(qualified_name.as_bytes());
    hasher.update(&[0]);
    hasher.update(start_line.to_string().as_bytes());
    let hash = hasher.finalize();
    hash.to_hex()[..32].to_string()
}

/// Prefix of at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
