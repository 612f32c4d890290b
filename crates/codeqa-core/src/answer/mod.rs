//! Answer assembler
//!
//! Each intent has its own markdown template. Every excerpt carries a
//! citation and reproduces the chunk source verbatim; an answer never cites
//! a chunk that is not part of the evidence it was built from.

pub mod excerpt;

use crate::config::AnswerConfig;
use crate::extract::{Chunk, ChunkKind};
use crate::retrieve::{Hit, RetrievalResult};
use crate::router::{Classification, CountTarget, Intent};
use crate::stats::RepositoryStats;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

pub use excerpt::{citation, code_block, parameter_description, usage_snippets, UsageSnippet};

/// Opening line of an answer with no supporting evidence
pub const NOT_FOUND: &str = "No relevant code was found for this question.";

/// Rendered answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub markdown: String,
    /// Ids of the chunks quoted or referenced, in order of first appearance
    pub cited: Vec<String>,
    pub intent: Intent,
}

/// What an answer is built from
#[derive(Debug, Clone, Copy)]
pub enum Evidence<'a> {
    Retrieved(&'a RetrievalResult),
    Statistics(&'a RepositoryStats),
}

/// Chunk ids referenced while rendering, restricted to the evidence
struct Citations<'a> {
    allowed: HashSet<&'a str>,
    cited: Vec<String>,
}

impl<'a> Citations<'a> {
    fn new(result: &'a RetrievalResult) -> Self {
        Self {
            allowed: result.hits.iter().map(|h| h.chunk.id.as_str()).collect(),
            cited: Vec::new(),
        }
    }

    fn none() -> Self {
        Self {
            allowed: HashSet::new(),
            cited: Vec::new(),
        }
    }

    fn cite(&mut self, chunk: &Chunk) {
        if self.allowed.contains(chunk.id.as_str()) && !self.cited.contains(&chunk.id) {
            self.cited.push(chunk.id.clone());
        }
    }

    fn into_ids(self) -> Vec<String> {
        self.cited
    }
}

/// Renders answers from classified questions and their evidence
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    config: AnswerConfig,
}

impl Assembler {
    pub fn new(config: AnswerConfig) -> Self {
        Self { config }
    }

    pub fn assemble(
        &self,
        question: &str,
        classification: &Classification,
        evidence: Evidence<'_>,
    ) -> Answer {
        let intent = classification.intent;
        let (markdown, citations) = match evidence {
            Evidence::Statistics(stats) => (
                self.statistics(stats, classification.count_target),
                Citations::none(),
            ),
            Evidence::Retrieved(result) if result.is_empty() => {
                tracing::debug!(intent = %intent, "empty retrieval, answering not found");
                (not_found(question, classification), Citations::none())
            }
            Evidence::Retrieved(result) => {
                let mut citations = Citations::new(result);
                let markdown = match intent {
                    Intent::Purpose => self.purpose(result, &mut citations),
                    Intent::Implementation => self.implementation(result, &mut citations),
                    Intent::MethodUsage => match classification.member_listing() {
                        Some(class) => {
                            self.class_methods(result, &class.qualified_name, &mut citations)
                        }
                        None => self.method_usage(result, classification, &mut citations),
                    },
                    Intent::Generic | Intent::StatCount => self.generic(result, &mut citations),
                };
                (markdown, citations)
            }
        };

        Answer {
            markdown: markdown.trim_end().to_string(),
            cited: citations.into_ids(),
            intent,
        }
    }

    fn statistics(&self, stats: &RepositoryStats, target: Option<CountTarget>) -> String {
        let mut out = String::from("## Code Statistics\n\n");

        match target {
            Some(target) => {
                let n = stats.get(target);
                let noun = if n == 1 { singular(target) } else { target.label() };
                let verb = if n == 1 { "is" } else { "are" };
                let _ = writeln!(out, "There {verb} **{n}** {noun} in the indexed repository.\n");
            }
            None => out.push_str("Summary of the indexed repository:\n\n"),
        }

        let _ = writeln!(out, "- Files: {}", stats.files);
        let _ = writeln!(out, "- Modules: {}", stats.modules);
        let _ = writeln!(out, "- Classes: {}", stats.classes);
        let _ = writeln!(out, "- Methods: {}", stats.methods);
        let _ = writeln!(out, "- Functions: {}", stats.functions);
        let _ = writeln!(
            out,
            "- Average methods per class: {:.2}",
            stats.avg_methods_per_class()
        );

        out.push_str("\n### Size\n\n");
        let _ = writeln!(out, "- Total lines: {}", stats.total_lines);
        let _ = writeln!(out, "- Code lines: {}", stats.code_lines());
        let _ = writeln!(out, "- Comment lines: {}", stats.comment_lines);
        let _ = writeln!(out, "- Blank lines: {}", stats.blank_lines);

        if stats.degraded_files > 0 {
            let _ = writeln!(
                out,
                "\n*{} file(s) could not be parsed and are counted as raw text only.*",
                stats.degraded_files
            );
        }
        out
    }

    fn purpose(&self, result: &RetrievalResult, citations: &mut Citations<'_>) -> String {
        let primary = &result.hits[0].chunk;
        let mut out = format!("## {}\n\n", primary.qualified_name);
        citations.cite(primary);

        match &primary.docstring {
            Some(doc) => {
                let _ = writeln!(out, "{doc}\n");
            }
            None => {
                let _ = writeln!(
                    out,
                    "`{}` is a {} without a docstring.\n",
                    primary.qualified_name, primary.kind
                );
            }
        }

        let methods: Vec<&Hit> = result
            .hits
            .iter()
            .filter(|h| {
                h.chunk.kind == ChunkKind::Method
                    && h.chunk.parent_id.as_deref() == Some(primary.id.as_str())
            })
            .collect();
        if !methods.is_empty() {
            out.push_str("### Key methods\n\n");
            for hit in &methods {
                out.push_str(&list_entry(&hit.chunk));
                citations.cite(&hit.chunk);
            }
            out.push('\n');
        }

        let _ = writeln!(out, "### Definition\n\n{}\n", self.excerpt(primary));

        let related: Vec<&Hit> = result
            .hits
            .iter()
            .skip(1)
            .filter(|h| !methods.iter().any(|m| m.chunk.id == h.chunk.id))
            .collect();
        if !related.is_empty() {
            out.push_str("### Related code\n\n");
            for hit in related {
                out.push_str(&list_entry(&hit.chunk));
                citations.cite(&hit.chunk);
            }
        }
        out
    }

    fn implementation(&self, result: &RetrievalResult, citations: &mut Citations<'_>) -> String {
        let primary = &result.hits[0].chunk;
        let mut out = format!("## Implementation of `{}`\n\n", primary.qualified_name);
        citations.cite(primary);

        if let Some(doc) = &primary.docstring {
            let _ = writeln!(out, "{doc}\n");
        }
        let _ = writeln!(out, "{}\n", self.excerpt(primary));

        if let Some(class) = owning_class(primary) {
            let _ = writeln!(out, "This is a method of the `{class}` class.\n");
        }

        let others = &result.hits[1..];
        if !others.is_empty() {
            out.push_str("### Other relevant definitions\n\n");
            for hit in others {
                let _ = writeln!(
                    out,
                    "#### {} `{}`\n\n{}\n",
                    capitalize(hit.chunk.kind.as_str()),
                    hit.chunk.qualified_name,
                    self.excerpt(&hit.chunk)
                );
                citations.cite(&hit.chunk);
            }
        }
        out
    }

    fn method_usage(
        &self,
        result: &RetrievalResult,
        classification: &Classification,
        citations: &mut Citations<'_>,
    ) -> String {
        let primary = result
            .hits
            .iter()
            .map(|h| &h.chunk)
            .find(|c| matches!(c.kind, ChunkKind::Method | ChunkKind::Function))
            .unwrap_or(&result.hits[0].chunk);
        citations.cite(primary);

        let mut out = String::new();
        match classification.parameter.as_deref() {
            Some(param) => {
                let _ = writeln!(
                    out,
                    "## Parameter `{param}` in `{}`\n",
                    primary.qualified_name
                );
                if let Some(description) = primary
                    .docstring
                    .as_deref()
                    .and_then(|doc| parameter_description(doc, param))
                {
                    let _ = writeln!(out, "**Parameter description:** {description}\n");
                }
                let _ = writeln!(out, "### Definition\n\n{}\n", self.excerpt(primary));

                let snippets = usage_snippets(primary, param);
                if snippets.is_empty() {
                    let _ = writeln!(
                        out,
                        "`{param}` does not appear in the body of `{}`.",
                        primary.qualified_name
                    );
                } else {
                    out.push_str("### Parameter usage\n\n");
                    for snippet in snippets {
                        let _ = writeln!(
                            out,
                            "`{}` (lines {}-{})\n\n{}\n",
                            primary.file_path,
                            snippet.start_line,
                            snippet.end_line,
                            code_block(&snippet.text)
                        );
                    }
                }
            }
            None => {
                let _ = writeln!(
                    out,
                    "## {} `{}`\n",
                    capitalize(primary.kind.as_str()),
                    primary.qualified_name
                );
                if !primary.signature.is_empty() {
                    let _ = writeln!(out, "**Signature:** `{}`\n", primary.signature);
                }
                if let Some(doc) = &primary.docstring {
                    let _ = writeln!(out, "{doc}\n");
                }
                let _ = writeln!(out, "{}\n", self.excerpt(primary));
            }
        }

        if let Some(class) = owning_class(primary) {
            let _ = writeln!(out, "This is a method of the `{class}` class.\n");
        }
        out
    }

    fn class_methods(
        &self,
        result: &RetrievalResult,
        class_name: &str,
        citations: &mut Citations<'_>,
    ) -> String {
        let Some(class) = result
            .hits
            .iter()
            .map(|h| &h.chunk)
            .find(|c| c.kind == ChunkKind::Class && c.qualified_name == class_name)
        else {
            return self.generic(result, citations);
        };
        citations.cite(class);

        let mut out = format!("## Methods of `{}`\n\n", class.qualified_name);
        if let Some(doc) = &class.docstring {
            let _ = writeln!(out, "**Class purpose:** {}\n", excerpt::summary_line(doc));
        }

        let methods: Vec<&Chunk> = result
            .hits
            .iter()
            .map(|h| &h.chunk)
            .filter(|c| {
                c.kind == ChunkKind::Method && c.parent_id.as_deref() == Some(class.id.as_str())
            })
            .collect();
        if methods.is_empty() {
            let _ = writeln!(
                out,
                "`{}` defines no methods. {}",
                class.short_name(),
                citation(class)
            );
            return out;
        }

        let _ = writeln!(
            out,
            "The `{}` class has the following methods:\n",
            class.short_name()
        );
        for method in methods {
            citations.cite(method);
            let _ = writeln!(out, "### `{}`\n", method.short_name());
            if let Some(doc) = &method.docstring {
                let _ = writeln!(out, "{}\n", excerpt::summary_line(doc));
            }
            let _ = writeln!(out, "{}\n", self.excerpt(method));
        }
        out
    }

    fn generic(&self, result: &RetrievalResult, citations: &mut Citations<'_>) -> String {
        let mut out =
            String::from("I found the following code that might help answer your question:\n\n");

        for (i, hit) in result
            .hits
            .iter()
            .take(self.config.generic_max_hits)
            .enumerate()
        {
            let chunk = &hit.chunk;
            citations.cite(chunk);
            let _ = writeln!(
                out,
                "## {}. {}: `{}`\n",
                i + 1,
                capitalize(chunk.kind.as_str()),
                chunk.short_name()
            );
            if let Some(class) = owning_class(chunk) {
                let _ = writeln!(out, "From class `{class}`\n");
            }
            let _ = writeln!(out, "File: {}\n", citation(chunk));
            if let Some(doc) = &chunk.docstring {
                let _ = writeln!(out, "**Description:** {}\n", excerpt::summary_line(doc));
            }
            let _ = writeln!(out, "{}\n", self.excerpt(chunk));
        }
        out
    }

    fn excerpt(&self, chunk: &Chunk) -> String {
        excerpt::render(chunk, &self.config)
    }
}

fn not_found(question: &str, classification: &Classification) -> String {
    let mut out = format!("{NOT_FOUND}\n\n");
    let _ = writeln!(out, "> {}\n", question.trim());
    if classification.entities.is_empty() {
        out.push_str(
            "The question does not name any indexed symbol, \
             and no indexed code is similar enough to it. \
             Try naming a class, function or method from the repository.",
        );
    } else {
        let names: Vec<String> = classification
            .entities
            .iter()
            .map(|e| format!("`{}`", e.qualified_name))
            .collect();
        let _ = write!(
            out,
            "No indexed code matched {} closely enough to answer.",
            names.join(", ")
        );
    }
    out
}

/// `- `name` (kind): summary. citation`
fn list_entry(chunk: &Chunk) -> String {
    let summary = chunk
        .docstring
        .as_deref()
        .map(excerpt::summary_line)
        .filter(|s| !s.is_empty());
    match summary {
        Some(summary) => format!(
            "- `{}` ({}): {} {}\n",
            chunk.short_name(),
            chunk.kind,
            summary,
            citation(chunk)
        ),
        None => format!(
            "- `{}` ({}) {}\n",
            chunk.short_name(),
            chunk.kind,
            citation(chunk)
        ),
    }
}

/// Class part of a method's qualified name
fn owning_class(chunk: &Chunk) -> Option<&str> {
    if chunk.kind != ChunkKind::Method {
        return None;
    }
    chunk
        .qualified_name
        .rsplit_once('.')
        .map(|(class, _)| class.rsplit('.').next().unwrap_or(class))
}

fn singular(target: CountTarget) -> &'static str {
    match target {
        CountTarget::Kind(kind) => kind.as_str(),
        CountTarget::Files => "file",
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
