//! Query router
//!
//! Finds indexed symbols mentioned in a question and classifies the
//! question's intent with an ordered rule table. Rules are evaluated over
//! the normalized question with symbol mentions masked, so a symbol named
//! `count_lines` never turns a question into a statistics request.

pub mod normalize;

pub use normalize::{normalize_identifier, normalize_question, split_words};

use crate::extract::{Chunk, ChunkKind};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest normalized name (letters and digits) considered an entity
pub const MIN_ENTITY_CHARS: usize = 3;

/// Word substituted for a matched symbol before intent rules run
const SYMBOL_PLACEHOLDER: &str = "symbol";

/// Category of a question, deciding how it is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    StatCount,
    Purpose,
    Implementation,
    MethodUsage,
    Generic,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatCount => "STAT_COUNT",
            Self::Purpose => "PURPOSE",
            Self::Implementation => "IMPLEMENTATION",
            Self::MethodUsage => "METHOD_USAGE",
            Self::Generic => "GENERIC",
        }
    }

    /// Whether the intent is resolved by retrieval rather than aggregation
    pub fn uses_retrieval(&self) -> bool {
        !matches!(self, Self::StatCount)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a statistics question asks to count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountTarget {
    Kind(ChunkKind),
    Files,
}

impl CountTarget {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Kind(kind) => kind.plural(),
            Self::Files => "files",
        }
    }
}

/// A symbol mentioned in the question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub qualified_name: String,
    pub kind: ChunkKind,
    /// Word offset of the mention in the normalized question
    pub position: usize,
    /// Words covered by the mention
    pub span: usize,
}

/// Router output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub entities: Vec<Entity>,
    pub normalized_question: String,
    pub count_target: Option<CountTarget>,
    pub parameter: Option<String>,
}

impl Classification {
    /// Class whose methods are asked for, as in "what methods does X have"
    pub fn member_listing(&self) -> Option<&Entity> {
        let asks_members = self
            .normalized_question
            .split(' ')
            .any(|w| w == "methods" || w == "functions");
        if self.intent != Intent::MethodUsage || self.parameter.is_some() || !asks_members {
            return None;
        }
        self.entities.first().filter(|e| e.kind == ChunkKind::Class)
    }
}

/// Intent rules, highest priority first
const RULE_PATTERNS: &[(&str, Intent)] = &[
    (
        concat!(
            r"\b(how many|number of|count|counts|statistics|stats|tally)\b",
            r"|\b(code|repository|repo|codebase) (metrics|overview|summary)\b",
        ),
        Intent::StatCount,
    ),
    (
        concat!(
            r"\b(methods?|parameters?|params?|arguments?|args)\b",
            r"|\bfunctions (does|do) (the )?(class )?symbol have\b",
        ),
        Intent::MethodUsage,
    ),
    (
        r"\bimplement(ed|s|ation)?\b|\bhow (does|do|is|are)\b.*\bworks?\b|\bshow me how\b",
        Intent::Implementation,
    ),
    (
        concat!(
            r"\bwhat (does|do)\b.*\bdo\b|\bpurpose\b|\bexplain\b|\bused for\b",
            r"|\brole of\b|\bresponsible\b|\bwhat is\b|\bdescribe\b",
        ),
        Intent::Purpose,
    ),
];

lazy_static! {
    static ref RULES: Vec<(Regex, Intent)> = RULE_PATTERNS
        .iter()
        .map(|(pattern, intent)| (Regex::new(pattern).unwrap(), *intent))
        .collect();
    static ref COUNT_TARGET_RE: Regex =
        Regex::new(r"\b(functions?|methods?|class|classes|modules?|files?)\b").unwrap();
    static ref PARAM_AFTER_RE: Regex = Regex::new(concat!(
        r"(?i)\b(?:parameter|argument|param|arg)s?\s+",
        r"(?:named\s+|called\s+)?`?([A-Za-z_][A-Za-z0-9_]*)`?",
    ))
    .unwrap();
    static ref PARAM_BEFORE_RE: Regex =
        Regex::new(r"(?i)`?([A-Za-z_][A-Za-z0-9_]*)`?\s+(?:parameter|argument|param|arg)\b")
            .unwrap();
}

/// Words that can sit next to "parameter" without naming one
const NOT_PARAMETER_NAMES: &[&str] = &[
    "a", "an", "the", "of", "in", "is", "does", "do", "for", "to", "and", "or", "what", "which",
    "this", "that", "its", "each", "every", "any", "all", "used", "usage", "passed", "take",
    "takes",
];

/// Classify a question against the chunks of an index
pub fn classify(question: &str, chunks: &[Chunk]) -> Classification {
    let words = split_words(question);
    let entities = extract_entities(question, chunks);
    let masked = mask_entities(&words, &entities);

    let intent = RULES
        .iter()
        .find(|(re, _)| re.is_match(&masked))
        .map(|(_, intent)| *intent)
        .unwrap_or(Intent::Generic);

    let count_target = match intent {
        Intent::StatCount => count_target(&masked),
        _ => None,
    };
    let parameter = match intent {
        Intent::MethodUsage => parameter_name(question, &entities),
        _ => None,
    };

    tracing::debug!(
        %intent,
        entities = entities.len(),
        ?count_target,
        "classified question"
    );

    Classification {
        intent,
        entities,
        normalized_question: words.join(" "),
        count_target,
        parameter,
    }
}

struct Candidate<'c> {
    chunk: &'c Chunk,
    start: usize,
    span: usize,
}

/// Normalized words of a question with the index of the raw token each
/// word came from. Raw tokens are identifiers, possibly dotted.
fn question_words(question: &str) -> (Vec<String>, Vec<usize>) {
    let mut words = Vec::new();
    let mut tokens = Vec::new();
    let raw = question
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
        .filter(|t| !t.is_empty());
    for (token, text) in raw.enumerate() {
        for word in split_words(text) {
            words.push(word);
            tokens.push(token);
        }
    }
    (words, tokens)
}

/// Match chunk names against the question.
///
/// Classes, methods and functions match on their short name or their full
/// qualified name. Modules match on a dotted path of two or more segments,
/// or on a single segment when the question says "module".
/// A mention must cover whole identifiers of the question, so `user` does
/// not match inside `user_id`. Overlapping mentions keep the longest span.
pub fn extract_entities(question: &str, chunks: &[Chunk]) -> Vec<Entity> {
    let (question_words, tokens) = question_words(question);
    let covers_whole_tokens = |start: usize, end: usize| {
        (start == 0 || tokens[start - 1] != tokens[start])
            && (end == tokens.len() || tokens[end] != tokens[end - 1])
    };
    let mentions_module = question_words.iter().any(|w| w == "module");
    let mut candidates: Vec<Candidate<'_>> = Vec::new();

    for chunk in chunks.iter().filter(|c| !c.degraded) {
        let mut names: Vec<Vec<String>> = Vec::with_capacity(2);
        match chunk.kind {
            ChunkKind::Module => {
                if mentions_module || chunk.qualified_name.contains('.') {
                    names.push(split_words(&chunk.qualified_name));
                }
            }
            _ => {
                names.push(split_words(chunk.short_name()));
                if chunk.qualified_name.contains('.') {
                    names.push(split_words(&chunk.qualified_name));
                }
            }
        }

        for name in names {
            let chars: usize = name.iter().map(|w| w.chars().count()).sum();
            if name.is_empty() || chars < MIN_ENTITY_CHARS || name.len() > question_words.len() {
                continue;
            }
            for start in 0..=question_words.len() - name.len() {
                let end = start + name.len();
                if question_words[start..end] == name[..] && covers_whole_tokens(start, end) {
                    candidates.push(Candidate {
                        chunk,
                        start,
                        span: name.len(),
                    });
                }
            }
        }
    }

    // Longest spans claim their words first; identical spans coexist.
    candidates.sort_by(|a, b| b.span.cmp(&a.span).then(a.start.cmp(&b.start)));
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut accepted: Vec<Candidate<'_>> = Vec::new();
    for candidate in candidates {
        let range = (candidate.start, candidate.start + candidate.span);
        let conflicts = claimed
            .iter()
            .any(|&(s, e)| range != (s, e) && range.0 < e && s < range.1);
        if conflicts {
            continue;
        }
        if !claimed.contains(&range) {
            claimed.push(range);
        }
        accepted.push(candidate);
    }

    accepted.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
            .then(a.chunk.start_line.cmp(&b.chunk.start_line))
            .then(a.chunk.kind.cmp(&b.chunk.kind))
    });

    let mut entities: Vec<Entity> = Vec::new();
    for candidate in accepted {
        if entities
            .iter()
            .any(|e| e.qualified_name == candidate.chunk.qualified_name)
        {
            continue;
        }
        entities.push(Entity {
            qualified_name: candidate.chunk.qualified_name.clone(),
            kind: candidate.chunk.kind,
            position: candidate.start,
            span: candidate.span,
        });
    }
    entities
}

fn mask_entities(words: &[String], entities: &[Entity]) -> String {
    let mut masked: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        match entities.iter().find(|e| e.position == i) {
            Some(entity) => {
                masked.push(SYMBOL_PLACEHOLDER);
                i += entity.span.max(1);
            }
            None => {
                masked.push(&words[i]);
                i += 1;
            }
        }
    }
    masked.join(" ")
}

fn count_target(masked: &str) -> Option<CountTarget> {
    let word = COUNT_TARGET_RE.captures(masked)?.get(1)?.as_str();
    let target = match word {
        "function" | "functions" => CountTarget::Kind(ChunkKind::Function),
        "method" | "methods" => CountTarget::Kind(ChunkKind::Method),
        "class" | "classes" => CountTarget::Kind(ChunkKind::Class),
        "module" | "modules" => CountTarget::Kind(ChunkKind::Module),
        _ => CountTarget::Files,
    };
    Some(target)
}

fn parameter_name(question: &str, entities: &[Entity]) -> Option<String> {
    let is_entity = |name: &str| {
        let normalized = normalize_identifier(name);
        entities.iter().any(|e| {
            let short = e.qualified_name.rsplit('.').next().unwrap_or("");
            normalize_identifier(short) == normalized
        })
    };
    let is_filler = |name: &str| NOT_PARAMETER_NAMES.contains(&name.to_lowercase().as_str());

    [&*PARAM_AFTER_RE, &*PARAM_BEFORE_RE]
        .into_iter()
        .flat_map(|re| re.captures_iter(question))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .find(|name| !is_filler(name) && !is_entity(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::compute_chunk_id;

    fn chunk(kind: ChunkKind, qualified_name: &str, file_path: &str, line: usize) -> Chunk {
        Chunk {
            id: compute_chunk_id(file_path, kind, qualified_name, line),
            kind,
            qualified_name: qualified_name.to_string(),
            file_path: file_path.to_string(),
            start_line: line,
            end_line: line + 2,
            signature: String::new(),
            docstring: None,
            source_text: String::new(),
            parent_id: None,
            degraded: false,
        }
    }

    fn index() -> Vec<Chunk> {
        vec![
            chunk(ChunkKind::Module, "app.services", "app/services.py", 1),
            chunk(ChunkKind::Class, "UserService", "app/services.py", 3),
            chunk(ChunkKind::Method, "UserService.get_user", "app/services.py", 5),
            chunk(ChunkKind::Method, "AdminService.get_user", "app/admin.py", 8),
            chunk(ChunkKind::Function, "count_lines", "app/util.py", 1),
            chunk(ChunkKind::Class, "User", "app/models.py", 1),
            chunk(ChunkKind::Function, "id", "app/util.py", 9),
        ]
    }

    #[test]
    fn test_rule_table_compiles() {
        assert_eq!(RULES.len(), RULE_PATTERNS.len());
        assert!(COUNT_TARGET_RE.is_match("functions"));
        assert!(PARAM_AFTER_RE.is_match("parameter user_id"));
        assert!(PARAM_BEFORE_RE.is_match("user_id parameter"));
    }

    #[test]
    fn test_name_conventions_resolve_same_entity() {
        for question in [
            "What does UserService do?",
            "What does user_service do?",
            "What does userService do?",
        ] {
            let c = classify(question, &index());
            let names: Vec<&str> = c.entities.iter().map(|e| e.qualified_name.as_str()).collect();
            assert_eq!(names, vec!["UserService"], "{question}");
            assert_eq!(c.intent, Intent::Purpose);
        }
    }

    #[test]
    fn test_longest_span_wins() {
        let c = classify("Explain the UserService class", &index());
        assert!(c.entities.iter().all(|e| e.qualified_name != "User"));
    }

    #[test]
    fn test_short_name_matches_all_definitions_in_order() {
        let c = classify("How is get_user implemented?", &index());
        let names: Vec<&str> = c.entities.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(names, vec!["AdminService.get_user", "UserService.get_user"]);
        assert_eq!(c.intent, Intent::Implementation);
    }

    #[test]
    fn test_short_names_ignored() {
        let c = classify("What is the id of a user?", &index());
        assert!(c.entities.iter().all(|e| e.qualified_name != "id"));
    }

    #[test]
    fn test_statistics_take_priority() {
        let c = classify("How many methods are there?", &index());
        assert_eq!(c.intent, Intent::StatCount);
        assert_eq!(c.count_target, Some(CountTarget::Kind(ChunkKind::Method)));

        let c = classify("Count the number of classes and explain them", &index());
        assert_eq!(c.intent, Intent::StatCount);
        assert_eq!(c.count_target, Some(CountTarget::Kind(ChunkKind::Class)));

        let c = classify("How many files does the repo have?", &index());
        assert_eq!(c.count_target, Some(CountTarget::Files));
    }

    #[test]
    fn test_entity_names_do_not_trigger_rules() {
        let c = classify("What does count_lines do?", &index());
        assert_eq!(c.intent, Intent::Purpose);
        assert_eq!(c.entities[0].qualified_name, "count_lines");
    }

    #[test]
    fn test_method_usage_and_parameter() {
        let c = classify("How does get_user use the parameter user_id?", &index());
        assert_eq!(c.intent, Intent::MethodUsage);
        assert_eq!(c.parameter.as_deref(), Some("user_id"));
        assert!(c.entities.iter().all(|e| e.qualified_name != "User"));

        let c = classify("What is the `timeout` argument of get_user for?", &index());
        assert_eq!(c.intent, Intent::MethodUsage);
        assert_eq!(c.parameter.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_generic_without_entities() {
        let c = classify("Where are database connections opened?", &index());
        assert_eq!(c.intent, Intent::Generic);
        assert!(c.entities.is_empty());
    }

    #[test]
    fn test_module_matches_dotted_path() {
        let c = classify("What is in app.services?", &index());
        assert_eq!(c.entities[0].qualified_name, "app.services");
    }

    #[test]
    fn test_single_segment_module_needs_module_word() {
        let mut chunks = index();
        chunks.push(chunk(ChunkKind::Module, "utils", "utils.py", 1));

        let c = classify("What does the utils module do?", &chunks);
        assert_eq!(c.intent, Intent::Purpose);
        assert_eq!(c.entities.len(), 1);
        assert_eq!(c.entities[0].qualified_name, "utils");
        assert_eq!(c.entities[0].kind, ChunkKind::Module);

        let c = classify("Where are the utils?", &chunks);
        assert!(c.entities.is_empty());
    }

    #[test]
    fn test_member_listing() {
        for question in [
            "What methods does UserService have?",
            "What functions does the class UserService have?",
        ] {
            let c = classify(question, &index());
            assert_eq!(c.intent, Intent::MethodUsage, "{question}");
            let class = c.member_listing().unwrap();
            assert_eq!(class.qualified_name, "UserService");
        }

        let c = classify("What arguments does get_user take?", &index());
        assert!(c.member_listing().is_none());
    }
}
