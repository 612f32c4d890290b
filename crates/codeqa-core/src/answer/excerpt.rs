//! Code excerpt rendering
//!
//! Excerpts reproduce `source_text` verbatim inside fenced blocks. Long
//! excerpts show a preview followed by an expandable block holding the
//! complete text.

use crate::config::AnswerConfig;
use crate::extract::Chunk;
use regex::Regex;

/// `` `path` (lines a-b) ``
pub fn citation(chunk: &Chunk) -> String {
    format!(
        "`{}` (lines {}-{})",
        chunk.file_path, chunk.start_line, chunk.end_line
    )
}

/// Fenced python block that cannot be closed early by backticks in `text`
pub fn code_block(text: &str) -> String {
    let longest_run = text
        .split(|c: char| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run.max(2) + 1);
    format!("{fence}python\n{text}\n{fence}")
}

/// Cited, verbatim excerpt of a chunk
pub fn render(chunk: &Chunk, config: &AnswerConfig) -> String {
    let lines: Vec<&str> = chunk.source_text.lines().collect();
    let mut out = format!("{}\n\n", citation(chunk));

    if lines.len() <= config.excerpt_max_lines {
        out.push_str(&code_block(&chunk.source_text));
        return out;
    }

    let shown = config.preview_lines.min(lines.len());
    out.push_str(&code_block(&lines[..shown].join("\n")));
    out.push_str(&format!(
        "\n\n*({} more lines not shown)*\n\n\
         <details>\n<summary>Show full code</summary>\n\n{}\n\n</details>",
        lines.len() - shown,
        code_block(&chunk.source_text)
    ));
    out
}

/// A line of a chunk mentioning a name, with one line of context each side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageSnippet {
    /// 1-indexed file line of the first snippet line
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
}

/// Lines of `chunk` where `name` occurs as a whole word, with context.
/// Overlapping context windows are merged.
pub fn usage_snippets(chunk: &Chunk, name: &str) -> Vec<UsageSnippet> {
    let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
        return Vec::new();
    };
    let lines: Vec<&str> = chunk.source_text.lines().collect();

    let mut windows: Vec<(usize, usize)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !pattern.is_match(line) {
            continue;
        }
        let start = i.saturating_sub(1);
        let end = (i + 2).min(lines.len());
        match windows.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }

    windows
        .into_iter()
        .map(|(start, end)| UsageSnippet {
            start_line: chunk.start_line + start,
            end_line: chunk.start_line + end - 1,
            text: lines[start..end].join("\n"),
        })
        .collect()
}

/// Description of a parameter from a Sphinx or Google style docstring
pub fn parameter_description(docstring: &str, name: &str) -> Option<String> {
    let escaped = regex::escape(name);
    let patterns = [
        format!(r"(?m)^[ \t]*[:@]param\s+(?:[\w\[\], ]+\s+)?{escaped}\b\s*:?\s*(.+)$"),
        format!(r"(?m)^[ \t]*{escaped}\b\s*(?:\([^)]*\))?\s*:\s*(.+)$"),
    ];

    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .find_map(|re| {
            re.captures(docstring)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|d| !d.is_empty())
}

/// First line of a docstring
pub fn summary_line(docstring: &str) -> &str {
    docstring.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{compute_chunk_id, ChunkKind};

    fn chunk(source: &str, start_line: usize) -> Chunk {
        Chunk {
            id: compute_chunk_id("svc.py", ChunkKind::Function, "f", start_line),
            kind: ChunkKind::Function,
            qualified_name: "f".to_string(),
            file_path: "svc.py".to_string(),
            start_line,
            end_line: start_line + source.lines().count() - 1,
            signature: String::new(),
            docstring: None,
            source_text: source.to_string(),
            parent_id: None,
            degraded: false,
        }
    }

    #[test]
    fn test_short_excerpt_is_verbatim() {
        let c = chunk("def f():\n    return  1", 4);
        let out = render(&c, &AnswerConfig::default());
        assert!(out.starts_with("`svc.py` (lines 4-5)"));
        assert!(out.contains("```python\ndef f():\n    return  1\n```"));
        assert!(!out.contains("<details>"));
    }

    #[test]
    fn test_long_excerpt_has_full_text_block() {
        let source: String = (0..30).map(|i| format!("x{i} = {i}\n")).collect();
        let source = source.trim_end().to_string();
        let c = chunk(&source, 1);
        let out = render(&c, &AnswerConfig::default());

        assert!(out.contains("*(20 more lines not shown)*"));
        assert!(out.contains("<summary>Show full code</summary>"));
        let details = &out[out.find("<details>").unwrap()..];
        assert!(details.contains(&source));
        let preview = &out[..out.find("<details>").unwrap()];
        assert!(preview.contains("x9 = 9"));
        assert!(!preview.contains("x10 = 10"));
    }

    #[test]
    fn test_fence_survives_backticks() {
        let block = code_block("s = '```'");
        assert!(block.starts_with("````python\n"));
        assert!(block.ends_with("\n````"));
    }

    #[test]
    fn test_usage_snippets_merge_context() {
        let source = concat!(
            "def f(user_id):\n",
            "    a = 1\n",
            "    b = user_id\n",
            "    c = user_id + 1\n",
            "    d = 2\n",
            "    e = 3\n",
            "    return e",
        );
        let snippets = usage_snippets(&chunk(source, 10), "user_id");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].start_line, 10);
        assert_eq!(snippets[0].end_line, 14);
        assert!(!usage_snippets(&chunk(source, 10), "user")
            .iter()
            .any(|s| s.text.contains("def f")));
    }

    #[test]
    fn test_parameter_description_styles() {
        let google = "Fetch a user.\n\nArgs:\n    user_id (int): Primary key of the user.\n";
        assert_eq!(
            parameter_description(google, "user_id").as_deref(),
            Some("Primary key of the user.")
        );
        let sphinx = "Fetch a user.\n\n:param user_id: Primary key.\n:returns: The user.";
        assert_eq!(parameter_description(sphinx, "user_id").as_deref(), Some("Primary key."));
        assert!(parameter_description(sphinx, "timeout").is_none());
    }
}
