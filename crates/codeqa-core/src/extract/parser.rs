//! Tree-sitter parser wrapper

use crate::error::{Error, Result};
use tree_sitter::{Language as TsLanguage, Parser, Tree};

/// File extensions handled by the Python grammar
pub const PYTHON_EXTENSIONS: &[&str] = &["py", "pyi"];

/// Parse Python source into a tree-sitter AST.
///
/// Tree-sitter recovers from syntax errors, so a returned tree may still
/// contain `ERROR` nodes; callers check `root_node().has_error()`.
pub fn parse(source: &str, path: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    let language: TsLanguage = tree_sitter_python::LANGUAGE.into();
    parser.set_language(&language).map_err(|e| Error::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    parser.parse(source, None).ok_or_else(|| Error::Parse {
        path: path.to_string(),
        message: "parser returned no tree".to_string(),
    })
}

pub fn is_supported(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| PYTHON_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
