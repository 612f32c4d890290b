//! Python chunk extraction
//!
//! Tree-sitter nodes are first classified into [`SyntaxNode`], then handled by
//! one exhaustive match: every node is either a module, a class, a function,
//! a method, or something we only descend through.

use super::types::{compute_chunk_id, Chunk, ChunkKind};
use tree_sitter::Node;

/// Node kinds relevant to extraction
#[derive(Debug, Clone, Copy)]
pub enum SyntaxNode<'t> {
    Module(Node<'t>),
    /// `outer` includes decorators, `def` is the definition itself
    ClassDef { outer: Node<'t>, def: Node<'t> },
    FunctionDef { outer: Node<'t>, def: Node<'t> },
    MethodDef { outer: Node<'t>, def: Node<'t> },
    Other(Node<'t>),
}

impl<'t> SyntaxNode<'t> {
    pub fn classify(node: Node<'t>, in_class: bool) -> Self {
        let (outer, def) = match node.kind() {
            "module" => return Self::Module(node),
            "decorated_definition" => match node.child_by_field_name("definition") {
                Some(inner) => (node, inner),
                None => return Self::Other(node),
            },
            _ => (node, node),
        };

        match def.kind() {
            "class_definition" => Self::ClassDef { outer, def },
            "function_definition" if in_class => Self::MethodDef { outer, def },
            "function_definition" => Self::FunctionDef { outer, def },
            _ => Self::Other(node),
        }
    }
}

/// Enclosing class while walking a class body
#[derive(Clone)]
struct ClassScope {
    qualified_name: String,
    id: String,
}

/// Walks one parsed file and collects its chunks
pub(crate) struct PythonExtractor<'s> {
    source: &'s str,
    file_path: &'s str,
    module_name: String,
    chunks: Vec<Chunk>,
}

impl<'s> PythonExtractor<'s> {
    pub(crate) fn new(source: &'s str, file_path: &'s str) -> Self {
        Self {
            source,
            file_path,
            module_name: module_name_for_path(file_path),
            chunks: Vec::new(),
        }
    }

    pub(crate) fn extract(mut self, root: Node<'_>) -> Vec<Chunk> {
        self.visit(root, None);
        self.chunks
    }

    fn visit(&mut self, node: Node<'_>, scope: Option<&ClassScope>) {
        match SyntaxNode::classify(node, scope.is_some()) {
            SyntaxNode::Module(module) => {
                self.push_module(module);
                self.visit_children(module, None);
            }
            SyntaxNode::ClassDef { outer, def } => {
                let class_scope = self.push_class(outer, def, scope);
                if let Some(body) = def.child_by_field_name("body") {
                    self.visit_children(body, Some(&class_scope));
                }
            }
            SyntaxNode::FunctionDef { outer, def } => {
                self.push_callable(outer, def, ChunkKind::Function, None);
            }
            SyntaxNode::MethodDef { outer, def } => {
                self.push_callable(outer, def, ChunkKind::Method, scope);
            }
            SyntaxNode::Other(other) => self.visit_children(other, scope),
        }
    }

    fn visit_children(&mut self, node: Node<'_>, scope: Option<&ClassScope>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, scope);
        }
    }

    fn push_module(&mut self, module: Node<'_>) {
        let end_line = self.source.lines().count().max(1);
        let docstring = first_docstring(self.source, module);
        self.chunks.push(Chunk {
            id: compute_chunk_id(self.file_path, ChunkKind::Module, &self.module_name, 1),
            kind: ChunkKind::Module,
            qualified_name: self.module_name.clone(),
            file_path: self.file_path.to_string(),
            start_line: 1,
            end_line,
            signature: String::new(),
            docstring,
            source_text: self.source.to_string(),
            parent_id: None,
            degraded: false,
        });
    }

    fn push_class(
        &mut self,
        outer: Node<'_>,
        def: Node<'_>,
        scope: Option<&ClassScope>,
    ) -> ClassScope {
        let name = self.name_of(def);
        let qualified_name = match scope {
            Some(parent) => format!("{}.{}", parent.qualified_name, name),
            None => name,
        };
        let chunk = self.make_chunk(outer, def, ChunkKind::Class, qualified_name, scope);
        let class_scope = ClassScope {
            qualified_name: chunk.qualified_name.clone(),
            id: chunk.id.clone(),
        };
        self.chunks.push(chunk);
        class_scope
    }

    fn push_callable(
        &mut self,
        outer: Node<'_>,
        def: Node<'_>,
        kind: ChunkKind,
        scope: Option<&ClassScope>,
    ) {
        let name = self.name_of(def);
        let qualified_name = match scope {
            Some(class) => format!("{}.{}", class.qualified_name, name),
            None => name,
        };
        let chunk = self.make_chunk(outer, def, kind, qualified_name, scope);
        self.chunks.push(chunk);
    }

    fn make_chunk(
        &self,
        outer: Node<'_>,
        def: Node<'_>,
        kind: ChunkKind,
        qualified_name: String,
        scope: Option<&ClassScope>,
    ) -> Chunk {
        let start_line = outer.start_position().row + 1;
        let end_line = outer.end_position().row + 1;
        Chunk {
            id: compute_chunk_id(self.file_path, kind, &qualified_name, start_line),
            kind,
            qualified_name,
            file_path: self.file_path.to_string(),
            start_line,
            end_line,
            signature: signature_of(self.source, def),
            docstring: def
                .child_by_field_name("body")
                .and_then(|body| first_docstring(self.source, body)),
            source_text: full_lines(self.source, outer.start_byte(), outer.end_byte()).to_string(),
            parent_id: scope.map(|s| s.id.clone()),
            degraded: false,
        }
    }

    fn name_of(&self, def: Node<'_>) -> String {
        def.child_by_field_name("name")
            .map(|n| self.source[n.byte_range()].to_string())
            .unwrap_or_else(|| "<anonymous>".to_string())
    }
}

/// Dotted module path for a repository-relative file path
pub fn module_name_for_path(file_path: &str) -> String {
    let without_ext = file_path
        .rsplit_once('.')
        .filter(|(_, ext)| !ext.contains('/'))
        .map(|(stem, _)| stem)
        .unwrap_or(file_path);
    let dotted = without_ext.trim_start_matches("./").replace('/', ".");
    match dotted.strip_suffix(".__init__") {
        Some(package) if !package.is_empty() => package.to_string(),
        _ => dotted,
    }
}

/// Header of a definition up to the start of its body (decorators excluded)
fn signature_of(source: &str, def: Node<'_>) -> String {
    let end = def
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| def.end_byte());
    source[def.start_byte()..end].trim_end().to_string()
}

/// Expand a byte range to whole lines, without the trailing newline
fn full_lines(source: &str, start: usize, end: usize) -> &str {
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[end..]
        .find('\n')
        .map(|i| end + i)
        .unwrap_or(source.len());
    source[line_start..line_end].trim_end_matches('\r')
}

/// String literal that opens a module or block, with quotes removed
fn first_docstring(source: &str, block: Node<'_>) -> Option<String> {
    let mut cursor = block.walk();
    let first = block
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    let doc = strip_string_literal(&source[literal.byte_range()]);
    if doc.is_empty() {
        None
    } else {
        Some(doc)
    }
}

fn strip_string_literal(raw: &str) -> String {
    let body = raw.trim_start_matches(|c: char| {
        matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B' | 'f' | 'F')
    });
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parser::parse;

    fn extract(source: &str, path: &str) -> Vec<Chunk> {
        let tree = parse(source, path).unwrap();
        PythonExtractor::new(source, path).extract(tree.root_node())
    }

    #[test]
    fn test_module_names() {
        assert_eq!(module_name_for_path("pkg/service.py"), "pkg.service");
        assert_eq!(module_name_for_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_for_path("__init__.py"), "__init__");
        assert_eq!(module_name_for_path("main.py"), "main");
    }

    #[test]
    fn test_class_and_methods() {
        let source = r#""""Users."""

class UserService(BaseService, metaclass=Meta):
    """Manage users."""

    def get_user(self, user_id):
        """Fetch one user."""
        return self.db[user_id]

    @staticmethod
    def build():
        return UserService()
"#;
        let chunks = extract(source, "svc.py");
        let kinds: Vec<ChunkKind> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChunkKind::Module, ChunkKind::Class, ChunkKind::Method, ChunkKind::Method]
        );

        let module = &chunks[0];
        assert_eq!(module.docstring.as_deref(), Some("Users."));
        assert_eq!(module.source_text, source);

        let class = &chunks[1];
        assert_eq!(class.qualified_name, "UserService");
        assert_eq!(class.signature, "class UserService(BaseService, metaclass=Meta):");
        assert_eq!(class.docstring.as_deref(), Some("Manage users."));
        assert_eq!((class.start_line, class.end_line), (3, 12));

        let get_user = &chunks[2];
        assert_eq!(get_user.qualified_name, "UserService.get_user");
        assert_eq!(get_user.parent_id.as_deref(), Some(class.id.as_str()));
        assert_eq!(get_user.signature, "def get_user(self, user_id):");
        assert!(get_user.source_text.starts_with("    def get_user"));

        let build = &chunks[3];
        assert_eq!(build.start_line, 10);
        assert!(build.source_text.starts_with("    @staticmethod"));
        assert_eq!(build.signature, "def build():");
    }

    #[test]
    fn test_nested_function_not_split() {
        let source = "def outer():\n    def inner():\n        pass\n    return inner\n";
        let chunks = extract(source, "a.py");
        let functions: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Function)
            .collect();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].qualified_name, "outer");
    }

    #[test]
    fn test_function_inside_module_if_block() {
        let source =
            "import sys\n\nif sys.version_info >= (3,):\n    def compat():\n        pass\n";
        let chunks = extract(source, "compat.py");
        assert!(chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Function && c.qualified_name == "compat"));
    }

    #[test]
    fn test_nested_class_parent() {
        let source = "class Outer:\n    class Inner:\n        def run(self):\n            pass\n";
        let chunks = extract(source, "n.py");
        let outer = chunks.iter().find(|c| c.qualified_name == "Outer").unwrap();
        let inner = chunks.iter().find(|c| c.qualified_name == "Outer.Inner").unwrap();
        let run = chunks.iter().find(|c| c.qualified_name == "Outer.Inner.run").unwrap();
        assert_eq!(inner.parent_id.as_deref(), Some(outer.id.as_str()));
        assert_eq!(run.parent_id.as_deref(), Some(inner.id.as_str()));
        assert_eq!(run.kind, ChunkKind::Method);
    }

    #[test]
    fn test_strip_string_literal() {
        assert_eq!(strip_string_literal("\"\"\"  doc  \"\"\""), "doc");
        assert_eq!(strip_string_literal("r'raw'"), "raw");
    }
}
