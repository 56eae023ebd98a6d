//! Declaration extraction from tree-sitter parse trees

use tree_sitter::StreamingIterator;

use super::{ChunkerError, Fragment, FragmentKind};
use crate::language::Language;

/// A declaration found in the parse tree, before size bounding and
/// context decoration.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub start_line: u32,
    pub end_line: u32,
    pub kind: FragmentKind,
    /// True when the node sits inside another captured declaration
    pub nested: bool,
    /// First line of the enclosing container, for the context preamble
    pub enclosing_signature: Option<String>,
}

/// Run the chunk query over the source and collect candidates, ordered by
/// increasing start line (parents before their children at equal starts).
pub(crate) fn extract(
    source: &str,
    language: Language,
    query: &tree_sitter::Query,
) -> Result<Vec<Candidate>, ChunkerError> {
    let grammar = language.grammar();
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| ChunkerError::ParseFailed(format!("{:?}", e)))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ChunkerError::ParseFailed("tree-sitter returned no tree".into()))?;

    let capture_kinds: &[(&str, FragmentKind)] = &[
        ("function", FragmentKind::Function),
        ("class", FragmentKind::Class),
        ("block", FragmentKind::Block),
    ];

    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());

    let mut candidates = Vec::new();
    while let Some(m) = matches.next() {
        let found = capture_kinds.iter().find_map(|(name, kind)| {
            query
                .capture_index_for_name(name)
                .and_then(|idx| m.captures.iter().find(|c| c.index == idx))
                .map(|c| (c.node, *kind))
        });
        let Some((node, base_kind)) = found else {
            continue;
        };

        let kind = if base_kind == FragmentKind::Function {
            infer_function_kind(node, language)
        } else {
            base_kind
        };

        let (nested, enclosing_signature) = enclosing_context(node, language, source);

        candidates.push(Candidate {
            start_line: node.start_position().row as u32,
            end_line: node.end_position().row as u32 + 1,
            kind,
            nested,
            enclosing_signature,
        });
    }

    candidates.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(b.end_line.cmp(&a.end_line))
    });
    Ok(candidates)
}

/// Run the import query and return the matched source lines, capped.
pub(crate) fn extract_imports(
    source: &str,
    language: Language,
    query: &tree_sitter::Query,
    max_lines: usize,
) -> Vec<String> {
    let grammar = language.grammar();
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar).is_err() {
        return vec![];
    }
    let Some(tree) = parser.parse(source, None) else {
        return vec![];
    };

    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());

    let mut imports = Vec::new();
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let text = source[capture.node.byte_range()].trim_end();
            // Multi-line imports keep only their first line in the preamble
            let first = text.lines().next().unwrap_or(text);
            imports.push(first.to_string());
            if imports.len() >= max_lines {
                return imports;
            }
        }
    }
    imports
}

/// Gather the names of emitted top-level fragments for anchor synthesis.
///
/// Takes the first identifier-looking token of each non-anchor fragment's
/// display text head so the anchor lists what the file declares without
/// keeping a separate name column around.
pub(crate) fn top_level_names(fragments: &[Fragment], _source: &str) -> Vec<String> {
    let mut names = Vec::new();
    for frag in fragments {
        if frag.is_anchor {
            continue;
        }
        if let Some(name) = declaration_name(frag.display_text()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        if names.len() >= 24 {
            break;
        }
    }
    names
}

/// Pull a declared name out of a fragment head line, e.g.
/// `fn add(` -> `add`, `class Calculator:` -> `Calculator`.
fn declaration_name(text: &str) -> Option<String> {
    let head = text.lines().next()?;
    let mut tokens = head
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty());

    const KEYWORDS: &[&str] = &[
        "pub", "export", "default", "async", "static", "const", "fn", "def", "func", "function",
        "class", "struct", "enum", "trait", "interface", "type", "let", "var", "impl",
    ];

    tokens.find(|t| !KEYWORDS.contains(t)).map(str::to_string)
}

fn infer_function_kind(node: tree_sitter::Node, language: Language) -> FragmentKind {
    let def = language.def();

    if def.method_node_kinds.contains(&node.kind()) {
        return FragmentKind::Method;
    }

    let mut current = node.parent();
    while let Some(parent) = current {
        if def.method_containers.contains(&parent.kind()) {
            return FragmentKind::Method;
        }
        current = parent.parent();
    }

    FragmentKind::Function
}

/// Whether the node is nested in a container, and that container's head line.
fn enclosing_context(
    node: tree_sitter::Node,
    language: Language,
    source: &str,
) -> (bool, Option<String>) {
    let def = language.def();
    let mut current = node.parent();
    while let Some(parent) = current {
        if def.method_containers.contains(&parent.kind()) {
            // The declaration node owning the container body (e.g. the
            // class_definition above a class body) reads better as context.
            let owner = if parent.kind().ends_with("_body") || parent.kind() == "class_body" {
                parent.parent().unwrap_or(parent)
            } else {
                parent
            };
            let text = &source[owner.byte_range()];
            let head = text.lines().next().unwrap_or("").trim_end().to_string();
            return (true, (!head.is_empty()).then_some(head));
        }
        current = parent.parent();
    }
    (false, None)
}
