//! Python language definition

use super::LanguageDef;

const CHUNK_QUERY: &str = r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class
"#;

const IMPORT_QUERY: &str = r#"
(import_statement) @import
(import_from_statement) @import
"#;

/// Python docstrings are handled specially (first statement of the body);
/// leading comments still count.
const DOC_NODES: &[&str] = &["comment"];

static DEFINITION: LanguageDef = LanguageDef {
    name: "python",
    grammar: || tree_sitter_python::LANGUAGE.into(),
    extensions: &["py", "pyi"],
    chunk_query: CHUNK_QUERY,
    import_query: Some(IMPORT_QUERY),
    doc_nodes: DOC_NODES,
    method_node_kinds: &[],
    method_containers: &["class_definition"],
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
