//! Go language definition

use super::LanguageDef;

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(method_declaration
  name: (field_identifier) @name) @function

(type_declaration
  (type_spec
    name: (type_identifier) @name)) @class
"#;

const IMPORT_QUERY: &str = r#"
(import_declaration) @import
"#;

const DOC_NODES: &[&str] = &["comment"];

static DEFINITION: LanguageDef = LanguageDef {
    name: "go",
    grammar: || tree_sitter_go::LANGUAGE.into(),
    extensions: &["go"],
    chunk_query: CHUNK_QUERY,
    import_query: Some(IMPORT_QUERY),
    doc_nodes: DOC_NODES,
    method_node_kinds: &["method_declaration"],
    method_containers: &[],
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
