//! JavaScript language definition

use super::LanguageDef;

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(method_definition
  name: (property_identifier) @name) @function

(class_declaration
  name: (identifier) @name) @class

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(variable_declaration
  (variable_declarator
    name: (identifier) @name
    value: (function_expression))) @function
"#;

const IMPORT_QUERY: &str = r#"
(import_statement) @import
"#;

const DOC_NODES: &[&str] = &["comment"];

static DEFINITION: LanguageDef = LanguageDef {
    name: "javascript",
    grammar: || tree_sitter_javascript::LANGUAGE.into(),
    extensions: &["js", "jsx", "mjs", "cjs"],
    chunk_query: CHUNK_QUERY,
    import_query: Some(IMPORT_QUERY),
    doc_nodes: DOC_NODES,
    method_node_kinds: &["method_definition"],
    method_containers: &["class_body"],
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
