//! TypeScript language definition (covers .ts and .tsx)

use super::LanguageDef;

const CHUNK_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name) @function

(method_definition
  name: (property_identifier) @name) @function

(class_declaration
  name: (type_identifier) @name) @class

(interface_declaration
  name: (type_identifier) @name) @class

(enum_declaration
  name: (identifier) @name) @class

(type_alias_declaration
  name: (type_identifier) @name) @block

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function
"#;

const IMPORT_QUERY: &str = r#"
(import_statement) @import
"#;

const DOC_NODES: &[&str] = &["comment"];

static DEFINITION: LanguageDef = LanguageDef {
    name: "typescript",
    grammar: || tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
    extensions: &["ts", "tsx"],
    chunk_query: CHUNK_QUERY,
    import_query: Some(IMPORT_QUERY),
    doc_nodes: DOC_NODES,
    method_node_kinds: &["method_definition"],
    method_containers: &["class_body"],
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
