//! Rust language definition

use super::LanguageDef;

/// Tree-sitter query for extracting Rust declarations
const CHUNK_QUERY: &str = r#"
(function_item
  name: (identifier) @name) @function

(struct_item
  name: (type_identifier) @name) @class

(enum_item
  name: (type_identifier) @name) @class

(trait_item
  name: (type_identifier) @name) @class

(const_item
  name: (identifier) @name) @block

(static_item
  name: (identifier) @name) @block

(macro_definition
  name: (identifier) @name) @block
"#;

const IMPORT_QUERY: &str = r#"
(use_declaration) @import
(extern_crate_declaration) @import
"#;

const DOC_NODES: &[&str] = &["line_comment", "block_comment"];

static DEFINITION: LanguageDef = LanguageDef {
    name: "rust",
    grammar: || tree_sitter_rust::LANGUAGE.into(),
    extensions: &["rs"],
    chunk_query: CHUNK_QUERY,
    import_query: Some(IMPORT_QUERY),
    doc_nodes: DOC_NODES,
    method_node_kinds: &[],
    method_containers: &["impl_item", "trait_item"],
};

pub fn definition() -> &'static LanguageDef {
    &DEFINITION
}
