//! Store integration tests: atomic replace, stale delete, dimension guard,
//! and both search paths.

mod common;

use common::{mock_embedding, test_row, TestStore};
use osgrep::{FragmentKind, EMBEDDING_DIM};

#[test]
fn test_insert_and_count() {
    let store = TestStore::new();
    assert_eq!(store.count().unwrap(), 0);

    let rows = vec![
        test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn alpha() {}"),
        test_row("a:1", "/repo/a.rs", FragmentKind::Block, "const X: i32 = 1;"),
    ];
    store.insert_batch(&rows).unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn test_replace_file_is_atomic_per_hash() {
    let store = TestStore::new();

    let mut old = vec![
        test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn old_one() {}"),
        test_row("a:1", "/repo/a.rs", FragmentKind::Function, "fn old_two() {}"),
    ];
    for row in &mut old {
        row.hash = "hash-v1".into();
    }
    store.insert_batch(&old).unwrap();

    let mut new = vec![test_row(
        "a:2",
        "/repo/a.rs",
        FragmentKind::Function,
        "fn new_one() {}",
    )];
    for row in &mut new {
        row.hash = "hash-v2".into();
    }
    store.replace_file("/repo/a.rs", &new).unwrap();

    // After the replace, exactly one hash remains for the path
    let hashes = store.hashes_for_path("/repo/a.rs").unwrap();
    assert_eq!(hashes, vec!["hash-v2".to_string()]);
    let rows = store.rows_for_path("/repo/a.rs").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "a:2");
}

#[test]
fn test_delete_by_path_removes_everything() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn keep_alpha() {}"),
            test_row("b:0", "/repo/b.rs", FragmentKind::Function, "fn drop_bravo() {}"),
        ])
        .unwrap();

    let deleted = store.delete_by_path("/repo/b.rs").unwrap();
    assert_eq!(deleted, 1);
    assert!(store.rows_for_path("/repo/b.rs").unwrap().is_empty());
    assert_eq!(store.count().unwrap(), 1);

    // FTS rows must be gone too: keyword search finds nothing for b.rs
    let hits = store.search_fts("drop_bravo", 10, None).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_list_paths_one_entry_per_path() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn one() {}"),
            test_row("a:1", "/repo/a.rs", FragmentKind::Function, "fn two() {}"),
            test_row("b:0", "/repo/b.rs", FragmentKind::Function, "fn three() {}"),
        ])
        .unwrap();

    let paths = store.list_paths().unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].0, "/repo/a.rs");
    assert_eq!(paths[1].0, "/repo/b.rs");
}

#[test]
fn test_dimension_guard_rebuilds() {
    let fixture = TestStore::new();
    fixture
        .insert_batch(&[test_row(
            "a:0",
            "/repo/a.rs",
            FragmentKind::Function,
            "fn gone_after_rebuild() {}",
        )])
        .unwrap();
    assert_eq!(fixture.count().unwrap(), 1);

    // Simulate an index written by a model with a different dimension
    fixture.set_metadata("dimensions", "512").unwrap();

    let reopened = fixture.reopen();
    assert_eq!(reopened.count().unwrap(), 0, "mismatched table must be rebuilt");
    assert_eq!(
        reopened.get_metadata("dimensions").unwrap().as_deref(),
        Some(EMBEDDING_DIM.to_string().as_str())
    );
}

#[test]
fn test_vector_search_finds_similar() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn parse_config_file() {}"),
            test_row("b:0", "/repo/b.rs", FragmentKind::Function, "fn render_html_page() {}"),
            test_row("c:0", "/repo/c.rs", FragmentKind::Function, "fn open_database() {}"),
        ])
        .unwrap();

    let query = mock_embedding("parse config file");
    let hits = store.search_vector(&query, 2, None).unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].fragment.path, "/repo/a.rs");
    // Scores descend
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn test_vector_search_path_prefix() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:0", "/repo/src/a.rs", FragmentKind::Function, "fn shared_name() {}"),
            test_row("b:0", "/repo/vendor/b.rs", FragmentKind::Function, "fn shared_name() {}"),
        ])
        .unwrap();

    let query = mock_embedding("shared name");
    let hits = store.search_vector(&query, 10, Some("/repo/src")).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fragment.path, "/repo/src/a.rs");
}

#[test]
fn test_vector_search_rejects_bad_dimension() {
    let store = TestStore::new();
    let err = store.search_vector(&[0.5; 3], 5, None);
    assert!(err.is_err());
}

#[test]
fn test_fts_search_basic() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn compute_checksum(data: &[u8]) {}"),
            test_row("b:0", "/repo/b.rs", FragmentKind::Function, "fn unrelated_thing() {}"),
        ])
        .unwrap();

    let hits = store.search_fts("checksum", 10, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fragment.path, "/repo/a.rs");
}

#[test]
fn test_fts_search_identifier_tokens() {
    let store = TestStore::new();
    store
        .insert_batch(&[test_row(
            "a:0",
            "/repo/a.rs",
            FragmentKind::Function,
            "fn computeChecksum(data) {}",
        )])
        .unwrap();

    // Camel-case identifiers are searchable by their word parts
    let hits = store.search_fts("compute checksum", 10, None).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_fts_search_sanitizes_operators() {
    let store = TestStore::new();
    store
        .insert_batch(&[test_row(
            "a:0",
            "/repo/a.rs",
            FragmentKind::Function,
            "fn auth_token_check() {}",
        )])
        .unwrap();

    // Raw FTS5 operators must not error
    let hits = store.search_fts("auth* AND (token:\"x\")", 10, None).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn test_index_creation_idempotent() {
    let store = TestStore::new();
    store
        .insert_batch(&[test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn x() {}")])
        .unwrap();

    store.create_fts_index().unwrap();
    store.create_fts_index().unwrap();
    store.create_vector_index().unwrap();
    store.create_vector_index().unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn test_anchor_flag_roundtrip() {
    let store = TestStore::new();
    store
        .insert_batch(&[
            test_row("a:anchor", "/repo/a.rs", FragmentKind::Anchor, "File a.rs summary imports"),
            test_row("a:0", "/repo/a.rs", FragmentKind::Function, "fn body() {}"),
        ])
        .unwrap();

    let rows = store.rows_for_path("/repo/a.rs").unwrap();
    let anchors: Vec<_> = rows.iter().filter(|r| r.is_anchor).collect();
    assert_eq!(anchors.len(), 1);
    assert_eq!(anchors[0].kind, FragmentKind::Anchor);
}
