//! Sync orchestrator integration tests: incremental skip, stale cleanup,
//! ignore respect, dedup, dry-run, and cancellation safety.

mod common;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use common::{write_file, MockProvider, TestStore};
use osgrep::sync::{SyncOptions, SyncProgress};
use osgrep::{Chunker, MetaStore, SyncEngine};
use tempfile::TempDir;

const PY_SAMPLE: &str = r#"""Module for arithmetic helpers."""

import math


def f(x):
    """Double the input."""
    total = x * 2
    checked = math.floor(total)
    return checked


def g(y):
    scaled = y + 1
    return scaled
"#;

struct Fixture {
    repo: TempDir,
    store: TestStore,
    meta_dir: TempDir,
    provider: MockProvider,
    chunker: Chunker,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture {
            repo: TempDir::new().unwrap(),
            store: TestStore::new(),
            meta_dir: TempDir::new().unwrap(),
            provider: MockProvider::new(),
            chunker: Chunker::new().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.repo.path()
    }

    fn meta(&self) -> Mutex<MetaStore> {
        let mut meta = MetaStore::load(&self.meta_dir.path().join("meta.json"));
        meta.set_skip_saves(true);
        Mutex::new(meta)
    }

    fn sync_with(&self, meta: &Mutex<MetaStore>, options: SyncOptions) -> osgrep::SyncOutcome {
        let engine = SyncEngine::new(&self.store.store, &self.chunker, &self.provider, meta, 2);
        let cancel = AtomicBool::new(false);
        let mut noop = |_: SyncProgress| {};
        engine.sync(self.root(), options, &cancel, &mut noop).unwrap()
    }
}

#[test]
fn test_initial_sync_stores_anchor_and_fragments() {
    let fixture = Fixture::new();
    let file = write_file(fixture.root(), "a.py", PY_SAMPLE);
    let meta = fixture.meta();

    let outcome = fixture.sync_with(&meta, SyncOptions::default());
    assert_eq!(outcome.indexed, 1);
    assert!(!outcome.cancelled);

    let rows = fixture
        .store
        .rows_for_path(&file.to_string_lossy())
        .unwrap();
    let anchors = rows.iter().filter(|r| r.is_anchor).count();
    let bodies = rows.iter().filter(|r| !r.is_anchor).count();
    assert_eq!(anchors, 1, "exactly one anchor per file");
    assert!(bodies >= 1, "at least one non-anchor fragment");

    let line_count = PY_SAMPLE.lines().count() as u32;
    for row in &rows {
        assert!(row.start_line < row.end_line);
        assert!(row.end_line <= line_count);
    }
}

#[test]
fn test_search_after_sync_finds_function() {
    let fixture = Fixture::new();
    let file = write_file(fixture.root(), "a.py", PY_SAMPLE);
    let meta = fixture.meta();
    fixture.sync_with(&meta, SyncOptions::default());

    let searcher = osgrep::Searcher::new(&fixture.store.store, &fixture.provider);
    let hits = searcher
        .search("double the input", &osgrep::SearchOptions::default())
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].path, file.to_string_lossy());
    assert!(matches!(
        hits[0].kind,
        osgrep::FragmentKind::Function | osgrep::FragmentKind::Anchor
    ));
}

#[test]
fn test_second_sync_skips_unchanged() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    write_file(fixture.root(), "b.py", "def h(z):\n    out = z - 1\n    return out\n");
    let meta = fixture.meta();

    fixture.sync_with(&meta, SyncOptions::default());
    let embedded_after_first = fixture.provider.embedded();
    assert!(embedded_after_first > 0);

    let outcome = fixture.sync_with(&meta, SyncOptions::default());
    assert_eq!(outcome.indexed, 0, "no file should be re-ingested");
    assert_eq!(outcome.skipped, 2);
    assert_eq!(
        fixture.provider.embedded(),
        embedded_after_first,
        "zero worker requests on the second run"
    );
}

#[test]
fn test_modified_file_reingested_alone() {
    let fixture = Fixture::new();
    let a = write_file(fixture.root(), "a.py", PY_SAMPLE);
    write_file(fixture.root(), "b.py", "def keep(k):\n    kept = k\n    return kept\n");
    let meta = fixture.meta();
    fixture.sync_with(&meta, SyncOptions::default());

    // Prepend a comment: content hash changes, chunk output shifts
    let modified = format!("# touched\n{}", PY_SAMPLE);
    std::fs::write(&a, &modified).unwrap();

    let outcome = fixture.sync_with(&meta, SyncOptions::default());
    assert_eq!(outcome.indexed, 1, "only the modified file re-ingests");
    assert_eq!(outcome.skipped, 1);

    // No rows with the old hash remain
    let hashes = fixture
        .store
        .hashes_for_path(&a.to_string_lossy())
        .unwrap();
    assert_eq!(hashes.len(), 1);
    assert_eq!(hashes[0], osgrep::hash_bytes(modified.as_bytes()));
}

#[test]
fn test_stale_paths_deleted() {
    let fixture = Fixture::new();
    let doomed = write_file(
        fixture.root(),
        "doomed.py",
        "def bye(v):\n    gone = v\n    return gone\n",
    );
    let meta = fixture.meta();
    fixture.sync_with(&meta, SyncOptions::default());
    assert!(!fixture
        .store
        .rows_for_path(&doomed.to_string_lossy())
        .unwrap()
        .is_empty());

    std::fs::remove_file(&doomed).unwrap();
    let outcome = fixture.sync_with(&meta, SyncOptions::default());
    assert_eq!(outcome.deleted, 1);
    assert!(fixture
        .store
        .rows_for_path(&doomed.to_string_lossy())
        .unwrap()
        .is_empty());
    assert!(meta
        .lock()
        .unwrap()
        .get(&doomed.to_string_lossy())
        .is_none());
}

#[test]
fn test_osgrepignore_respected() {
    let fixture = Fixture::new();
    write_file(fixture.root(), ".osgrepignore", "skipped/\n");
    let skipped = write_file(
        fixture.root(),
        "skipped/hidden.py",
        "def invisible(i):\n    out = i\n    return out\n",
    );
    write_file(fixture.root(), "kept.py", "def visible(v):\n    out = v\n    return out\n");
    let meta = fixture.meta();

    fixture.sync_with(&meta, SyncOptions::default());
    assert!(fixture
        .store
        .rows_for_path(&skipped.to_string_lossy())
        .unwrap()
        .is_empty());
    assert_eq!(fixture.store.list_paths().unwrap().len(), 1);
}

#[test]
fn test_gitignore_respected() {
    let fixture = Fixture::new();
    // .git marks the root as a repository for ignore semantics; an empty
    // dir makes `git ls-files` fail so the walker falls back to the walk
    std::fs::create_dir(fixture.root().join(".git")).unwrap();
    write_file(fixture.root(), ".gitignore", "generated.py\n");
    let generated = write_file(
        fixture.root(),
        "generated.py",
        "def machine_made(m):\n    out = m\n    return out\n",
    );
    write_file(fixture.root(), "source.py", "def hand_made(h):\n    out = h\n    return out\n");
    let meta = fixture.meta();

    fixture.sync_with(&meta, SyncOptions::default());
    assert!(fixture
        .store
        .rows_for_path(&generated.to_string_lossy())
        .unwrap()
        .is_empty());
}

#[test]
fn test_duplicate_texts_embedded_once() {
    let fixture = Fixture::new();
    // 20 byte-identical functions: the embedder must see each unique text
    // once even though a row is stored per fragment
    let unit = "def same(q):\n    body = q\n    return body\n";
    let body = vec![unit; 20].join("\n\n");
    let file = write_file(fixture.root(), "dup.py", &body);
    let meta = fixture.meta();

    fixture.sync_with(&meta, SyncOptions::default());

    let rows = fixture
        .store
        .rows_for_path(&file.to_string_lossy())
        .unwrap();
    let stored_bodies = rows.iter().filter(|r| !r.is_anchor).count();
    assert!(stored_bodies >= 10, "duplicates are stored as rows");
    assert!(
        fixture.provider.embedded() < stored_bodies,
        "dedup: {} embeds for {} stored fragments",
        fixture.provider.embedded(),
        stored_bodies
    );
}

#[test]
fn test_dry_run_writes_nothing() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    let meta = fixture.meta();

    let outcome = fixture.sync_with(&meta, SyncOptions { dry_run: true, force: false });
    assert_eq!(outcome.indexed, 1, "reports what it would have indexed");
    assert_eq!(fixture.store.count().unwrap(), 0);
    assert_eq!(fixture.provider.embedded(), 0);
    assert!(meta.lock().unwrap().is_empty());
}

#[test]
fn test_force_reingests_unchanged() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    let meta = fixture.meta();

    fixture.sync_with(&meta, SyncOptions::default());
    let outcome = fixture.sync_with(&meta, SyncOptions { dry_run: false, force: true });
    assert_eq!(outcome.indexed, 1, "force ignores the hash cache");
}

#[test]
fn test_cancellation_before_start_processes_nothing() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    let meta = fixture.meta();

    let engine = SyncEngine::new(
        &fixture.store.store,
        &fixture.chunker,
        &fixture.provider,
        &meta,
        2,
    );
    let cancel = AtomicBool::new(true);
    let mut noop = |_: SyncProgress| {};
    let outcome = engine
        .sync(fixture.root(), SyncOptions::default(), &cancel, &mut noop)
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.indexed, 0);
    // MetaStore agrees with the store: nothing in either
    assert_eq!(fixture.store.count().unwrap(), 0);
    assert!(meta.lock().unwrap().is_empty());
}

#[test]
fn test_meta_and_store_agree_after_sync() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    write_file(fixture.root(), "b.py", "def other(o):\n    out = o\n    return out\n");
    let meta = fixture.meta();
    fixture.sync_with(&meta, SyncOptions::default());

    // For every meta entry, the store holds rows with exactly that hash
    let guard = meta.lock().unwrap();
    let paths: Vec<String> = guard.paths().map(str::to_string).collect();
    assert_eq!(paths.len(), 2);
    for path in paths {
        let expected = guard.get(&path).unwrap();
        let hashes = fixture.store.hashes_for_path(&path).unwrap();
        assert_eq!(hashes, vec![expected.to_string()], "hash mismatch for {}", path);
    }
}

#[test]
fn test_progress_callback_fires_per_file() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "a.py", PY_SAMPLE);
    write_file(fixture.root(), "b.py", "def second(s):\n    out = s\n    return out\n");
    let meta = fixture.meta();

    let engine = SyncEngine::new(
        &fixture.store.store,
        &fixture.chunker,
        &fixture.provider,
        &meta,
        1,
    );
    let cancel = AtomicBool::new(false);
    let seen = Mutex::new(Vec::new());
    let mut callback = |p: SyncProgress| {
        seen.lock().unwrap().push((p.processed, p.total, p.path));
    };
    engine
        .sync(fixture.root(), SyncOptions::default(), &cancel, &mut callback)
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|(_, total, _)| *total == 2));
    assert_eq!(seen.last().unwrap().0, 2);
}

#[test]
fn test_empty_and_binary_files_skipped() {
    let fixture = Fixture::new();
    write_file(fixture.root(), "empty.py", "");
    let binary = fixture.root().join("blob.py");
    std::fs::write(&binary, [0u8, 159, 146, 150, 255, 0, 1]).unwrap();
    write_file(fixture.root(), "real.py", "def real(r):\n    out = r\n    return out\n");
    let meta = fixture.meta();

    let outcome = fixture.sync_with(&meta, SyncOptions::default());
    assert_eq!(outcome.indexed, 1);
    assert_eq!(fixture.store.list_paths().unwrap().len(), 1);
}

#[test]
fn test_watch_style_single_file_ingest() {
    let fixture = Fixture::new();
    let file = write_file(fixture.root(), "w.py", "def watched(w):\n    out = w\n    return out\n");
    let meta = fixture.meta();
    let engine = SyncEngine::new(
        &fixture.store.store,
        &fixture.chunker,
        &fixture.provider,
        &meta,
        1,
    );

    let rows = engine.ingest_file(&file).unwrap();
    assert!(rows >= 1);
    assert!(!fixture
        .store
        .rows_for_path(&file.to_string_lossy())
        .unwrap()
        .is_empty());

    engine.remove_file(&file).unwrap();
    assert!(fixture
        .store
        .rows_for_path(&file.to_string_lossy())
        .unwrap()
        .is_empty());
    assert!(meta.lock().unwrap().get(&file.to_string_lossy()).is_none());
}
