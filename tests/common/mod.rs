//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::{MockProvider, TestStore};
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use osgrep::embed::PoolError;
use osgrep::store::FragmentRow;
use osgrep::{
    EmbeddingProvider, FragmentKind, HybridEmbedding, QueryEmbedding, Store, EMBEDDING_DIM,
};

/// Test store with automatic cleanup
///
/// Wraps a `Store` with its backing `TempDir`, ensuring the directory
/// lives as long as the store is in use.
pub struct TestStore {
    pub store: Store,
    _dir: TempDir,
}

impl TestStore {
    /// Create a store in a temporary directory
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::open_path(&dir.path().join("index.db")).expect("Failed to open store");
        Self { store, _dir: dir }
    }

    /// Reopen the same database file (dimension-guard tests)
    pub fn reopen(&self) -> Store {
        Store::open_path(&self._dir.path().join("index.db")).expect("Failed to reopen store")
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Deterministic bag-of-tokens embedding: texts sharing words get similar
/// directions, so vector search behaves meaningfully in tests.
pub fn mock_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.to_lowercase().hash(&mut hasher);
        let idx = (hasher.finish() % EMBEDDING_DIM as u64) as usize;
        v[idx] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Build a fragment row with a mock embedding derived from its text
pub fn test_row(id: &str, path: &str, kind: FragmentKind, text: &str) -> FragmentRow {
    FragmentRow {
        id: id.to_string(),
        path: path.to_string(),
        hash: format!("hash-of-{}", path),
        kind,
        start_line: 0,
        end_line: 10,
        is_anchor: kind == FragmentKind::Anchor,
        text: text.to_string(),
        context_len: 0,
        dense: mock_embedding(text),
        late: None,
    }
}

/// Deterministic embedding provider counting invocations.
///
/// Reranking scores documents by shared-token overlap with the query, so
/// rerank-order assertions stay stable without model downloads.
#[derive(Default)]
pub struct MockProvider {
    pub embedded_texts: AtomicUsize,
    pub embed_batches: AtomicUsize,
    pub rerank_calls: AtomicUsize,
    pub fail_rerank: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_rerank() -> Self {
        MockProvider {
            fail_rerank: true,
            ..Self::default()
        }
    }

    pub fn embedded(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }
}

fn token_overlap(query: &str, doc: &str) -> f32 {
    let tokens = |s: &str| {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect::<std::collections::HashSet<_>>()
    };
    let q = tokens(query);
    let d = tokens(doc);
    if q.is_empty() {
        return 0.0;
    }
    q.intersection(&d).count() as f32 / q.len() as f32
}

impl EmbeddingProvider for MockProvider {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<HybridEmbedding>, PoolError> {
        self.embed_batches.fetch_add(1, Ordering::SeqCst);
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| HybridEmbedding {
                dense: mock_embedding(t),
                late: None,
            })
            .collect())
    }

    fn embed_query(&self, text: &str) -> Result<QueryEmbedding, PoolError> {
        Ok(QueryEmbedding {
            dense: mock_embedding(text),
            late: None,
        })
    }

    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, PoolError> {
        self.rerank_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_rerank {
            return Err(PoolError::Worker("mock reranker offline".into()));
        }
        Ok(documents
            .iter()
            .map(|doc| token_overlap(query, doc))
            .collect())
    }
}

/// Write a file under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, body: &str) -> std::path::PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, body).unwrap();
    path
}
