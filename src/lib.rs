//! # osgrep - Local Semantic Code Search
//!
//! Offline semantic search for code. A repository is split into
//! structure-aware fragments, embedded with a local ONNX encoder, and stored
//! as dense vectors plus full-text rows in SQLite. Queries are answered by
//! fusing vector and keyword candidates (RRF) and refining them with a
//! cross-encoder reranker.
//!
//! ## Features
//!
//! - **Hybrid retrieval**: dense nearest-neighbor + BM25 keyword fusion
//! - **Structure-aware chunking**: tree-sitter fragments with context preambles
//! - **Incremental sync**: content-hash skip via a persistent MetaStore
//! - **Worker pool**: serialized model sessions with timeout and memory recycling
//! - **Serve mode**: debounced file watching + authenticated localhost HTTP
//!
//! ## Quick Start
//!
//! ```no_run
//! use osgrep::{Chunker, Store};
//!
//! # fn main() -> anyhow::Result<()> {
//! let chunker = Chunker::new()?;
//! let store = Store::open_or_create(std::path::Path::new("/tmp/osgrep"), "demo")?;
//!
//! let fragments = chunker.chunk_file(std::path::Path::new("src/main.rs"))?;
//! for frag in &fragments {
//!     println!("{} [{}..{}) {}", frag.path.display(), frag.start_line, frag.end_line, frag.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod config;
pub mod embed;
pub mod hnsw;
pub mod ignore_rules;
pub mod index;
pub mod language;
pub mod meta;
pub mod search;
pub mod server;
pub mod store;
pub mod sync;
pub mod walker;

pub(crate) mod math;

pub use chunker::{Chunker, Fragment, FragmentKind};
pub use config::Config;
pub use embed::{EmbeddingProvider, HybridEmbedding, LatePayload, QueryEmbedding, WorkerPool};
pub use hnsw::HnswIndex;
pub use ignore_rules::IgnoreFilter;
pub use index::{IndexResult, VectorIndex};
pub use meta::{hash_bytes, MetaStore};
pub use search::{SearchHit, SearchOptions, Searcher};
pub use store::{FragmentRow, Store, StoreError};
pub use sync::{SyncEngine, SyncOptions, SyncOutcome, SyncProgress};

use std::path::{Path, PathBuf};

/// Dense embedding dimension (encoder output, CLS-pooled).
/// Single source of truth — all modules import this constant.
pub const EMBEDDING_DIM: usize = 768;

/// Name of the repository-local directory used by the server (lock file).
pub const REPO_DIR: &str = ".osgrep";

/// Derive a store name from a repository root: directory name plus a short
/// path hash, so distinct checkouts with the same name get distinct stores.
pub fn store_name_for_root(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let digest = hash_bytes(canonical.to_string_lossy().as_bytes());
    let stem = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    format!("{}-{}", sanitize_store_stem(&stem), &digest[..12])
}

fn sanitize_store_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "root".to_string()
    } else {
        cleaned
    }
}

/// Locate the repository root for a starting directory: the nearest ancestor
/// containing `.git`, falling back to the starting directory itself.
pub fn find_repo_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return start.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_name_is_stable() {
        let a = store_name_for_root(Path::new("/tmp/does-not-exist-osgrep"));
        let b = store_name_for_root(Path::new("/tmp/does-not-exist-osgrep"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_store_name_sanitizes() {
        let name = store_name_for_root(Path::new("/tmp/weird name!.d"));
        assert!(!name.contains(' '));
        assert!(!name.contains('!'));
    }

    #[test]
    fn test_find_repo_root_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = find_repo_root(dir.path());
        assert_eq!(root, dir.path());
    }

    #[test]
    fn test_find_repo_root_detects_git() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_repo_root(&nested), dir.path());
    }
}
