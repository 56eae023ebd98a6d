//! Content hashing and the persistent MetaStore
//!
//! The MetaStore is an advisory JSON map `absolute_path -> content_hash` that
//! lets incremental sync skip unchanged files without consulting the index.
//! On absence or corruption it starts empty; sync then falls back to the
//! hashes recorded in the index itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// SHA-256 over raw bytes, rendered as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Persistent `path -> hash` map backing incremental sync.
///
/// Saves happen (a) after stale-deletes, (b) every 50 indexed files
/// (fire-and-forget), and (c) at end of sync. Periodic saves can be disabled
/// for tests and benchmarks via [`MetaStore::set_skip_saves`].
pub struct MetaStore {
    path: PathBuf,
    entries: HashMap<String, String>,
    skip_saves: bool,
}

impl MetaStore {
    /// Load the MetaStore from disk, starting empty on absence or corruption.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "MetaStore corrupt, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "MetaStore unreadable, starting empty");
                HashMap::new()
            }
        };

        MetaStore {
            path: path.to_path_buf(),
            entries,
            skip_saves: false,
        }
    }

    /// Create an empty in-memory MetaStore rooted at `path`.
    pub fn empty(path: &Path) -> Self {
        MetaStore {
            path: path.to_path_buf(),
            entries: HashMap::new(),
            skip_saves: false,
        }
    }

    /// Disable periodic persistence (used by tests and benchmarks).
    pub fn set_skip_saves(&mut self, skip: bool) {
        self.skip_saves = skip;
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: String, hash: String) {
        self.entries.insert(path, hash);
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Persist the map via temp-file rename. Always writes, even when
    /// periodic saves are disabled (final saves must land).
    pub fn save(&self) -> Result<(), MetaError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string(&self.entries)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(entries = self.entries.len(), path = %self.path.display(), "MetaStore saved");
        Ok(())
    }

    /// Best-effort periodic save: skipped when disabled, errors logged only.
    ///
    /// Clones the current map and writes on a detached thread so the ingest
    /// pipeline never blocks on meta persistence.
    pub fn save_in_background(&self) {
        if self.skip_saves {
            return;
        }
        let snapshot = self.entries.clone();
        let path = self.path.clone();
        std::thread::spawn(move || {
            let store = MetaStore {
                path,
                entries: snapshot,
                skip_saves: false,
            };
            if let Err(e) = store.save() {
                tracing::warn!(error = %e, "Periodic MetaStore save failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_known_value() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_bytes_is_lowercase_hex() {
        let h = hash_bytes(b"fn main() {}");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let mut meta = MetaStore::load(&path);
        assert!(meta.is_empty());
        meta.insert("/a/b.rs".into(), "abc123".into());
        meta.save().unwrap();

        let reloaded = MetaStore::load(&path);
        assert_eq!(reloaded.get("/a/b.rs"), Some("abc123"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "{not json!").unwrap();

        let meta = MetaStore::load(&path);
        assert!(meta.is_empty());
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = MetaStore::empty(&dir.path().join("meta.json"));
        meta.insert("/x".into(), "h1".into());
        assert_eq!(meta.remove("/x"), Some("h1".into()));
        assert_eq!(meta.remove("/x"), None);
    }
}
