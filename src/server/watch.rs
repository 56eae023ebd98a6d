//! File watcher feeding the ingest path
//!
//! Coalesces file events with a 300 ms per-path debounce, drops ignored
//! paths, and reuses the sync engine's per-file pipeline: add/change is
//! re-chunk + re-embed + transactional replace; unlink is delete plus
//! MetaStore removal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::chunker::Chunker;
use crate::embed::EmbeddingProvider;
use crate::ignore_rules::IgnoreFilter;
use crate::meta::MetaStore;
use crate::store::Store;
use crate::sync::SyncEngine;

/// Per-path debounce window.
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Cap on distinct pending paths to bound memory under event storms.
const MAX_PENDING: usize = 10_000;

/// Run the watch loop until `cancel` is raised. Blocks the calling thread.
pub fn watch_loop(
    root: &Path,
    store: &Store,
    chunker: &Chunker,
    embedder: &dyn EmbeddingProvider,
    meta: &Mutex<MetaStore>,
    cancel: &AtomicBool,
) -> notify::Result<()> {
    let filter = IgnoreFilter::for_root(root);
    let engine = SyncEngine::new(store, chunker, embedder, meta, 1);

    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "Watching for changes");

    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    while !cancel.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(event)) => {
                for path in event.paths {
                    if filter.is_ignored(&path) {
                        continue;
                    }
                    if pending.len() < MAX_PENDING {
                        pending.insert(path, Instant::now());
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Watch error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                tracing::warn!("Watch channel disconnected, stopping watcher");
                break;
            }
        }

        // Debounced flush: only paths quiet for the full window
        let due: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= DEBOUNCE)
            .map(|(path, _)| path.clone())
            .collect();
        if due.is_empty() {
            continue;
        }

        let mut changed = false;
        for path in due {
            pending.remove(&path);
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            if path.is_file() {
                match engine.ingest_file(&path) {
                    Ok(0) => {}
                    Ok(rows) => {
                        changed = true;
                        tracing::info!(path = %path.display(), rows, "Reindexed changed file");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Reindex failed");
                    }
                }
            } else {
                match engine.remove_file(&path) {
                    Ok(()) => {
                        changed = true;
                        tracing::info!(path = %path.display(), "Removed deleted file from index");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Delete failed");
                    }
                }
            }
        }

        if changed {
            meta.lock().unwrap_or_else(|p| p.into_inner()).save_in_background();
        }
    }

    tracing::info!("Watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_window_constant() {
        // The debounce window is part of the server contract
        assert_eq!(DEBOUNCE, Duration::from_millis(300));
    }
}
