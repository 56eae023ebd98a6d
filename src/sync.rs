//! Sync orchestrator: diff disk vs. store and drive the ingest pipeline
//!
//! Walks the filesystem, deletes stale paths, and pushes changed files
//! through chunk → embed → replace with bounded concurrency
//! (`max(1, cpus/2)` in-flight file pipelines). Per-file atomicity comes
//! from [`Store::replace_file`]; the MetaStore is advisory and persisted
//! after stale-deletes, every 50 indexed files, and at end of sync.
//!
//! Cancellation: in-flight files finish their current step, no new files
//! start, the MetaStore is persisted, and the outcome reports counts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use thiserror::Error;

use crate::chunker::{Chunker, ChunkerError};
use crate::embed::{EmbeddingProvider, HybridEmbedding};
use crate::ignore_rules::IgnoreFilter;
use crate::meta::{hash_bytes, MetaError, MetaStore};
use crate::store::{FragmentRow, Store, StoreError};
use crate::walker;

/// Worker pool batch size for unique fragment texts.
const EMBED_BATCH: usize = 16;

/// Persist the MetaStore after this many successfully indexed files.
const META_SAVE_INTERVAL: usize = 50;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("MetaStore error: {0}")]
    Meta(#[from] MetaError),
    #[error("Chunker error: {0}")]
    Chunker(#[from] ChunkerError),
    #[error("Embedding error: {0}")]
    Embed(#[from] crate::embed::PoolError),
}

/// Sync run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Walk, hash, and chunk, but write nothing; report would-have-indexed
    pub dry_run: bool,
    /// Ignore the MetaStore and re-ingest every file
    pub force: bool,
}

/// Result summary from a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub processed: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub cancelled: bool,
}

/// Progress report emitted after every file.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub processed: usize,
    pub indexed: usize,
    pub total: usize,
    pub path: String,
}

/// Trait for receiving sync progress updates.
pub trait SyncProgressCallback: Send {
    fn progress(&mut self, progress: SyncProgress);
}

impl<F: FnMut(SyncProgress) + Send> SyncProgressCallback for F {
    fn progress(&mut self, progress: SyncProgress) {
        self(progress);
    }
}

impl SyncProgressCallback for () {
    fn progress(&mut self, _progress: SyncProgress) {}
}

impl SyncProgressCallback for ProgressBar {
    fn progress(&mut self, progress: SyncProgress) {
        self.set_length(progress.total as u64);
        self.set_position(progress.processed as u64);
        let short = progress.path.rsplit('/').next().unwrap_or(&progress.path);
        self.set_message(short.to_string());
    }
}

enum FileResult {
    Indexed { path: String },
    WouldIndex { path: String, fragments: usize },
    Skipped { path: String },
}

/// Engine driving the full ingest pipeline for one store.
pub struct SyncEngine<'a> {
    store: &'a Store,
    chunker: &'a Chunker,
    embedder: &'a dyn EmbeddingProvider,
    meta: &'a Mutex<MetaStore>,
    concurrency: usize,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a Store,
        chunker: &'a Chunker,
        embedder: &'a dyn EmbeddingProvider,
        meta: &'a Mutex<MetaStore>,
        concurrency: usize,
    ) -> Self {
        SyncEngine {
            store,
            chunker,
            embedder,
            meta,
            concurrency: concurrency.max(1),
        }
    }

    /// Run a full sync of `root` against the store.
    pub fn sync(
        &self,
        root: &Path,
        options: SyncOptions,
        cancel: &AtomicBool,
        callback: &mut dyn SyncProgressCallback,
    ) -> Result<SyncOutcome, SyncError> {
        let _span = tracing::info_span!("sync", root = %root.display()).entered();

        // 1. Hashes already observed in the index
        let db_paths: HashMap<String, String> = self.store.list_paths()?.into_iter().collect();
        tracing::info!(db_paths = db_paths.len(), "Loaded indexed path set");

        // 2. Walk the filesystem through the merged ignore filter
        let filter = IgnoreFilter::for_root(root);
        let disk_paths = walker::list_files(root, &filter);
        let disk_set: HashSet<String> = disk_paths
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        // 3. Stale paths: indexed but gone from disk (or newly ignored)
        let stale: Vec<String> = db_paths
            .keys()
            .filter(|path| !disk_set.contains(*path))
            .cloned()
            .collect();
        let deleted = stale.len();
        if !stale.is_empty() && !options.dry_run {
            for path in &stale {
                self.store.delete_by_path(path)?;
                self.lock_meta().remove(path);
            }
            if let Err(e) = self.lock_meta().save() {
                tracing::warn!(error = %e, "MetaStore save after stale delete failed");
            }
            tracing::info!(deleted, "Removed stale paths");
        }

        // 4. Bounded fan-out over disk files
        let total = disk_paths.len();
        let indexed_counter = AtomicUsize::new(0);
        let mut outcome = SyncOutcome {
            deleted,
            ..SyncOutcome::default()
        };

        let (work_tx, work_rx) = bounded::<PathBuf>(self.concurrency * 2);
        let (result_tx, result_rx) = bounded::<FileResult>(self.concurrency * 2);

        std::thread::scope(|scope| {
            for _ in 0..self.concurrency {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let indexed_counter = &indexed_counter;
                scope.spawn(move || {
                    for path in work_rx {
                        if cancel.load(Ordering::SeqCst) {
                            // Finish nothing new; drain silently
                            continue;
                        }
                        let result = self.process_file(&path, options, indexed_counter);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            // Feeder: stop enqueuing as soon as cancellation is observed
            let feeder = scope.spawn(move || {
                for path in disk_paths {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    if work_tx.send(path).is_err() {
                        break;
                    }
                }
            });

            for result in result_rx {
                outcome.processed += 1;
                let path = match result {
                    FileResult::Indexed { path } => {
                        outcome.indexed += 1;
                        path
                    }
                    FileResult::WouldIndex { path, fragments } => {
                        outcome.indexed += 1;
                        tracing::info!(path = %path, fragments, "Would have indexed (dry run)");
                        path
                    }
                    FileResult::Skipped { path } => {
                        outcome.skipped += 1;
                        path
                    }
                };
                callback.progress(SyncProgress {
                    processed: outcome.processed,
                    indexed: outcome.indexed,
                    total,
                    path,
                });
            }

            let _ = feeder.join();
        });

        outcome.cancelled = cancel.load(Ordering::SeqCst);

        // 5. Index maintenance only when something was written
        if outcome.indexed > 0 && !options.dry_run {
            self.store.create_fts_index()?;
            self.store.create_vector_index()?;
        }

        // 6. Final MetaStore persist (also on cancellation)
        if !options.dry_run {
            if let Err(e) = self.lock_meta().save() {
                tracing::warn!(error = %e, "Final MetaStore save failed");
            }
        }

        tracing::info!(
            processed = outcome.processed,
            indexed = outcome.indexed,
            skipped = outcome.skipped,
            deleted = outcome.deleted,
            cancelled = outcome.cancelled,
            "Sync complete"
        );
        Ok(outcome)
    }

    /// Per-file pipeline: read → hash → skip-if-unchanged → chunk → embed →
    /// transactional replace → meta update.
    fn process_file(
        &self,
        path: &Path,
        options: SyncOptions,
        indexed_counter: &AtomicUsize,
    ) -> FileResult {
        let path_str = path.to_string_lossy().into_owned();

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path_str, error = %e, "Read failed, skipping");
                return FileResult::Skipped { path: path_str };
            }
        };
        if bytes.is_empty() {
            return FileResult::Skipped { path: path_str };
        }

        let hash = hash_bytes(&bytes);
        if !options.force && self.lock_meta().get(&path_str) == Some(hash.as_str()) {
            return FileResult::Skipped { path: path_str };
        }

        let source = match String::from_utf8(bytes) {
            Ok(s) => s,
            // Binary or non-UTF8: skip silently
            Err(_) => return FileResult::Skipped { path: path_str },
        };

        let fragments = self.chunker.chunk_source(path, &source);
        if fragments.is_empty() {
            return FileResult::Skipped { path: path_str };
        }

        if options.dry_run {
            return FileResult::WouldIndex {
                path: path_str,
                fragments: fragments.len(),
            };
        }

        let rows = match self.embed_fragments(&fragments, &hash) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(path = %path_str, error = %e, "Embedding failed, skipping file");
                return FileResult::Skipped { path: path_str };
            }
        };

        if let Err(e) = self.store.replace_file(&path_str, &rows) {
            tracing::warn!(path = %path_str, error = %e, "Store write failed, skipping file");
            return FileResult::Skipped { path: path_str };
        }

        {
            let mut meta = self.lock_meta();
            meta.insert(path_str.clone(), hash);
            let indexed = indexed_counter.fetch_add(1, Ordering::SeqCst) + 1;
            if indexed % META_SAVE_INTERVAL == 0 {
                meta.save_in_background();
            }
        }

        FileResult::Indexed { path: path_str }
    }

    /// Embed fragment texts, invoking the provider once per unique text;
    /// copies reuse the computed vectors.
    fn embed_fragments(
        &self,
        fragments: &[crate::Fragment],
        file_hash: &str,
    ) -> Result<Vec<FragmentRow>, SyncError> {
        let mut unique: Vec<&str> = Vec::new();
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for frag in fragments {
            seen.entry(frag.text.as_str()).or_insert_with(|| {
                unique.push(frag.text.as_str());
                unique.len() - 1
            });
        }

        let mut embeddings: Vec<HybridEmbedding> = Vec::with_capacity(unique.len());
        for batch in unique.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|t| t.to_string()).collect();
            embeddings.extend(self.embedder.embed_documents(&texts)?);
        }

        Ok(fragments
            .iter()
            .map(|frag| {
                let idx = seen[frag.text.as_str()];
                FragmentRow::new(frag, file_hash, embeddings[idx].clone())
            })
            .collect())
    }

    /// Re-ingest a single file (watch mode). Returns the stored row count,
    /// or 0 when the file was skipped.
    pub fn ingest_file(&self, path: &Path) -> Result<usize, SyncError> {
        let path_str = path.to_string_lossy().into_owned();
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let hash = hash_bytes(&bytes);
        let Ok(source) = String::from_utf8(bytes) else {
            return Ok(0);
        };
        let fragments = self.chunker.chunk_source(path, &source);
        if fragments.is_empty() {
            return Ok(0);
        }
        let rows = self.embed_fragments(&fragments, &hash)?;
        self.store.replace_file(&path_str, &rows)?;
        self.lock_meta().insert(path_str, hash);
        Ok(rows.len())
    }

    /// Remove a deleted file's rows and meta entry (watch mode).
    pub fn remove_file(&self, path: &Path) -> Result<(), SyncError> {
        let path_str = path.to_string_lossy().into_owned();
        self.store.delete_by_path(&path_str)?;
        self.lock_meta().remove(&path_str);
        Ok(())
    }

    fn lock_meta(&self) -> std::sync::MutexGuard<'a, MetaStore> {
        self.meta.lock().unwrap_or_else(|p| p.into_inner())
    }
}
