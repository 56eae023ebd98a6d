//! SQLite storage for fragments and embeddings (sqlx async with sync wrappers)
//!
//! Rows are fragments: path, span, text, dense vector, optional quantized
//! late-interaction payload. Keyword search runs over an FTS5 mirror of the
//! text column; vector search scans small tables brute-force and switches to
//! an in-memory HNSW index once [`HNSW_THRESHOLD`] rows exist.
//!
//! Per-file atomicity is delete-then-insert inside one transaction
//! ([`Store::replace_file`]); a reader sees the old row set or the new one,
//! never a union.
//!
//! ## Module Structure
//!
//! - `rows` - Row types and embedding blob conversion
//! - `ops` - Mutations and path listing
//! - `fts` - FTS5 query sanitization

mod fts;
mod ops;
mod rows;

pub use fts::{normalize_for_fts, sanitize_fts_query, tokenize_identifier};
pub use rows::{FragmentRow, ScoredRow, StoredFragment, StoreError};

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tokio::runtime::Runtime;

use crate::hnsw::HnswIndex;
use crate::index::VectorIndex;
use crate::math::cosine_similarity;
use crate::EMBEDDING_DIM;

use rows::{clamp_line, dense_slice};

/// Row count above which vector search builds and uses the HNSW index.
pub const HNSW_THRESHOLD: u64 = 4096;

/// Thread-safe SQLite store for fragment rows
///
/// Uses sqlx connection pooling with WAL mode for crash safety. All methods
/// are synchronous but internally use an async runtime to execute sqlx
/// operations.
///
/// # Example
///
/// ```no_run
/// use osgrep::Store;
/// use std::path::Path;
///
/// let store = Store::open_or_create(Path::new("/tmp/osgrep-data"), "demo")?;
/// println!("{} fragments", store.count()?);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) rt: Runtime,
    db_path: PathBuf,
    /// In-memory vector index, built by `create_vector_index`, invalidated
    /// by writes
    vector_index: RwLock<Option<Arc<HnswIndex>>>,
    /// Whether close() has already been called (skip WAL checkpoint in Drop)
    closed: AtomicBool,
}

impl Store {
    /// Open a named store under the data directory, creating and migrating
    /// it as needed. A dense-dimension mismatch against the recorded schema
    /// drops and recreates the tables.
    pub fn open_or_create(data_dir: &Path, name: &str) -> Result<Self, StoreError> {
        let dir = data_dir.join("data").join(name);
        std::fs::create_dir_all(&dir)?;
        let db_path = dir.join("index.db");
        Self::open_path(&db_path)
    }

    /// Open a store from an explicit database path (tests and tools).
    pub fn open_path(db_path: &Path) -> Result<Self, StoreError> {
        let rt = Runtime::new().map_err(|e| StoreError::Runtime(e.to_string()))?;

        // Forward slashes for URL compatibility (Windows backslashes break)
        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{}?mode=rwc", path_str);

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .idle_timeout(std::time::Duration::from_secs(300))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        // WAL mode: concurrent reads, single writer
                        sqlx::query("PRAGMA journal_mode = WAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA busy_timeout = 5000")
                            .execute(&mut *conn)
                            .await?;
                        // NORMAL sync: fsync on WAL checkpoint only (safe with WAL)
                        sqlx::query("PRAGMA synchronous = NORMAL")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA cache_size = -16384")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA temp_store = MEMORY")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA mmap_size = 268435456")
                            .execute(&mut *conn)
                            .await?;
                        Ok(())
                    })
                })
                .connect(&db_url)
                .await
        })?;

        let store = Self {
            pool,
            rt,
            db_path: db_path.to_path_buf(),
            vector_index: RwLock::new(None),
            closed: AtomicBool::new(false),
        };

        store.ensure_schema()?;
        store.check_dimensions()?;

        tracing::info!(path = %db_path.display(), "Store opened");
        Ok(store)
    }

    /// Remove a named store's files entirely.
    pub fn drop_store(data_dir: &Path, name: &str) -> Result<(), StoreError> {
        let dir = data_dir.join("data").join(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            tracing::info!(store = name, "Store dropped");
        }
        Ok(())
    }

    /// Execute the schema file statement by statement (idempotent).
    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.rt.block_on(async {
            let schema = include_str!("schema.sql");
            for statement in schema.split(';') {
                let stmt: String = statement
                    .lines()
                    .filter(|line| !line.trim().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let stmt = stmt.trim();
                if stmt.is_empty() {
                    continue;
                }
                sqlx::query(stmt).execute(&self.pool).await?;
            }
            Ok(())
        })
    }

    /// Dimension guard: a stored `dimensions` different from the current
    /// model's triggers a full rebuild of the tables.
    fn check_dimensions(&self) -> Result<(), StoreError> {
        let stored: Option<String> = self.get_metadata("dimensions")?;

        match stored.and_then(|s| s.parse::<usize>().ok()) {
            Some(dim) if dim != EMBEDDING_DIM => {
                tracing::warn!(
                    stored = dim,
                    current = EMBEDDING_DIM,
                    "Embedding dimension changed, rebuilding store"
                );
                self.rt.block_on(async {
                    sqlx::query("DROP TABLE IF EXISTS fragments")
                        .execute(&self.pool)
                        .await?;
                    sqlx::query("DROP TABLE IF EXISTS fragments_fts")
                        .execute(&self.pool)
                        .await?;
                    sqlx::query("DELETE FROM metadata").execute(&self.pool).await?;
                    Ok::<_, StoreError>(())
                })?;
                self.ensure_schema()?;
                self.init_metadata()?;
            }
            Some(_) => {}
            None => self.init_metadata()?,
        }
        Ok(())
    }

    fn init_metadata(&self) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.set_metadata("dimensions", &EMBEDDING_DIM.to_string())?;
        self.set_metadata("model_name", crate::embed::MODEL_REPO)?;
        self.set_metadata("created_at", &now)?;
        self.set_metadata("osgrep_version", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }

    /// Read a metadata key (schema bookkeeping, doctor output).
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.rt.block_on(async {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM metadata WHERE key = ?1")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row.map(|(v,)| v))
        })
    }

    /// Write a metadata key. Changing `dimensions` makes the next open
    /// rebuild the tables.
    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.rt.block_on(async {
            sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    /// Drop the cached vector index; the next search or
    /// `create_vector_index` call rebuilds it.
    pub(crate) fn invalidate_vector_index(&self) {
        let mut guard = self.vector_index.write().unwrap_or_else(|p| p.into_inner());
        *guard = None;
    }

    /// Build (or rebuild) the in-memory vector index. Idempotent; a no-op
    /// below [`HNSW_THRESHOLD`] rows. Failures are logged warnings — search
    /// still works through the brute-force path.
    pub fn create_vector_index(&self) -> Result<(), StoreError> {
        let count = self.count()?;
        if count < HNSW_THRESHOLD {
            tracing::debug!(count, threshold = HNSW_THRESHOLD, "Skipping HNSW build");
            return Ok(());
        }
        {
            let guard = self.vector_index.read().unwrap_or_else(|p| p.into_inner());
            if guard.as_ref().is_some_and(|idx| idx.len() as u64 == count) {
                return Ok(());
            }
        }

        let vectors = self.load_all_vectors()?;
        match HnswIndex::build(vectors) {
            Ok(index) => {
                let mut guard = self.vector_index.write().unwrap_or_else(|p| p.into_inner());
                *guard = Some(Arc::new(index));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Vector index build failed, search falls back to scan");
            }
        }
        Ok(())
    }

    /// Rebuild FTS auxiliary structures after bulk load. Idempotent;
    /// failures are logged warnings (search still works, slower).
    pub fn create_fts_index(&self) -> Result<(), StoreError> {
        let result = self.rt.block_on(async {
            sqlx::query("INSERT INTO fragments_fts(fragments_fts) VALUES('optimize')")
                .execute(&self.pool)
                .await
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "FTS optimize failed");
        }
        Ok(())
    }

    fn load_all_vectors(&self) -> Result<Vec<(String, Vec<f32>)>, StoreError> {
        self.rt.block_on(async {
            let rows = sqlx::query("SELECT id, dense FROM fragments")
                .fetch_all(&self.pool)
                .await?;
            let mut vectors = Vec::with_capacity(rows.len());
            for row in rows {
                let id: String = row.get(0);
                let blob: Vec<u8> = row.get(1);
                match dense_slice(&blob) {
                    Some(v) => vectors.push((id, v.to_vec())),
                    None => tracing::warn!(id = %id, "Skipping row with corrupt dense blob"),
                }
            }
            Ok(vectors)
        })
    }

    /// Approximate nearest-neighbor search, cosine over L2-normalized
    /// vectors. Uses the HNSW index when built, brute-force otherwise.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        if query.len() != EMBEDDING_DIM {
            return Err(StoreError::DimensionMismatch(query.len(), EMBEDDING_DIM));
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let cached = {
            let guard = self.vector_index.read().unwrap_or_else(|p| p.into_inner());
            guard.clone()
        };

        if let Some(index) = cached {
            return self.search_vector_indexed(&index, query, k, path_prefix);
        }
        self.search_vector_scan(query, k, path_prefix)
    }

    fn search_vector_indexed(
        &self,
        index: &HnswIndex,
        query: &[f32],
        k: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        // Over-fetch when filtering by prefix: matches outside the prefix
        // are discarded after the fact.
        let fetch = if path_prefix.is_some() { k * 8 } else { k };
        let hits = VectorIndex::search(index, query, fetch.max(k));
        if hits.is_empty() {
            return Ok(vec![]);
        }

        let mut rows = self.fetch_rows_by_ids(hits.iter().map(|h| h.id.as_str()))?;
        if let Some(prefix) = path_prefix {
            rows.retain(|(_, frag)| frag.path.starts_with(prefix));
        }

        let by_id: std::collections::HashMap<String, StoredFragment> = rows.into_iter().collect();
        let mut results = Vec::with_capacity(k);
        for hit in hits {
            if let Some(fragment) = by_id.get(&hit.id) {
                results.push(ScoredRow {
                    fragment: fragment.clone(),
                    score: hit.score,
                });
                if results.len() >= k {
                    break;
                }
            }
        }
        Ok(results)
    }

    fn search_vector_scan(
        &self,
        query: &[f32],
        k: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let sql = match path_prefix {
            Some(_) => {
                "SELECT id, path, kind, start_line, end_line, is_anchor, text, context_len, dense
                 FROM fragments WHERE path LIKE ?1 || '%'"
            }
            None => {
                "SELECT id, path, kind, start_line, end_line, is_anchor, text, context_len, dense
                 FROM fragments"
            }
        };

        self.rt.block_on(async {
            let mut query_builder = sqlx::query(sql);
            if let Some(prefix) = path_prefix {
                query_builder = query_builder.bind(prefix.to_string());
            }
            let rows = query_builder.fetch_all(&self.pool).await?;

            // Min-heap of (score, insertion index) keeps the top-k while
            // scanning without sorting the full table.
            let mut heap: BinaryHeap<Reverse<(ordered::F32, usize)>> = BinaryHeap::new();
            let mut fragments: Vec<(StoredFragment, f32)> = Vec::new();

            for row in rows {
                let blob: Vec<u8> = row.get(8);
                let Some(vector) = dense_slice(&blob) else {
                    continue;
                };
                let Some(score) = cosine_similarity(query, vector) else {
                    continue;
                };
                let fragment = row_to_fragment(&row);
                let idx = fragments.len();
                fragments.push((fragment, score));
                heap.push(Reverse((ordered::F32(score), idx)));
                if heap.len() > k {
                    heap.pop();
                }
            }

            let mut picked: Vec<usize> = heap.into_iter().map(|Reverse((_, idx))| idx).collect();
            picked.sort_by(|a, b| {
                fragments[*b]
                    .1
                    .total_cmp(&fragments[*a].1)
                    .then(a.cmp(b))
            });

            Ok(picked
                .into_iter()
                .map(|idx| ScoredRow {
                    fragment: fragments[idx].0.clone(),
                    score: fragments[idx].1,
                })
                .collect())
        })
    }

    /// BM25-style keyword search over the text column.
    pub fn search_fts(
        &self,
        query_text: &str,
        k: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ScoredRow>, StoreError> {
        let sanitized = sanitize_fts_query(query_text);
        if sanitized.is_empty() {
            tracing::debug!(query = %query_text, "Query sanitized to empty, no FTS results");
            return Ok(vec![]);
        }

        let sql = match path_prefix {
            Some(_) => {
                "SELECT f.id, f.path, f.kind, f.start_line, f.end_line, f.is_anchor, f.text, f.context_len,
                        bm25(fragments_fts) AS rank
                 FROM fragments f
                 JOIN fragments_fts ON f.id = fragments_fts.id
                 WHERE fragments_fts MATCH ?1 AND f.path LIKE ?2 || '%'
                 ORDER BY rank LIMIT ?3"
            }
            None => {
                "SELECT f.id, f.path, f.kind, f.start_line, f.end_line, f.is_anchor, f.text, f.context_len,
                        bm25(fragments_fts) AS rank
                 FROM fragments f
                 JOIN fragments_fts ON f.id = fragments_fts.id
                 WHERE fragments_fts MATCH ?1
                 ORDER BY rank LIMIT ?2"
            }
        };

        self.rt.block_on(async {
            let mut query_builder = sqlx::query(sql).bind(&sanitized);
            if let Some(prefix) = path_prefix {
                query_builder = query_builder.bind(prefix.to_string());
            }
            let rows = query_builder.bind(k as i64).fetch_all(&self.pool).await?;

            Ok(rows
                .iter()
                .map(|row| {
                    let rank: f64 = row.get(8);
                    ScoredRow {
                        fragment: row_to_fragment(row),
                        // bm25() returns lower-is-better; negate for a
                        // higher-is-better score
                        score: (-rank) as f32,
                    }
                })
                .collect())
        })
    }

    fn fetch_rows_by_ids<'a>(
        &self,
        ids: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<(String, StoredFragment)>, StoreError> {
        let ids: Vec<&str> = ids.collect();
        if ids.is_empty() {
            return Ok(vec![]);
        }
        // SQLite parameter limit is ~999; chunk well below it
        self.rt.block_on(async {
            let mut out = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(256) {
                let placeholders: Vec<String> =
                    (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "SELECT id, path, kind, start_line, end_line, is_anchor, text, context_len
                     FROM fragments WHERE id IN ({})",
                    placeholders.join(",")
                );
                let mut query_builder = sqlx::query(&sql);
                for id in chunk {
                    query_builder = query_builder.bind(*id);
                }
                let rows = query_builder.fetch_all(&self.pool).await?;
                for row in &rows {
                    let fragment = row_to_fragment(row);
                    out.push((fragment.id.clone(), fragment));
                }
            }
            Ok(out)
        })
    }

    /// Gracefully close the store, performing a WAL checkpoint.
    pub fn close(self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.rt.block_on(async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await?;
            tracing::debug!("WAL checkpoint completed");
            self.pool.close().await;
            Ok(())
        })
    }

    /// Database file location (doctor output).
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return; // Already checkpointed in close()
        }
        // Best-effort WAL checkpoint; Drop can't fail, and block_on may
        // panic if dropped inside an async context, hence catch_unwind.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            if let Err(e) = self.rt.block_on(async {
                sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                    .execute(&self.pool)
                    .await
            }) {
                tracing::debug!(error = %e, "WAL checkpoint on drop failed (non-fatal)");
            }
        }));
    }
}

pub(crate) fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> StoredFragment {
    let kind_str: String = row.get(2);
    StoredFragment {
        id: row.get(0),
        path: row.get(1),
        kind: kind_str.parse().unwrap_or(crate::FragmentKind::Block),
        start_line: clamp_line(row.get::<i64, _>(3)),
        end_line: clamp_line(row.get::<i64, _>(4)),
        is_anchor: row.get::<i64, _>(5) != 0,
        text: row.get(6),
        context_len: clamp_line(row.get::<i64, _>(7)),
    }
}

/// Total-ordered f32 wrapper for heap membership.
mod ordered {
    #[derive(PartialEq)]
    pub(super) struct F32(pub f32);

    impl Eq for F32 {}

    impl PartialOrd for F32 {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for F32 {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.total_cmp(&other.0)
        }
    }
}
