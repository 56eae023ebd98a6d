//! Long-lived watcher/server variant of the pipeline
//!
//! Serves authenticated search over localhost HTTP while a watcher streams
//! file-change events into the same ingest path. Self-governs memory: warns
//! above one threshold (rate-limited), hands off to a replacement process
//! above another.
//!
//! Split into submodules:
//! - `lock` — `.osgrep/server.lock` discovery file
//! - `memory` — warning/restart thresholds
//! - `watch` — debounced file-event ingest

pub mod lock;
pub mod memory;
pub mod watch;

pub use lock::ServerLock;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::embed::{EmbeddingProvider, PoolConfig, WorkerPool};
use crate::meta::MetaStore;
use crate::search::{SearchOptions, Searcher};
use crate::store::Store;
use crate::sync::{SyncEngine, SyncOptions, SyncProgress};

use memory::{MemoryAction, MemoryGovernor};

/// Request body cap (JSON search requests are tiny; anything bigger is abuse).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// How long `/search` waits for the initial index before answering
/// "try again".
const INDEXING_WAIT: Duration = Duration::from_secs(5);

/// Memory poll cadence.
const MEMORY_POLL: Duration = Duration::from_secs(30);

/// Parent liveness poll cadence.
const PARENT_POLL: Duration = Duration::from_secs(2);

/// Options for `osgrep serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub port: u16,
    pub parent_pid: Option<u32>,
}

/// Shared indexing state surfaced through `/search` responses.
pub struct IndexingStatus {
    active: AtomicBool,
    percent: AtomicU8,
}

impl IndexingStatus {
    fn new() -> IndexingStatus {
        IndexingStatus {
            active: AtomicBool::new(true),
            percent: AtomicU8::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::SeqCst)
    }

    fn set_percent(&self, percent: u8) {
        self.percent.store(percent.min(100), Ordering::SeqCst);
    }

    fn finish(&self) {
        self.percent.store(100, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }
}

struct AppState {
    store: Arc<Store>,
    embedder: Arc<WorkerPool>,
    root: PathBuf,
    auth_token: String,
    indexing: Arc<IndexingStatus>,
}

// ============ Wire protocol ============

fn default_limit() -> usize {
    25
}

fn default_rerank() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_rerank")]
    rerank: bool,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct WireResult {
    path: String,
    score: f32,
    content: String,
    chunk_type: String,
    start_line: u32,
    num_lines: u32,
    is_anchor: bool,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<WireResult>,
    status: String,
    progress: u8,
}

/// Run the server until interrupted, the parent dies, or a memory restart
/// hands off to a replacement process.
pub fn run(config: &Config, root: &Path, options: ServeOptions) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot resolve root {}", root.display()))?;

    let store_name = config
        .store_name
        .clone()
        .unwrap_or_else(|| crate::store_name_for_root(&root));
    let store = Arc::new(
        Store::open_or_create(&config.data_dir, &store_name).context("Cannot open store")?,
    );
    let embedder = Arc::new(WorkerPool::new(PoolConfig::from_config(config)));
    let chunker = Arc::new(Chunker::new().context("Cannot initialize chunker")?);
    let meta = Arc::new(Mutex::new({
        let mut m = MetaStore::load(&config.meta_path());
        m.set_skip_saves(config.skip_meta_save);
        m
    }));

    let auth_token = lock::generate_token();
    let lock_path = ServerLock::new(options.port, auth_token.clone(), &root)
        .write(&root)
        .context("Cannot write server.lock")?;
    tracing::info!(path = %lock_path.display(), port = options.port, "Server lock written");

    let indexing = Arc::new(IndexingStatus::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let restart_requested = Arc::new(AtomicBool::new(false));

    // Initial sync runs in the background; /search reports progress until
    // it completes.
    let sync_handle = {
        let store = Arc::clone(&store);
        let embedder = Arc::clone(&embedder);
        let chunker = Arc::clone(&chunker);
        let meta = Arc::clone(&meta);
        let indexing = Arc::clone(&indexing);
        let cancel = Arc::clone(&cancel);
        let root = root.clone();
        let concurrency = config.sync_concurrency();
        std::thread::spawn(move || {
            let engine = SyncEngine::new(&store, &chunker, embedder.as_ref(), &meta, concurrency);
            let mut callback = |p: SyncProgress| {
                if p.total > 0 {
                    indexing.set_percent(((p.processed * 100) / p.total) as u8);
                }
            };
            if let Err(e) = engine.sync(&root, SyncOptions::default(), &cancel, &mut callback) {
                tracing::error!(error = %e, "Initial sync failed");
            }
            indexing.finish();
        })
    };

    // Watcher starts after the initial sync: the orchestrator and the
    // watcher must not write the same index concurrently.
    let watch_handle = {
        let store = Arc::clone(&store);
        let embedder = Arc::clone(&embedder);
        let chunker = Arc::clone(&chunker);
        let meta = Arc::clone(&meta);
        let indexing = Arc::clone(&indexing);
        let cancel = Arc::clone(&cancel);
        let root = root.clone();
        std::thread::spawn(move || {
            while indexing.is_active() && !cancel.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = watch::watch_loop(
                &root,
                &store,
                &chunker,
                embedder.as_ref(),
                &meta,
                &cancel,
            ) {
                tracing::error!(error = %e, "Watcher failed");
            }
        })
    };

    // Parent liveness: exit when the supplied parent PID disappears.
    if let Some(parent_pid) = options.parent_pid {
        let cancel = Arc::clone(&cancel);
        std::thread::spawn(move || {
            let pid = sysinfo::Pid::from_u32(parent_pid);
            let mut sys = sysinfo::System::new();
            loop {
                std::thread::sleep(PARENT_POLL);
                sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
                if sys.process(pid).is_none() {
                    tracing::info!(parent_pid, "Parent process gone, shutting down");
                    cancel.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });
    }

    // Memory self-governance.
    {
        let cancel = Arc::clone(&cancel);
        let restart_requested = Arc::clone(&restart_requested);
        let mut governor = MemoryGovernor::new(config.server_memory_warn, config.server_memory_restart);
        std::thread::spawn(move || {
            let mut sys = sysinfo::System::new();
            while !cancel.load(Ordering::SeqCst) {
                std::thread::sleep(MEMORY_POLL);
                let rss = crate::embed::process_rss(&mut sys);
                if governor.observe(rss) == MemoryAction::Restart {
                    restart_requested.store(true, Ordering::SeqCst);
                    cancel.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });
    }

    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        embedder: Arc::clone(&embedder),
        root: root.clone(),
        auth_token,
        indexing: Arc::clone(&indexing),
    });

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", options.port))
            .await
            .with_context(|| format!("Cannot bind 127.0.0.1:{}", options.port))?;
        tracing::info!(port = options.port, "Server listening");

        let shutdown_cancel = Arc::clone(&cancel);
        let shutdown = async move {
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupt received, shutting down");
                        shutdown_cancel.store(true, Ordering::SeqCst);
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {
                        if shutdown_cancel.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                }
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok::<_, anyhow::Error>(())
    })?;

    // Shutdown order: watcher first, then the pool, then the store handle.
    cancel.store(true, Ordering::SeqCst);
    let _ = watch_handle.join();
    let _ = sync_handle.join();
    embedder.shutdown();

    if restart_requested.load(Ordering::SeqCst) {
        spawn_replacement(&root, options)?;
        // The replacement rewrites server.lock with its own pid and token
        tracing::info!("Replacement spawned, exiting");
    } else {
        ServerLock::remove_if_owned(&root);
    }
    Ok(())
}

/// Start a replacement server on the same port (memory handoff).
fn spawn_replacement(root: &Path, options: ServeOptions) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("serve")
        .arg("--port")
        .arg(options.port.to_string())
        .arg("--path")
        .arg(root);
    if let Some(pid) = options.parent_pid {
        cmd.arg("--parent-pid").arg(pid.to_string());
    }
    cmd.spawn().context("Cannot spawn replacement server")?;
    Ok(())
}

// ============ Handlers ============

type HandlerError = (StatusCode, Json<serde_json::Value>);

/// Validate the bearer token with a constant-time comparison.
fn validate_auth(headers: &HeaderMap, expected: &str) -> Result<(), HandlerError> {
    let provided = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");

    let valid = provided.len() == expected.len()
        && bool::from(provided.as_bytes().ct_eq(expected.as_bytes()));

    if valid {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or missing token"})),
        ))
    }
}

/// Resolve the request's `path` filter against the repository root,
/// rejecting traversal outside it.
fn validate_scope_path(root: &Path, raw: &str) -> Result<Option<String>, HandlerError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let requested = Path::new(raw);
    let escapes = requested
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(scope_error(raw));
    }

    let full = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    if !full.starts_with(root) {
        return Err(scope_error(raw));
    }
    Ok(Some(full.to_string_lossy().into_owned()))
}

fn scope_error(raw: &str) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": format!("path '{}' escapes the repository root", raw)})),
    )
}

async fn handle_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = validate_auth(&headers, &state.auth_token) {
        return e;
    }
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn handle_search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, HandlerError> {
    validate_auth(&headers, &state.auth_token)?;
    let path_prefix = validate_scope_path(&state.root, &request.path)?;

    // Initial index still running: wait a bounded time, then report
    // progress instead of results.
    let waited = tokio::time::timeout(INDEXING_WAIT, async {
        while state.indexing.is_active() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if waited.is_err() {
        return Ok(Json(SearchResponse {
            results: vec![],
            status: "indexing".into(),
            progress: state.indexing.percent(),
        }));
    }

    let store = Arc::clone(&state.store);
    let embedder = Arc::clone(&state.embedder);
    let options = SearchOptions {
        top_k: request.limit.clamp(1, 200),
        path_prefix,
        rerank: request.rerank,
        per_file: 1,
    };
    let query = request.query.clone();

    let hits = tokio::task::spawn_blocking(move || {
        let provider: &dyn EmbeddingProvider = embedder.as_ref();
        Searcher::new(&store, provider).search(&query, &options)
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("search task failed: {}", e)})),
        )
    })?
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
    })?;

    let results = hits
        .into_iter()
        .map(|hit| WireResult {
            path: hit.path,
            score: hit.score,
            content: hit.text,
            chunk_type: hit.kind.to_string(),
            start_line: hit.start_line,
            num_lines: hit.end_line.saturating_sub(hit.start_line),
            is_anchor: hit.is_anchor,
        })
        .collect();

    Ok(Json(SearchResponse {
        results,
        status: "ready".into(),
        progress: 100,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== validate_auth tests =====

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_auth_valid() {
        assert!(validate_auth(&bearer("secret123"), "secret123").is_ok());
    }

    #[test]
    fn test_auth_invalid() {
        let result = validate_auth(&bearer("wrong"), "secret123");
        let (status, _) = result.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_auth_missing_header() {
        let result = validate_auth(&HeaderMap::new(), "secret123");
        assert!(result.is_err());
    }

    #[test]
    fn test_auth_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic secret123".parse().unwrap());
        assert!(validate_auth(&headers, "secret123").is_err());
    }

    #[test]
    fn test_auth_case_sensitive() {
        assert!(validate_auth(&bearer("SECRET123"), "secret123").is_err());
    }

    // ===== validate_scope_path tests =====

    #[test]
    fn test_scope_empty_is_none() {
        let result = validate_scope_path(Path::new("/repo"), "").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_scope_relative_inside() {
        let result = validate_scope_path(Path::new("/repo"), "src/store").unwrap();
        assert_eq!(result.as_deref(), Some("/repo/src/store"));
    }

    #[test]
    fn test_scope_traversal_rejected() {
        let result = validate_scope_path(Path::new("/repo"), "../../etc");
        let (status, _) = result.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_scope_sneaky_traversal_rejected() {
        assert!(validate_scope_path(Path::new("/repo"), "src/../../etc").is_err());
    }

    #[test]
    fn test_scope_absolute_outside_rejected() {
        assert!(validate_scope_path(Path::new("/repo"), "/etc/passwd").is_err());
    }

    #[test]
    fn test_scope_absolute_inside_allowed() {
        let result = validate_scope_path(Path::new("/repo"), "/repo/src").unwrap();
        assert_eq!(result.as_deref(), Some("/repo/src"));
    }

    // ===== wire protocol defaults =====

    #[test]
    fn test_search_request_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "auth"}"#).unwrap();
        assert_eq!(request.limit, 25);
        assert!(request.rerank);
        assert_eq!(request.path, "");
    }

    #[test]
    fn test_search_request_overrides() {
        let request: SearchRequest =
            serde_json::from_str(r#"{"query": "q", "limit": 5, "rerank": false, "path": "src"}"#)
                .unwrap();
        assert_eq!(request.limit, 5);
        assert!(!request.rerank);
        assert_eq!(request.path, "src");
    }
}
