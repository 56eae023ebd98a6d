//! Worker pool: serialized dispatch, deadlines, retry, memory recycling
//!
//! Model sessions are not reentrant, so each worker serves at most one
//! in-flight request, enforced by a per-worker mutex queue. Scaling
//! concurrency means more workers, each owning its own session.
//!
//! Contracts:
//! - every request has a deadline; expiry rejects the request and recycles
//!   the worker
//! - one automatic retry after a worker restart; a request id observed
//!   across three consecutive recycles is rejected permanently (runaway
//!   input, typically a pathologically large file)
//! - a reply whose observed RSS exceeds the memory threshold recycles the
//!   worker after the reply is delivered
//! - recycling never blocks new enqueues; the next request lazily spawns a
//!   fresh worker

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;

use super::worker::{ReplyBody, WorkerHandle, WorkerRequest};
use super::{EmbeddingProvider, HybridEmbedding, QueryEmbedding};
use crate::config::Config;

/// Consecutive recycles after which a request id is rejected for good.
const MAX_STRIKES: u32 = 3;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Request rejected after {MAX_STRIKES} worker recycles (runaway input)")]
    Runaway,
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Pool is shutting down")]
    ShuttingDown,
}

/// Pool tuning knobs, resolved from [`Config`] and system RAM.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub timeout: Duration,
    /// Worker RSS recycle threshold in bytes
    pub memory_cap: u64,
    pub models_dir: PathBuf,
}

impl PoolConfig {
    /// Resolve from runtime config: explicit memory override or 50% of
    /// system RAM.
    pub fn from_config(config: &Config) -> PoolConfig {
        let memory_cap = config.worker_memory_cap.unwrap_or_else(|| {
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            let total = sys.total_memory();
            if total == 0 {
                // RAM unknown: pick a conservative fixed cap
                4 * 1024 * 1024 * 1024
            } else {
                total / 2
            }
        });
        PoolConfig {
            workers: 1,
            timeout: config.worker_timeout,
            memory_cap,
            models_dir: config.models_dir(),
        }
    }
}

struct Slot {
    handle: Option<WorkerHandle>,
}

/// Internal attempt outcome: recycles are retried, the rest surface as-is.
enum RetryableError {
    Recycled(String),
    Fatal(PoolError),
}

/// Pool of embedding workers implementing [`EmbeddingProvider`].
///
/// # Example
///
/// ```no_run
/// use osgrep::embed::{PoolConfig, WorkerPool};
/// use osgrep::{Config, EmbeddingProvider};
///
/// let pool = WorkerPool::new(PoolConfig::from_config(&Config::load()));
/// let query = pool.embed_query("parse configuration file")?;
/// assert_eq!(query.dense.len(), osgrep::EMBEDDING_DIM);
/// # Ok::<(), osgrep::embed::PoolError>(())
/// ```
pub struct WorkerPool {
    slots: Vec<Mutex<Slot>>,
    next_slot: AtomicUsize,
    next_request: AtomicU64,
    /// request id -> consecutive recycle count
    strikes: Mutex<HashMap<u64, u32>>,
    config: PoolConfig,
    shutting_down: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> WorkerPool {
        let workers = config.workers.max(1);
        WorkerPool {
            slots: (0..workers).map(|_| Mutex::new(Slot { handle: None })).collect(),
            next_slot: AtomicUsize::new(0),
            next_request: AtomicU64::new(1),
            strikes: Mutex::new(HashMap::new()),
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Drain the queues, post shutdown messages, and join worker threads.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for slot in &self.slots {
            let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(handle) = guard.handle.take() {
                handle.shutdown();
            }
        }
        tracing::debug!("Worker pool shut down");
    }

    /// Dispatch a request to a worker, retrying once per recycle until the
    /// strike limit permanently rejects it.
    fn dispatch(&self, make_request: impl Fn(u64) -> WorkerRequest) -> Result<ReplyBody, PoolError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);

        loop {
            if self.strike_count(request_id) >= MAX_STRIKES {
                self.clear_strikes(request_id);
                return Err(PoolError::Runaway);
            }

            match self.try_once(request_id, &make_request) {
                Ok(body) => {
                    self.clear_strikes(request_id);
                    return Ok(body);
                }
                Err(RetryableError::Fatal(e)) => {
                    self.clear_strikes(request_id);
                    return Err(e);
                }
                Err(RetryableError::Recycled(reason)) => {
                    let strikes = self.add_strike(request_id);
                    tracing::warn!(
                        request_id,
                        strikes,
                        reason = %reason,
                        "Worker recycled, retrying request"
                    );
                }
            }
        }
    }

    /// One attempt: pick a slot, lock it (serializing in-flight requests),
    /// send, await the reply within the deadline.
    ///
    /// The handle is taken out of the slot for the duration of the request
    /// and only put back when the worker stays healthy; dropping it is the
    /// recycle (the thread notices its closed channels and exits).
    fn try_once(
        &self,
        request_id: u64,
        make_request: &impl Fn(u64) -> WorkerRequest,
    ) -> Result<ReplyBody, RetryableError> {
        let slot_idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[slot_idx]
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        // Lazy spawn: recycled slots get a fresh worker on next use
        let handle = match slot.handle.take() {
            Some(handle) => handle,
            None => WorkerHandle::spawn(self.config.models_dir.clone()),
        };

        if handle.tx.send(make_request(request_id)).is_err() {
            return Err(RetryableError::Recycled("worker channel closed".into()));
        }

        loop {
            match handle.rx.recv_timeout(self.config.timeout) {
                Ok(reply) if reply.id != request_id => {
                    // Stale reply from before a recycle; drain and keep waiting
                    tracing::debug!(got = reply.id, want = request_id, "Dropping stale reply");
                    continue;
                }
                Ok(reply) => {
                    if reply.rss_bytes > self.config.memory_cap {
                        tracing::info!(
                            rss = reply.rss_bytes,
                            cap = self.config.memory_cap,
                            "Worker above memory threshold, recycling after reply"
                        );
                        // Handle dropped here: recycle after the reply
                    } else {
                        slot.handle = Some(handle);
                    }
                    return match reply.result {
                        Ok(body) => Ok(body),
                        Err(e) => Err(RetryableError::Fatal(PoolError::Worker(e))),
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(RetryableError::Recycled(format!(
                        "timeout after {:?}",
                        self.config.timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RetryableError::Recycled("worker thread died".into()));
                }
            }
        }
    }

    fn strike_count(&self, request_id: u64) -> u32 {
        let strikes = self.strikes.lock().unwrap_or_else(|p| p.into_inner());
        strikes.get(&request_id).copied().unwrap_or(0)
    }

    fn add_strike(&self, request_id: u64) -> u32 {
        let mut strikes = self.strikes.lock().unwrap_or_else(|p| p.into_inner());
        let count = strikes.entry(request_id).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_strikes(&self, request_id: u64) {
        let mut strikes = self.strikes.lock().unwrap_or_else(|p| p.into_inner());
        strikes.remove(&request_id);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shutting_down.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

impl EmbeddingProvider for WorkerPool {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<HybridEmbedding>, PoolError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let texts = texts.to_vec();
        match self.dispatch(move |id| WorkerRequest::Hybrid {
            id,
            texts: texts.clone(),
        })? {
            ReplyBody::Hybrid(out) => Ok(out),
            _ => Err(PoolError::Worker("unexpected reply kind".into())),
        }
    }

    fn embed_query(&self, text: &str) -> Result<QueryEmbedding, PoolError> {
        let text = text.to_string();
        match self.dispatch(move |id| WorkerRequest::Query {
            id,
            text: text.clone(),
        })? {
            ReplyBody::Query(out) => Ok(out),
            _ => Err(PoolError::Worker("unexpected reply kind".into())),
        }
    }

    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, PoolError> {
        if documents.is_empty() {
            return Ok(vec![]);
        }
        let query = query.to_string();
        let documents = documents.to_vec();
        match self.dispatch(move |id| WorkerRequest::Rerank {
            id,
            query: query.clone(),
            documents: documents.clone(),
        })? {
            ReplyBody::Rerank(out) => Ok(out),
            _ => Err(PoolError::Worker("unexpected reply kind".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            workers: 1,
            timeout: Duration::from_millis(timeout_ms),
            memory_cap: u64::MAX,
            models_dir: PathBuf::from("/nonexistent/osgrep-models"),
        }
    }

    #[test]
    fn test_pool_rejects_after_shutdown() {
        let pool = WorkerPool::new(test_config(100));
        pool.shutdown();
        let err = pool.embed_query("hello").unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
    }

    #[test]
    fn test_strike_bookkeeping() {
        let pool = WorkerPool::new(test_config(100));
        assert_eq!(pool.strike_count(7), 0);
        assert_eq!(pool.add_strike(7), 1);
        assert_eq!(pool.add_strike(7), 2);
        assert_eq!(pool.strike_count(7), 2);
        pool.clear_strikes(7);
        assert_eq!(pool.strike_count(7), 0);
    }

    #[test]
    fn test_empty_inputs_short_circuit() {
        // Empty batches must not touch a worker at all (no models needed)
        let pool = WorkerPool::new(test_config(50));
        assert!(pool.embed_documents(&[]).unwrap().is_empty());
        assert!(pool.rerank("q", &[]).unwrap().is_empty());
    }
}
