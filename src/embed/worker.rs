//! Worker thread owning one encoder session
//!
//! Workers receive requests over a bounded channel and reply with the
//! result plus their observed RSS, so the pool can apply its memory policy.
//! The session loads lazily on the worker thread; a load failure turns
//! every request into an error reply rather than killing the process.

use std::path::PathBuf;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::session::EncoderSession;
use super::{HybridEmbedding, QueryEmbedding};

pub(crate) enum WorkerRequest {
    Hybrid { id: u64, texts: Vec<String> },
    Query { id: u64, text: String },
    Rerank { id: u64, query: String, documents: Vec<String> },
    Shutdown,
}

pub(crate) enum ReplyBody {
    Hybrid(Vec<HybridEmbedding>),
    Query(QueryEmbedding),
    Rerank(Vec<f32>),
}

pub(crate) struct WorkerReply {
    pub id: u64,
    pub result: Result<ReplyBody, String>,
    /// Worker-observed resident set size, for the pool's memory policy
    pub rss_bytes: u64,
}

/// Handle to a live worker thread. Dropping the handle closes the request
/// channel; the thread exits once its current request (if any) completes.
pub(crate) struct WorkerHandle {
    pub tx: Sender<WorkerRequest>,
    pub rx: Receiver<WorkerReply>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker thread. The encoder session loads on first request.
    pub fn spawn(models_dir: PathBuf) -> WorkerHandle {
        let (req_tx, req_rx) = bounded::<WorkerRequest>(1);
        let (reply_tx, reply_rx) = bounded::<WorkerReply>(1);

        let thread = std::thread::Builder::new()
            .name("osgrep-worker".into())
            .spawn(move || worker_loop(models_dir, req_rx, reply_tx))
            .ok();

        WorkerHandle {
            tx: req_tx,
            rx: reply_rx,
            thread,
        }
    }

    /// Post a shutdown message and wait for the thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(WorkerRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Best-effort: the recycled thread may be stuck in inference; it
        // notices the closed channel when it tries to reply and exits.
        let _ = self.tx.try_send(WorkerRequest::Shutdown);
        self.thread.take();
    }
}

fn worker_loop(
    models_dir: PathBuf,
    requests: Receiver<WorkerRequest>,
    replies: Sender<WorkerReply>,
) {
    let mut session: Option<Result<EncoderSession, String>> = None;
    let mut sys = sysinfo::System::new();

    for request in requests {
        let id = match &request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Hybrid { id, .. }
            | WorkerRequest::Query { id, .. }
            | WorkerRequest::Rerank { id, .. } => *id,
        };

        // Lazy session load, once per worker lifetime
        let loaded = session.get_or_insert_with(|| {
            EncoderSession::load(&models_dir).map_err(|e| {
                tracing::error!(error = %e, "Worker failed to load encoder session");
                e.to_string()
            })
        });

        let result = match loaded {
            Err(e) => Err(e.clone()),
            Ok(sess) => match request {
                WorkerRequest::Hybrid { texts, .. } => sess
                    .embed_documents(&texts)
                    .map(ReplyBody::Hybrid)
                    .map_err(|e| e.to_string()),
                WorkerRequest::Query { text, .. } => sess
                    .embed_query(&text)
                    .map(ReplyBody::Query)
                    .map_err(|e| e.to_string()),
                WorkerRequest::Rerank { query, documents, .. } => sess
                    .rerank(&query, &documents)
                    .map(ReplyBody::Rerank)
                    .map_err(|e| e.to_string()),
                WorkerRequest::Shutdown => break,
            },
        };

        let reply = WorkerReply {
            id,
            result,
            rss_bytes: current_rss_bytes(&mut sys),
        };
        if replies.send(reply).is_err() {
            // Pool recycled this worker while we were busy
            break;
        }
    }
    tracing::debug!("Worker thread exiting");
}

/// Own-process resident set size in bytes.
pub(crate) fn current_rss_bytes(sys: &mut sysinfo::System) -> u64 {
    let pid = sysinfo::Pid::from_u32(std::process::id());
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}
