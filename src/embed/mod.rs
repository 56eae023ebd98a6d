//! Embedding workers and the worker pool
//!
//! Each worker owns loaded model state (dense encoder, cross-encoder
//! reranker, optional late-interaction head) and serves three request kinds:
//! document embedding, query embedding, and reranking. The pool serializes
//! dispatch per worker, enforces deadlines, and recycles workers on memory
//! pressure.
//!
//! Split into submodules:
//! - `session` — ONNX sessions, tokenization, pooling, quantization
//! - `worker` — worker thread owning one session
//! - `pool` — dispatch, timeouts, retry, recycling

pub mod pool;
pub mod session;
pub(crate) mod worker;

pub use pool::{PoolConfig, PoolError, WorkerPool};
pub use session::{SessionError, MODEL_REPO, RERANKER_REPO};

/// Own-process resident set size in bytes (shared by workers and the
/// server's memory governor).
pub fn process_rss(sys: &mut sysinfo::System) -> u64 {
    worker::current_rss_bytes(sys)
}

use serde::{Deserialize, Serialize};

/// Quantized late-interaction matrix: `rows × cols` int8 values plus the
/// scale used for dequantization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatePayload {
    pub rows: u32,
    pub cols: u32,
    /// Row-major int8 values stored as raw bytes
    pub data: Vec<u8>,
    /// Multiply a dequantized int8 value by this to recover the float
    pub scale: f32,
}

impl LatePayload {
    /// Quantize a row-major float matrix to int8 with a per-matrix scale.
    pub fn quantize(matrix: &[Vec<f32>]) -> Option<LatePayload> {
        let rows = matrix.len();
        let cols = matrix.first().map(Vec::len)?;
        if rows == 0 || cols == 0 {
            return None;
        }

        let max_abs = matrix
            .iter()
            .flat_map(|row| row.iter())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        let scale = if max_abs == 0.0 { 1.0 } else { max_abs / 127.0 };

        let mut data = Vec::with_capacity(rows * cols);
        for row in matrix {
            if row.len() != cols {
                return None;
            }
            for &v in row {
                let q = (v / scale).round().clamp(-127.0, 127.0) as i8;
                data.push(q as u8);
            }
        }

        Some(LatePayload {
            rows: rows as u32,
            cols: cols as u32,
            data,
            scale,
        })
    }

    /// Recover the float matrix (lossy by one quantization step).
    pub fn dequantize(&self) -> Vec<Vec<f32>> {
        let cols = self.cols as usize;
        self.data
            .chunks_exact(cols)
            .map(|row| row.iter().map(|&b| (b as i8) as f32 * self.scale).collect())
            .collect()
    }
}

/// Per-document embedding result: dense vector plus optional quantized
/// late-interaction payload.
#[derive(Debug, Clone)]
pub struct HybridEmbedding {
    /// CLS-pooled, L2-normalized dense vector of length [`crate::EMBEDDING_DIM`]
    pub dense: Vec<f32>,
    /// Quantized per-token matrix; absent when the encoder has no token head
    pub late: Option<LatePayload>,
}

/// Query-side embedding: dense vector plus unquantized token matrix.
#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    pub dense: Vec<f32>,
    pub late: Option<Vec<Vec<f32>>>,
}

/// The seam between orchestration (sync, search, server) and model
/// execution. The production implementation is [`WorkerPool`]; tests plug in
/// deterministic mocks.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed documents for storage. One result per input text.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<HybridEmbedding>, PoolError>;

    /// Embed a search query (query prefix applied by the implementation).
    fn embed_query(&self, text: &str) -> Result<QueryEmbedding, PoolError>;

    /// Cross-encoder probabilities for `(query, document)` pairs, one per
    /// document, in input order.
    fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, PoolError>;
}
