//! HNSW (Hierarchical Navigable Small World) index for fast vector search
//!
//! Built in memory from the store's vectors after bulk load. Brute-force
//! scanning wins below a few thousand rows, so the store only builds this
//! once the table crosses [`crate::store::HNSW_THRESHOLD`].

use hnsw_rs::anndists::dist::distances::DistCosine;
use hnsw_rs::hnsw::Hnsw;
use thiserror::Error;

use crate::index::{IndexResult, VectorIndex};
use crate::EMBEDDING_DIM;

// HNSW tuning parameters for code search workloads (10k-100k fragments):
// - M=24: connectivity per node, better recall on semantic similarity
// - ef_construction=200: thorough graph construction (one-time cost)
// - ef_search=100: accuracy/speed tradeoff for interactive search
const MAX_NB_CONNECTION: usize = 24;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 100;

#[derive(Error, Debug)]
pub enum HnswError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Build error: {0}")]
    Build(String),
}

/// In-memory HNSW index mapping internal ids to fragment ids.
pub struct HnswIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    id_map: Vec<String>,
}

impl HnswIndex {
    /// Build an index from `(fragment_id, vector)` pairs.
    pub fn build(embeddings: Vec<(String, Vec<f32>)>) -> Result<Self, HnswError> {
        let _span = tracing::info_span!("hnsw_build", count = embeddings.len()).entered();
        if embeddings.is_empty() {
            return Err(HnswError::Build("No embeddings to index".into()));
        }
        for (id, v) in &embeddings {
            if v.len() != EMBEDDING_DIM {
                tracing::warn!(id = %id, len = v.len(), "Rejecting vector with bad dimension");
                return Err(HnswError::DimensionMismatch {
                    expected: EMBEDDING_DIM,
                    actual: v.len(),
                });
            }
        }

        let hnsw = Hnsw::new(
            MAX_NB_CONNECTION,
            embeddings.len(),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine {},
        );

        let mut id_map = Vec::with_capacity(embeddings.len());
        let vectors: Vec<Vec<f32>> = embeddings
            .into_iter()
            .map(|(id, v)| {
                id_map.push(id);
                v
            })
            .collect();
        let data: Vec<(&Vec<f32>, usize)> = vectors.iter().zip(0..).collect();
        hnsw.parallel_insert(&data);

        tracing::info!(vectors = id_map.len(), "HNSW index built");
        Ok(HnswIndex { hnsw, id_map })
    }

    /// Nearest neighbors by cosine similarity, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<IndexResult> {
        if query.len() != EMBEDDING_DIM || k == 0 {
            return vec![];
        }
        let neighbours = self.hnsw.search(query, k, EF_SEARCH);
        neighbours
            .into_iter()
            .filter_map(|n| {
                self.id_map.get(n.d_id).map(|id| IndexResult {
                    id: id.clone(),
                    // hnsw_rs reports cosine distance; convert to similarity
                    score: 1.0 - n.distance,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }
}

impl VectorIndex for HnswIndex {
    fn search(&self, query: &[f32], k: usize) -> Vec<IndexResult> {
        self.search(query, k)
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn name(&self) -> &'static str {
        "HNSW"
    }
}

/// Shared test helper: deterministic normalized embedding from a seed.
#[cfg(test)]
pub(crate) fn make_test_embedding(seed: u32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for (i, val) in v.iter_mut().enumerate() {
        *val = ((seed as f32 * 0.1) + (i as f32 * 0.001)).sin();
    }
    crate::math::normalize_l2(v)
}
