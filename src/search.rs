//! Hybrid retrieval: candidate gathering, RRF fusion, reranking, boosts
//!
//! Dense and keyword candidates are fused with Reciprocal Rank Fusion
//! (k=60), the top of the fused list is rescored by the cross-encoder, and
//! the blended score gets a small kind-dependent structural boost before the
//! per-file cap and final truncation.

use thiserror::Error;

use crate::chunker::FragmentKind;
use crate::embed::{EmbeddingProvider, PoolError};
use crate::math::min_max_normalize;
use crate::store::{ScoredRow, Store, StoreError};

/// RRF constant from the original paper; higher K smooths rank differences.
const RRF_K: f32 = 60.0;

/// How many fused candidates the cross-encoder rescores.
const RERANK_WINDOW: usize = 50;

/// Blend weights between reranker probability and normalized RRF.
const RERANK_WEIGHT: f32 = 0.7;
const RRF_WEIGHT: f32 = 0.3;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Embedding error: {0}")]
    Embed(#[from] PoolError),
}

/// Search options. Defaults: 10 results, reranking on, one match per file.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub path_prefix: Option<String>,
    pub rerank: bool,
    pub per_file: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            top_k: 10,
            path_prefix: None,
            rerank: true,
            per_file: 1,
        }
    }
}

/// A ranked, file-anchored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: FragmentKind,
    /// Fragment text with the context preamble stripped
    pub text: String,
    pub score: f32,
    pub is_anchor: bool,
}

struct Candidate {
    row: ScoredRow,
    rrf: f32,
    /// Reranker probability; None outside the rerank window
    rerank_p: Option<f32>,
    final_score: f32,
}

/// Retrieval front-end over a store and an embedding provider.
pub struct Searcher<'a> {
    store: &'a Store,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> Searcher<'a> {
    pub fn new(store: &'a Store, embedder: &'a dyn EmbeddingProvider) -> Self {
        Searcher { store, embedder }
    }

    /// Run a hybrid search and return up to `top_k` ranked hits.
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let _span = tracing::info_span!("search", query_len = query.len()).entered();
        if options.top_k == 0 || query.trim().is_empty() {
            return Ok(vec![]);
        }

        // 1. Encode the query (the provider applies the model's prefix)
        let encoded = self.embedder.embed_query(query)?;

        // 2. Gather candidates from both sides
        let candidate_depth = 50.max(5 * options.top_k);
        let prefix = options.path_prefix.as_deref();
        let vector_hits = self
            .store
            .search_vector(&encoded.dense, candidate_depth, prefix)?;
        let fts_hits = self.store.search_fts(query, candidate_depth, prefix)?;
        tracing::debug!(
            vector = vector_hits.len(),
            fts = fts_hits.len(),
            "Candidates gathered"
        );

        // 3. Reciprocal-rank fusion
        let mut candidates = fuse(vector_hits, fts_hits);
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        // 4.–5. Rerank the top of the fused list and blend
        self.score_candidates(query, &mut candidates, options.rerank);

        // 6. Structural boost
        for cand in &mut candidates {
            cand.final_score *= kind_boost(cand.row.fragment.kind);
        }

        // Stable sort: equal scores keep the order established by blending
        candidates.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));

        // 7. Per-file cap, then truncate
        let mut per_path: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        let mut hits = Vec::with_capacity(options.top_k);
        for cand in &candidates {
            let count = per_path.entry(cand.row.fragment.path.as_str()).or_insert(0);
            if *count >= options.per_file.max(1) {
                continue;
            }
            *count += 1;
            hits.push(SearchHit {
                path: cand.row.fragment.path.clone(),
                start_line: cand.row.fragment.start_line,
                end_line: cand.row.fragment.end_line,
                kind: cand.row.fragment.kind,
                text: cand.row.fragment.display_text().to_string(),
                score: cand.final_score,
                is_anchor: cand.row.fragment.is_anchor,
            });
            if hits.len() >= options.top_k {
                break;
            }
        }
        Ok(hits)
    }

    /// Compute blended scores. The rerank window is the top
    /// `min(|candidates|, 50)` by RRF; rows outside it rank strictly after
    /// the window so enabling the reranker only reorders within it.
    fn score_candidates(&self, query: &str, candidates: &mut [Candidate], rerank: bool) {
        // Window selection by RRF, stable over insertion order
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| candidates[b].rrf.total_cmp(&candidates[a].rrf));
        let window: Vec<usize> = order
            .iter()
            .copied()
            .take(RERANK_WINDOW.min(candidates.len()))
            .collect();

        if rerank {
            let texts: Vec<String> = window
                .iter()
                .map(|&i| candidates[i].row.fragment.text.clone())
                .collect();
            match self.embedder.rerank(query, &texts) {
                Ok(probs) if probs.len() == texts.len() => {
                    for (&i, p) in window.iter().zip(probs) {
                        candidates[i].rerank_p = Some(p);
                    }
                }
                Ok(probs) => {
                    tracing::warn!(
                        expected = texts.len(),
                        got = probs.len(),
                        "Reranker returned wrong count, falling back to RRF scores"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reranker unavailable, falling back to RRF scores");
                }
            }
        }

        let rrf_scores: Vec<f32> = candidates.iter().map(|c| c.rrf).collect();
        let normalized = min_max_normalize(&rrf_scores);

        // Out-of-window rows blend with p = 0. The window holds the highest
        // RRF values, so its min-max terms dominate and out-of-window rows
        // never overtake the window.
        let window_set: std::collections::HashSet<usize> = window.into_iter().collect();
        for (i, cand) in candidates.iter_mut().enumerate() {
            let p = if window_set.contains(&i) {
                cand.rerank_p.unwrap_or(cand.rrf)
            } else {
                0.0
            };
            cand.final_score = RERANK_WEIGHT * p + RRF_WEIGHT * normalized[i];
        }
    }
}

/// Fuse two ranked candidate lists with RRF. Insertion order (vector list
/// first, then new keyword rows) defines tie-break order downstream.
fn fuse(vector_hits: Vec<ScoredRow>, fts_hits: Vec<ScoredRow>) -> Vec<Candidate> {
    let mut by_id: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut candidates: Vec<Candidate> = Vec::with_capacity(vector_hits.len() + fts_hits.len());

    for (rank, row) in vector_hits.into_iter().enumerate() {
        let id = row.fragment.id.clone();
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        match by_id.get(&id) {
            Some(&idx) => candidates[idx].rrf += contribution,
            None => {
                by_id.insert(id, candidates.len());
                candidates.push(Candidate {
                    row,
                    rrf: contribution,
                    rerank_p: None,
                    final_score: 0.0,
                });
            }
        }
    }

    for (rank, row) in fts_hits.into_iter().enumerate() {
        let id = row.fragment.id.clone();
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        match by_id.get(&id) {
            Some(&idx) => candidates[idx].rrf += contribution,
            None => {
                by_id.insert(id, candidates.len());
                candidates.push(Candidate {
                    row,
                    rrf: contribution,
                    rerank_p: None,
                    final_score: 0.0,
                });
            }
        }
    }

    candidates
}

/// Small multiplicative factor rewarding structurally meaningful fragments.
fn kind_boost(kind: FragmentKind) -> f32 {
    match kind {
        FragmentKind::Function | FragmentKind::Class | FragmentKind::Method => 1.10,
        FragmentKind::Anchor => 1.05,
        FragmentKind::Block => 1.00,
        FragmentKind::Fallback => 0.95,
    }
}
