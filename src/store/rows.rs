//! Store row types and embedding blob conversion

use thiserror::Error;

use crate::chunker::{Fragment, FragmentKind};
use crate::embed::{HybridEmbedding, LatePayload};
use crate::EMBEDDING_DIM;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Dense vector dimension mismatch: row has {0}, store expects {1}")]
    DimensionMismatch(usize, usize),
}

/// A fragment row ready for insertion: fragment fields plus the owning
/// file's content hash and the embedding outputs.
#[derive(Debug, Clone)]
pub struct FragmentRow {
    pub id: String,
    pub path: String,
    pub hash: String,
    pub kind: FragmentKind,
    pub start_line: u32,
    pub end_line: u32,
    pub is_anchor: bool,
    pub text: String,
    pub context_len: u32,
    pub dense: Vec<f32>,
    pub late: Option<LatePayload>,
}

impl FragmentRow {
    /// Assemble a row from a chunked fragment, its file hash, and the
    /// worker's embedding output.
    pub fn new(fragment: &Fragment, file_hash: &str, embedding: HybridEmbedding) -> FragmentRow {
        FragmentRow {
            id: fragment.id.clone(),
            path: fragment.path.to_string_lossy().into_owned(),
            hash: file_hash.to_string(),
            kind: fragment.kind,
            start_line: fragment.start_line,
            end_line: fragment.end_line,
            is_anchor: fragment.is_anchor,
            text: fragment.text.clone(),
            context_len: fragment.context_len as u32,
            dense: embedding.dense,
            late: embedding.late,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.dense.len() != EMBEDDING_DIM {
            return Err(StoreError::DimensionMismatch(
                self.dense.len(),
                EMBEDDING_DIM,
            ));
        }
        Ok(())
    }
}

/// Fragment metadata returned from search results (no embedding vector).
#[derive(Debug, Clone)]
pub struct StoredFragment {
    pub id: String,
    pub path: String,
    pub kind: FragmentKind,
    pub start_line: u32,
    pub end_line: u32,
    pub is_anchor: bool,
    pub text: String,
    pub context_len: u32,
}

impl StoredFragment {
    /// Fragment text without the context preamble.
    pub fn display_text(&self) -> &str {
        let offset = (self.context_len as usize).min(self.text.len());
        &self.text[offset..]
    }
}

/// A search candidate with its retrieval score.
#[derive(Debug, Clone)]
pub struct ScoredRow {
    pub fragment: StoredFragment,
    pub score: f32,
}

// ============ Embedding serialization ============

/// Convert a dense vector to little-endian bytes for storage.
pub(crate) fn dense_to_bytes(dense: &[f32]) -> Vec<u8> {
    dense.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Zero-copy view of stored bytes as an f32 slice (hot search path).
///
/// Returns `None` when the byte length doesn't match the configured
/// dimension, letting callers skip corrupt rows.
pub(crate) fn dense_slice(bytes: &[u8]) -> Option<&[f32]> {
    if bytes.len() != EMBEDDING_DIM * 4 {
        tracing::trace!(
            expected = EMBEDDING_DIM * 4,
            actual = bytes.len(),
            "dense blob length mismatch"
        );
        return None;
    }
    bytemuck::try_cast_slice(bytes).ok()
}

/// Clamp i64 from SQLite to a valid u32 line number.
#[inline]
pub(crate) fn clamp_line(n: i64) -> u32 {
    n.clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_roundtrip() {
        let dense: Vec<f32> = (0..EMBEDDING_DIM).map(|i| i as f32 * 0.01).collect();
        let bytes = dense_to_bytes(&dense);
        let restored = dense_slice(&bytes).expect("valid length");
        assert_eq!(restored, dense.as_slice());
    }

    #[test]
    fn test_dense_slice_bad_length() {
        assert!(dense_slice(&[0u8; 16]).is_none());
    }

    #[test]
    fn test_clamp_line() {
        assert_eq!(clamp_line(-5), 0);
        assert_eq!(clamp_line(42), 42);
        assert_eq!(clamp_line(i64::MAX), u32::MAX);
    }

    #[test]
    fn test_row_validation() {
        let row = FragmentRow {
            id: "x".into(),
            path: "/a.rs".into(),
            hash: "h".into(),
            kind: FragmentKind::Function,
            start_line: 0,
            end_line: 5,
            is_anchor: false,
            text: "fn x() {}".into(),
            context_len: 0,
            dense: vec![0.0; EMBEDDING_DIM],
            late: None,
        };
        assert!(row.validate().is_ok());

        let bad = FragmentRow {
            dense: vec![0.0; 3],
            ..row
        };
        assert!(matches!(
            bad.validate(),
            Err(StoreError::DimensionMismatch(3, _))
        ));
    }
}
