//! Vector index trait for nearest neighbor search
//!
//! Abstracts over index implementations so the store can pick brute-force
//! scanning for small tables and HNSW for large ones at runtime.

/// Result from a vector index search
#[derive(Debug, Clone)]
pub struct IndexResult {
    /// Fragment ID (matches Store row IDs)
    pub id: String,
    /// Similarity score (cosine over L2-normalized vectors)
    pub score: f32,
}

/// Trait for vector similarity search indexes
///
/// Implementations must be thread-safe (`Send + Sync`) so the store can
/// share one index across concurrent readers.
pub trait VectorIndex: Send + Sync {
    /// Search for nearest neighbors, sorted by descending similarity.
    fn search(&self, query: &[f32], k: usize) -> Vec<IndexResult>;

    /// Number of vectors in the index
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index type name (e.g., "HNSW")
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockIndex {
        results: Vec<IndexResult>,
        size: usize,
    }

    impl VectorIndex for MockIndex {
        fn search(&self, _query: &[f32], k: usize) -> Vec<IndexResult> {
            self.results.iter().take(k).cloned().collect()
        }

        fn len(&self) -> usize {
            self.size
        }

        fn name(&self) -> &'static str {
            "Mock"
        }
    }

    #[test]
    fn test_default_is_empty() {
        let empty = MockIndex {
            results: vec![],
            size: 0,
        };
        assert!(empty.is_empty());

        let nonempty = MockIndex {
            results: vec![],
            size: 5,
        };
        assert!(!nonempty.is_empty());
    }

    #[test]
    fn test_trait_object_dispatch() {
        let index: Box<dyn VectorIndex> = Box::new(MockIndex {
            results: vec![
                IndexResult {
                    id: "a".into(),
                    score: 0.9,
                },
                IndexResult {
                    id: "b".into(),
                    score: 0.8,
                },
            ],
            size: 2,
        });
        let results = index.search(&[0.0; 4], 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(index.name(), "Mock");
    }
}
