use ndarray::ArrayView1;

use crate::error::ExplainError;
use crate::types::{RetrievalResult, ScoredExample};
use crate::vector_db::KnowledgeStore;

/// Cosine-similarity search over a [`KnowledgeStore`].
///
/// Holds no state of its own beyond the borrowed store, so any number of
/// searches may run concurrently against the same store.
pub struct SimilarityIndex<'a> {
    store: &'a KnowledgeStore,
}

impl<'a> SimilarityIndex<'a> {
    pub fn new(store: &'a KnowledgeStore) -> Self {
        SimilarityIndex { store }
    }

    /// Returns up to `k` entries ranked by descending cosine similarity.
    ///
    /// Ties keep knowledge-store order. Entries with a zero-norm (or missing)
    /// embedding are never returned, and neither is anything for a zero-norm
    /// query.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<RetrievalResult<'a>, ExplainError> {
        if k == 0 {
            return Err(ExplainError::InvalidInput(
                "top-k must be at least 1".to_string(),
            ));
        }

        let expected = self.store.dimension().ok_or_else(|| {
            ExplainError::MalformedKnowledgeBase("knowledge base has no embeddings".to_string())
        })?;
        if query_vector.len() != expected {
            return Err(ExplainError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        let query = ArrayView1::from(query_vector);
        let query_norm = query.dot(&query).sqrt();
        if query_norm == 0.0 || !query_norm.is_finite() {
            return Ok(Vec::new());
        }

        let mut similarities: Vec<ScoredExample<'a>> = self
            .store
            .all()
            .iter()
            .filter_map(|example| {
                let embedding = ArrayView1::from(example.embedding()?);
                let score = cosine_similarity(&query, query_norm, &embedding)?;
                Some(ScoredExample { example, score })
            })
            .collect();

        // sort_by is stable: equal scores stay in store order
        similarities.sort_by(|a, b| b.score.total_cmp(&a.score));
        similarities.truncate(k);
        Ok(similarities)
    }
}

fn cosine_similarity(query: &ArrayView1<f32>, query_norm: f32, other: &ArrayView1<f32>) -> Option<f32> {
    let norm = other.dot(other).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    let score = query.dot(other) / (query_norm * norm);
    if score.is_finite() {
        Some(score.clamp(-1.0, 1.0))
    } else {
        None
    }
}
