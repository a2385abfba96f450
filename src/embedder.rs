//! Embedders turn code text into fixed-dimension vectors.
//!
//! The pipeline only sees the [`Embedder`] trait. Two implementations ship
//! with the crate: an offline feature-hashing embedder and a client for an
//! Ollama-compatible embedding endpoint.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

use crate::utils::tokenize;

pub const DEFAULT_DIMENSIONS: usize = 384;

/// Maps text to a vector. Must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of the vectors produced.
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Term-frequency vectors over hashed token buckets.
///
/// Each token lands in `hash % dimensions` with a sign taken from a higher
/// hash bit, so unrelated tokens sharing a bucket tend to cancel rather than
/// pile up. `FxHasher` is unseeded, which keeps vectors stable across runs.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0; self.dims];
        if tokens.is_empty() {
            return vector;
        }

        let mut term_freq: FxHashMap<&str, f32> = FxHashMap::default();
        for token in &tokens {
            *term_freq.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let tokens_count = tokens.len() as f32;
        // Sorted so float accumulation order never depends on map iteration.
        let mut terms: Vec<_> = term_freq.into_iter().collect();
        terms.sort_by(|a, b| a.0.cmp(b.0));

        for (term, freq) in terms {
            let mut hasher = FxHasher::default();
            hasher.write(term.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * freq / tokens_count;
        }

        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by an Ollama `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(model: String, endpoint: String, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            dims,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embed", self.endpoint);
        let request = OllamaEmbedRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama embed error {status}: {body}"));
        }

        let result: OllamaEmbedResponse = response.json().await?;
        let embedding = result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty response from Ollama"))?;

        if embedding.len() != self.dims {
            return Err(anyhow!(
                "Ollama model {} returned {} dimensions, expected {}",
                self.model,
                embedding.len(),
                self.dims
            ));
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("int fib(int n) { return n; }").await.unwrap();
        let b = embedder.embed("int fib(int n) { return n; }").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);
    }

    #[test]
    fn test_hashing_embedder_empty_text_is_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed_text("  ;; ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed_text("def fibonacci(n): return fibonacci(n - 1) + fibonacci(n - 2)");
        let close = embedder.embed_text("recursive fibonacci function returns fibonacci(n - 1) + fibonacci(n - 2)");
        let far = embedder.embed_text("printf hello world stdio include");
        assert!(cosine(&query, &close) > cosine(&query, &far));
    }

    #[test]
    fn test_ollama_embedder_creation() {
        let embedder = OllamaEmbedder::new(
            "nomic-embed-text".to_string(),
            "http://localhost:11434/".to_string(),
            768,
        );
        assert_eq!(embedder.dimensions(), 768);
        assert_eq!(embedder.model_name(), "nomic-embed-text");
        assert_eq!(embedder.endpoint, "http://localhost:11434");
    }
}
