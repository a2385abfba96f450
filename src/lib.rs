//! Explains code snippets by retrieving similar annotated examples and
//! conditioning a generator on them.
//!
//! Start-up is two phases: load a [`KnowledgeStore`] and run
//! [`KnowledgeStore::ensure_embeddings`], then wrap it in an `Arc` and hand
//! it to a [`CodeExplainer`], which serves any number of concurrent requests.
//!
//! ```ignore
//! let mut store = KnowledgeStore::load_file("data/code_samples.json")?;
//! let embedder = Arc::new(HashingEmbedder::default());
//! store.ensure_embeddings(embedder.as_ref()).await?;
//!
//! let explainer = CodeExplainer::new(
//!     Arc::new(store),
//!     embedder,
//!     Arc::new(HeuristicGenerator::new()),
//!     ExplainSettings::default(),
//! )?;
//! let response = explainer.explain(&Query::new(code, Some("c"))).await?;
//! ```

pub mod config;
pub mod embedder;
pub mod error;
pub mod heuristics;
pub mod llm;
pub mod rag;
pub mod retriever;
pub mod types;
pub mod utils;
pub mod vector_db;

pub use config::Config;
pub use embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use error::{ErrorKind, ExplainError};
pub use heuristics::{HeuristicGenerator, LanguageDetector};
pub use llm::{GenerationRequest, Generator, OllamaGenerator};
pub use rag::{CodeExplainer, ExplainSettings, Stage};
pub use retriever::SimilarityIndex;
pub use types::{
    CodeExample, ExampleRecord, ExplanationResponse, LineExplanation, Query, Reference,
    RetrievalResult, ScoredExample,
};
pub use vector_db::KnowledgeStore;
