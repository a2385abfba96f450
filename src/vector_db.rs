use rustc_hash::FxHashSet;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use crate::embedder::Embedder;
use crate::error::ExplainError;
use crate::types::{CodeExample, ExampleRecord};

/// The annotated examples available for retrieval, in load order.
///
/// Built once at start-up; after [`KnowledgeStore::ensure_embeddings`] it is
/// shared read-only between requests.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    entries: Vec<CodeExample>,
    dimension: Option<usize>,
}

impl KnowledgeStore {
    /// Validates raw records and builds a store from them.
    pub fn load(records: Vec<Value>) -> Result<Self, ExplainError> {
        let mut parsed = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let record: ExampleRecord = serde_json::from_value(record).map_err(|e| {
                ExplainError::MalformedKnowledgeBase(format!("record {index}: {e}"))
            })?;
            parsed.push(record);
        }
        Self::from_records(parsed)
    }

    /// Parses a JSON array of records.
    pub fn load_json(text: &str) -> Result<Self, ExplainError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ExplainError::MalformedKnowledgeBase(format!("invalid JSON: {e}")))?;
        match value {
            Value::Array(records) => Self::load(records),
            _ => Err(ExplainError::MalformedKnowledgeBase(
                "expected a JSON array of records".to_string(),
            )),
        }
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ExplainError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            ExplainError::KnowledgeBaseUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let store = Self::load_json(&text)?;
        info!("Loaded {} examples from {:?}", store.len(), path);
        Ok(store)
    }

    pub fn from_records(records: Vec<ExampleRecord>) -> Result<Self, ExplainError> {
        if records.is_empty() {
            return Err(ExplainError::EmptyKnowledgeBase);
        }

        let mut seen = FxHashSet::default();
        let mut dimension = None;
        let mut entries = Vec::with_capacity(records.len());

        for record in records {
            let id = record.id.trim().to_string();
            if id.is_empty() {
                return Err(ExplainError::MalformedKnowledgeBase(
                    "record with empty id".to_string(),
                ));
            }
            if !seen.insert(id.clone()) {
                return Err(ExplainError::MalformedKnowledgeBase(format!(
                    "duplicate id '{id}'"
                )));
            }

            if let Some(embedding) = &record.embedding {
                if embedding.is_empty() {
                    return Err(ExplainError::MalformedKnowledgeBase(format!(
                        "record '{id}' has an empty embedding"
                    )));
                }
                match dimension {
                    None => dimension = Some(embedding.len()),
                    Some(expected) if expected != embedding.len() => {
                        return Err(ExplainError::MalformedKnowledgeBase(format!(
                            "record '{id}' has a {}-dimensional embedding, expected {expected}",
                            embedding.len()
                        )));
                    }
                    Some(_) => {}
                }
            }

            entries.push(CodeExample {
                id,
                title: record.title,
                language: record.language.trim().to_lowercase(),
                code_fragment: record.code_fragment,
                explanation: record.explanation,
                tags: record.tags,
                embedding: record.embedding,
            });
        }

        Ok(Self { entries, dimension })
    }

    /// Embeds every entry that has no vector yet.
    ///
    /// All new vectors are computed before any is stored, so a failure leaves
    /// the store exactly as it was. Returns how many entries were embedded.
    pub async fn ensure_embeddings(&mut self, embedder: &dyn Embedder) -> Result<usize, ExplainError> {
        let pending: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.embedding.is_none())
            .map(|(index, _)| index)
            .collect();

        if pending.is_empty() {
            debug!("All {} examples already embedded", self.entries.len());
            return Ok(0);
        }

        info!(
            "Embedding {} examples with {}",
            pending.len(),
            embedder.model_name()
        );

        let mut dimension = self.dimension;
        let mut computed = Vec::with_capacity(pending.len());
        for &index in &pending {
            let entry = &self.entries[index];
            let vector = embedder
                .embed(&entry.embedding_text())
                .await
                .map_err(|e| ExplainError::EmbeddingFailure(format!("example '{}': {e}", entry.id)))?;

            if vector.is_empty() {
                return Err(ExplainError::EmbeddingFailure(format!(
                    "example '{}': embedder returned an empty vector",
                    entry.id
                )));
            }
            match dimension {
                None => dimension = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(ExplainError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                Some(_) => {}
            }
            computed.push((index, vector));
        }

        let count = computed.len();
        for (index, vector) in computed {
            self.entries[index].embedding = Some(vector);
        }
        self.dimension = dimension;
        Ok(count)
    }

    /// Entries in original load order.
    pub fn all(&self) -> &[CodeExample] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CodeExample> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared embedding dimensionality, once any entry is embedded.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn is_fully_embedded(&self) -> bool {
        self.entries.iter().all(|entry| entry.embedding.is_some())
    }
}
