use serde::{Deserialize, Serialize};

use crate::utils::normalize_language;

/// One record of the knowledge base source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub id: String,
    pub title: String,
    pub language: String,
    pub code_fragment: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// An annotated code example held by the knowledge store.
#[derive(Debug, Clone)]
pub struct CodeExample {
    pub id: String,
    pub title: String,
    /// Lower-cased language tag.
    pub language: String,
    pub code_fragment: String,
    pub explanation: String,
    pub tags: Vec<String>,
    pub(crate) embedding: Option<Vec<f32>>,
}

impl CodeExample {
    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    /// Text fed to the embedder for this entry.
    pub fn embedding_text(&self) -> String {
        let tags = self.tags.join(" ");
        [
            self.language.as_str(),
            self.title.as_str(),
            self.code_fragment.as_str(),
            self.explanation.as_str(),
            tags.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
    }
}

/// A single explanation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl Query {
    /// Builds a query, normalizing the language hint. A blank hint counts as unset.
    pub fn new(code: impl Into<String>, language: Option<&str>) -> Self {
        Self {
            code: code.into(),
            language: language.and_then(normalize_language),
        }
    }

    pub fn language_hint(&self) -> Option<String> {
        self.language.as_deref().and_then(normalize_language)
    }
}

/// A stored example paired with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredExample<'a> {
    pub example: &'a CodeExample,
    pub score: f32,
}

/// Ranked search output, best match first.
pub type RetrievalResult<'a> = Vec<ScoredExample<'a>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineExplanation {
    pub line_number: usize,
    pub code: String,
    pub explanation: String,
}

/// A retrieved example surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub language: String,
    pub explanation: String,
    pub code_fragment: String,
    pub score: f32,
}

impl From<&ScoredExample<'_>> for Reference {
    fn from(scored: &ScoredExample<'_>) -> Self {
        let example = scored.example;
        Self {
            id: example.id.clone(),
            title: example.title.clone(),
            language: example.language.clone(),
            explanation: example.explanation.clone(),
            code_fragment: example.code_fragment.clone(),
            score: scored.score,
        }
    }
}

/// The structured explanation returned for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResponse {
    pub language: String,
    pub summary: String,
    pub reasoning: Vec<String>,
    pub line_by_line: Vec<LineExplanation>,
    pub references: Vec<Reference>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_normalizes_hint() {
        assert_eq!(Query::new("x", Some("  Python ")).language.as_deref(), Some("python"));
        assert_eq!(Query::new("x", Some("   ")).language, None);
        assert_eq!(Query::new("x", None).language, None);
    }

    #[test]
    fn test_embedding_text_skips_empty_parts() {
        let example = CodeExample {
            id: "c-1".to_string(),
            title: "Swap".to_string(),
            language: "c".to_string(),
            code_fragment: "void swap(int *a, int *b);".to_string(),
            explanation: String::new(),
            tags: vec!["pointers".to_string(), "utility".to_string()],
            embedding: None,
        };
        assert_eq!(
            example.embedding_text(),
            "c Swap void swap(int *a, int *b); pointers utility"
        );
    }

    #[test]
    fn test_query_deserializes_without_language() {
        let query: Query = serde_json::from_str(r#"{"code": "int main() {}"}"#).unwrap();
        assert_eq!(query.language, None);
    }
}
