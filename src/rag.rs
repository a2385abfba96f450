use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::embedder::Embedder;
use crate::error::ExplainError;
use crate::llm::{GenerationRequest, Generator};
use crate::retriever::SimilarityIndex;
use crate::types::{ExplanationResponse, LineExplanation, Query, Reference, RetrievalResult};
use crate::utils::{last_content_line, line_count, normalize_language};
use crate::vector_db::KnowledgeStore;

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MIN_CODE_LENGTH: usize = 10;
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Knobs for the explain pipeline.
#[derive(Debug, Clone)]
pub struct ExplainSettings {
    pub top_k: usize,
    /// Minimum trimmed snippet length, in characters.
    pub min_code_length: usize,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
}

impl Default for ExplainSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_code_length: DEFAULT_MIN_CODE_LENGTH,
            embed_timeout: Duration::from_secs(30),
            generate_timeout: Duration::from_secs(120),
        }
    }
}

/// Where a request is in the pipeline.
///
/// There is no failed variant: a failure is the `Err` returned by
/// [`CodeExplainer::explain`], raised at whichever stage was current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Embedding,
    Retrieving,
    Generating,
    Normalizing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Generating => "generating",
            Stage::Normalizing => "normalizing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Retrieval-augmented code explainer.
///
/// Cheap to clone; clones share the same store and collaborators. The store
/// is never written after construction, so requests can run concurrently and
/// be dropped mid-flight without cleanup.
#[derive(Clone)]
pub struct CodeExplainer {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    settings: ExplainSettings,
}

impl CodeExplainer {
    /// Requires a fully embedded store whose dimension matches the embedder;
    /// run [`KnowledgeStore::ensure_embeddings`] first.
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        settings: ExplainSettings,
    ) -> Result<Self, ExplainError> {
        if store.is_empty() {
            return Err(ExplainError::EmptyKnowledgeBase);
        }
        if !store.is_fully_embedded() {
            return Err(ExplainError::MalformedKnowledgeBase(
                "knowledge base has examples without embeddings".to_string(),
            ));
        }
        if let Some(expected) = store.dimension() {
            if expected != embedder.dimensions() {
                return Err(ExplainError::DimensionMismatch {
                    expected,
                    actual: embedder.dimensions(),
                });
            }
        }
        if settings.top_k == 0 {
            return Err(ExplainError::InvalidInput(
                "top-k must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            embedder,
            generator,
            settings,
        })
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn settings(&self) -> &ExplainSettings {
        &self.settings
    }

    /// Explains one snippet. Either the whole response or an error, never a partial result.
    pub async fn explain(&self, query: &Query) -> Result<ExplanationResponse, ExplainError> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("explain", %request_id, language = ?query.language_hint());

        async {
            let mut stage = Stage::Validating;
            let result = self.run(query, &mut stage).await;
            match &result {
                Ok(response) => info!(
                    references = response.references.len(),
                    lines = response.line_by_line.len(),
                    "Explanation complete"
                ),
                Err(e) => warn!(%stage, kind = ?e.kind(), "Explanation failed: {e}"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &Query, stage: &mut Stage) -> Result<ExplanationResponse, ExplainError> {
        self.validate(query)?;

        advance(stage, Stage::Embedding);
        let query_vector = self.embed_query(&query.code).await?;

        advance(stage, Stage::Retrieving);
        let index = SimilarityIndex::new(&self.store);
        let retrieved = index.search(&query_vector, self.settings.top_k)?;
        debug!("Retrieved {} examples", retrieved.len());

        advance(stage, Stage::Generating);
        let request = GenerationRequest::build(query, &retrieved);
        let payload = self.generate(&request).await?;

        advance(stage, Stage::Normalizing);
        let response = normalize(payload, query, &retrieved)?;

        advance(stage, Stage::Done);
        Ok(response)
    }

    fn validate(&self, query: &Query) -> Result<(), ExplainError> {
        let length = query.code.trim().chars().count();
        if length == 0 {
            return Err(ExplainError::InvalidInput(
                "code snippet is empty".to_string(),
            ));
        }
        if length < self.settings.min_code_length {
            return Err(ExplainError::InvalidInput(format!(
                "code snippet must be at least {} characters, got {length}",
                self.settings.min_code_length
            )));
        }
        Ok(())
    }

    async fn embed_query(&self, code: &str) -> Result<Vec<f32>, ExplainError> {
        match tokio::time::timeout(self.settings.embed_timeout, self.embedder.embed(code)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(ExplainError::EmbeddingFailure(e.to_string())),
            Err(_) => Err(ExplainError::EmbeddingFailure(format!(
                "{} timed out after {:?}",
                self.embedder.model_name(),
                self.settings.embed_timeout
            ))),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Value, ExplainError> {
        match tokio::time::timeout(self.settings.generate_timeout, self.generator.generate(request)).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(ExplainError::GenerationFailure(e.to_string())),
            Err(_) => Err(ExplainError::GenerationFailure(format!(
                "{} timed out after {:?}",
                self.generator.model_name(),
                self.settings.generate_timeout
            ))),
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!("{stage} -> {next}");
    *stage = next;
}

/// Validates a generator payload and turns it into the caller-facing response.
///
/// References always come from `retrieved`; anything the generator says
/// about references is ignored.
pub fn normalize(
    payload: Value,
    query: &Query,
    retrieved: &RetrievalResult<'_>,
) -> Result<ExplanationResponse, ExplainError> {
    let Value::Object(mut fields) = payload else {
        return Err(malformed("expected a JSON object"));
    };

    let summary = match fields.remove("summary") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::String(_)) => return Err(malformed("summary is empty")),
        Some(_) => return Err(malformed("summary is not a string")),
        None => return Err(malformed("missing summary")),
    };

    let reasoning = match fields.remove("reasoning") {
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s),
                _ => Err(malformed(&format!("reasoning[{i}] is not a string"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(malformed("reasoning is not a sequence")),
        None => return Err(malformed("missing reasoning")),
    };

    let line_by_line = match fields.remove("line_by_line") {
        Some(Value::Array(items)) => parse_lines(
            items,
            last_content_line(&query.code),
            line_count(&query.code),
        )?,
        Some(_) => return Err(malformed("line_by_line is not a sequence")),
        None => return Err(malformed("missing line_by_line")),
    };

    let generated_language = match fields.remove("language") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => normalize_language(&s),
        Some(_) => return Err(malformed("language is not a string")),
    };
    let language = generated_language
        .or_else(|| query.language_hint())
        .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());

    Ok(ExplanationResponse {
        language,
        summary,
        reasoning,
        line_by_line,
        references: retrieved.iter().map(Reference::from).collect(),
    })
}

/// Entries must number 1.. contiguously, reach at least the last non-blank
/// line and stop at the last input line.
fn parse_lines(
    items: Vec<Value>,
    min_lines: usize,
    max_lines: usize,
) -> Result<Vec<LineExplanation>, ExplainError> {
    if items.len() < min_lines {
        return Err(malformed(&format!(
            "line_by_line covers {} of {min_lines} input lines",
            items.len()
        )));
    }
    if items.len() > max_lines {
        return Err(malformed(&format!(
            "line_by_line has {} entries for {max_lines} input lines",
            items.len()
        )));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let Value::Object(mut entry) = item else {
                return Err(malformed(&format!("line_by_line[{i}] is not an object")));
            };
            let line_number = take_line_number(&mut entry, i)?;
            if line_number != i + 1 {
                return Err(malformed(&format!(
                    "line_by_line[{i}] has line_number {line_number}, expected {}",
                    i + 1
                )));
            }
            Ok(LineExplanation {
                line_number,
                code: take_string(&mut entry, "code", i)?,
                explanation: take_string(&mut entry, "explanation", i)?,
            })
        })
        .collect()
}

fn take_line_number(entry: &mut Map<String, Value>, i: usize) -> Result<usize, ExplainError> {
    match entry.remove("line_number") {
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|n| *n >= 1)
            .map(|n| n as usize)
            .ok_or_else(|| malformed(&format!("line_by_line[{i}].line_number is not a positive integer"))),
        Some(_) => Err(malformed(&format!("line_by_line[{i}].line_number is not a number"))),
        None => Err(malformed(&format!("line_by_line[{i}] is missing line_number"))),
    }
}

fn take_string(entry: &mut Map<String, Value>, key: &str, i: usize) -> Result<String, ExplainError> {
    match entry.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(malformed(&format!("line_by_line[{i}].{key} is not a string"))),
        None => Err(malformed(&format!("line_by_line[{i}] is missing {key}"))),
    }
}

fn malformed(message: &str) -> ExplainError {
    ExplainError::MalformedGeneration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CODE: &str = "int x = 1;\nint y = 2;";

    fn store() -> KnowledgeStore {
        KnowledgeStore::load(vec![json!({
            "id": "c-decl",
            "title": "Declarations",
            "language": "C",
            "code_fragment": "int a = 0;",
            "explanation": "Declares and initializes an integer.",
            "embedding": [1.0, 0.0],
        })])
        .unwrap()
    }

    fn payload() -> Value {
        json!({
            "language": "C",
            "summary": "Declares two integers.",
            "reasoning": ["Found two declarations"],
            "line_by_line": [
                {"line_number": 1, "code": "int x = 1;", "explanation": "Declares x."},
                {"line_number": 2, "code": "int y = 2;", "explanation": "Declares y."},
            ],
            "references": [{"title": "invented"}],
        })
    }

    fn malformed_message(payload: Value) -> String {
        match normalize(payload, &Query::new(CODE, None), &Vec::new()) {
            Err(ExplainError::MalformedGeneration(msg)) => msg,
            other => panic!("expected MalformedGeneration, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_valid_payload() {
        let store = store();
        let retrieved = SimilarityIndex::new(&store).search(&[1.0, 0.0], 3).unwrap();
        let response = normalize(payload(), &Query::new(CODE, None), &retrieved).unwrap();

        assert_eq!(response.language, "c");
        assert_eq!(response.line_by_line.len(), 2);
        assert_eq!(response.references.len(), 1);
        assert_eq!(response.references[0].id, "c-decl");
        assert_eq!(response.references[0].title, "Declarations");
    }

    #[test]
    fn test_language_falls_back_to_hint_then_unknown() {
        let mut without_language = payload();
        without_language.as_object_mut().unwrap().remove("language");

        let hinted = normalize(without_language.clone(), &Query::new(CODE, Some("C")), &Vec::new()).unwrap();
        assert_eq!(hinted.language, "c");

        let unhinted = normalize(without_language, &Query::new(CODE, None), &Vec::new()).unwrap();
        assert_eq!(unhinted.language, UNKNOWN_LANGUAGE);
    }

    #[test]
    fn test_missing_summary() {
        let mut p = payload();
        p.as_object_mut().unwrap().remove("summary");
        assert_eq!(malformed_message(p), "missing summary");
    }

    #[test]
    fn test_reasoning_must_be_sequence() {
        let mut p = payload();
        p["reasoning"] = json!("one step");
        assert_eq!(malformed_message(p), "reasoning is not a sequence");
    }

    #[test]
    fn test_missing_line_number() {
        let mut p = payload();
        p["line_by_line"][1].as_object_mut().unwrap().remove("line_number");
        assert_eq!(malformed_message(p), "line_by_line[1] is missing line_number");
    }

    #[test]
    fn test_line_gap_is_rejected() {
        let mut p = payload();
        p["line_by_line"][1]["line_number"] = json!(3);
        assert!(malformed_message(p).contains("expected 2"));
    }

    #[test]
    fn test_more_lines_than_input() {
        let mut p = payload();
        p["line_by_line"]
            .as_array_mut()
            .unwrap()
            .push(json!({"line_number": 3, "code": "", "explanation": "extra"}));
        assert!(malformed_message(p).contains("3 entries for 2 input lines"));
    }

    #[test]
    fn test_non_object_payload() {
        assert_eq!(malformed_message(json!("plain text")), "expected a JSON object");
    }

    #[test]
    fn test_truncated_line_by_line_is_rejected() {
        let code = "int a = 1;\nint b = 2;\nint c = 3;\nint d = 4;";
        let payload = json!({
            "summary": "Declares four integers.",
            "reasoning": [],
            "line_by_line": [
                {"line_number": 1, "code": "int a = 1;", "explanation": "Declares a."},
            ],
        });
        match normalize(payload, &Query::new(code, None), &Vec::new()) {
            Err(ExplainError::MalformedGeneration(msg)) => {
                assert_eq!(msg, "line_by_line covers 1 of 4 input lines")
            }
            other => panic!("expected MalformedGeneration, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_line_by_line_is_rejected() {
        let mut p = payload();
        p["line_by_line"] = json!([]);
        assert_eq!(malformed_message(p), "line_by_line covers 0 of 2 input lines");
    }

    #[test]
    fn test_trailing_blank_lines_may_be_skipped() {
        let code = format!("{CODE}\n\n   \n");
        let response = normalize(payload(), &Query::new(code, None), &Vec::new()).unwrap();
        assert_eq!(response.line_by_line.len(), 2);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Normalizing.to_string(), "normalizing");
    }
}
