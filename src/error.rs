use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the knowledge store, the retriever and the explain pipeline.
#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Knowledge base is empty")]
    EmptyKnowledgeBase,

    #[error("Malformed knowledge base: {0}")]
    MalformedKnowledgeBase(String),

    #[error("Cannot read knowledge base at {path:?}: {source}")]
    KnowledgeBaseUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    #[error("Malformed generation output: {0}")]
    MalformedGeneration(String),
}

/// Stable, caller-visible classification of an [`ExplainError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    EmptyKnowledgeBase,
    MalformedKnowledgeBase,
    KnowledgeBaseUnreadable,
    EmbeddingFailure,
    DimensionMismatch,
    InvalidInput,
    GenerationFailure,
    MalformedGeneration,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl ExplainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExplainError::EmptyKnowledgeBase => ErrorKind::EmptyKnowledgeBase,
            ExplainError::MalformedKnowledgeBase(_) => ErrorKind::MalformedKnowledgeBase,
            ExplainError::KnowledgeBaseUnreadable { .. } => ErrorKind::KnowledgeBaseUnreadable,
            ExplainError::EmbeddingFailure(_) => ErrorKind::EmbeddingFailure,
            ExplainError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            ExplainError::InvalidInput(_) => ErrorKind::InvalidInput,
            ExplainError::GenerationFailure(_) => ErrorKind::GenerationFailure,
            ExplainError::MalformedGeneration(_) => ErrorKind::MalformedGeneration,
        }
    }

    /// HTTP-style status a request boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::EmbeddingFailure
            | ErrorKind::GenerationFailure
            | ErrorKind::MalformedGeneration => 502,
            _ => 500,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EmbeddingFailure
                | ErrorKind::GenerationFailure
                | ErrorKind::MalformedGeneration
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.to_string(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ExplainError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(ExplainError::EmbeddingFailure("x".into()).status_code(), 502);
        assert_eq!(ExplainError::MalformedGeneration("x".into()).status_code(), 502);
        assert_eq!(
            ExplainError::DimensionMismatch { expected: 2, actual: 3 }.status_code(),
            500
        );
        assert_eq!(ExplainError::EmptyKnowledgeBase.status_code(), 500);
    }

    #[test]
    fn test_error_body_serialization() {
        let body = ExplainError::InvalidInput("code snippet is empty".into()).to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["kind"], "InvalidInput");
        assert_eq!(json["error"]["recoverable"], false);
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("code snippet is empty")
        );
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = ExplainError::DimensionMismatch { expected: 384, actual: 2 };
        assert_eq!(err.to_string(), "Vector dimension mismatch: expected 384, got 2");
    }
}
