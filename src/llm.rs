use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::{Query, RetrievalResult};

/// Produces an explanation payload for a prepared request.
///
/// The payload is deliberately untyped: the pipeline validates it before
/// anything reaches the caller.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value>;

    fn model_name(&self) -> &str;
}

/// A retrieved example as presented to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextExample {
    pub id: String,
    pub title: String,
    pub language: String,
    pub code_fragment: String,
    pub explanation: String,
    pub score: f32,
}

/// Everything a generator needs for one explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub code: String,
    pub language: Option<String>,
    pub examples: Vec<ContextExample>,
    pub prompt: String,
}

impl GenerationRequest {
    /// Assembles the request. Identical inputs always give an identical request.
    pub fn build(query: &Query, retrieved: &RetrievalResult<'_>) -> Self {
        let examples: Vec<ContextExample> = retrieved
            .iter()
            .map(|scored| ContextExample {
                id: scored.example.id.clone(),
                title: scored.example.title.clone(),
                language: scored.example.language.clone(),
                code_fragment: scored.example.code_fragment.clone(),
                explanation: scored.example.explanation.clone(),
                score: scored.score,
            })
            .collect();
        let language = query.language_hint();
        let prompt = construct_prompt(&query.code, language.as_deref(), &examples);

        Self {
            code: query.code.clone(),
            language,
            examples,
            prompt,
        }
    }
}

const RESPONSE_SHAPE: &str = r#"{"language": string, "summary": string, "reasoning": [string], "line_by_line": [{"line_number": integer, "code": string, "explanation": string}]}"#;

fn construct_prompt(code: &str, language: Option<&str>, examples: &[ContextExample]) -> String {
    let context_str = if examples.is_empty() {
        String::new()
    } else {
        let blocks: Vec<String> = examples
            .iter()
            .enumerate()
            .map(|(i, ex)| {
                format!(
                    "[{}] {} ({}, similarity {:.4})\n```\n{}\n```\n{}",
                    i + 1,
                    ex.title,
                    ex.language,
                    ex.score,
                    ex.code_fragment.trim_end(),
                    ex.explanation.trim()
                )
            })
            .collect();
        format!(
            "Use the following annotated examples as reference:\n\n{}\n\n",
            blocks.join("\n\n")
        )
    };
    let language = language.unwrap_or("not specified");

    format!(
        "<s>[INST] {context_str}Explain the code below. Language: {language}\n\
         ```\n{}\n```\n\
         Answer with JSON only, shaped as {RESPONSE_SHAPE}. \
         Number lines from 1 and give one line_by_line entry per source line. [/INST]",
        code.trim_end()
    )
}

/// Sampling options for model-backed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub model: String,
    pub endpoint: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: usize,
    temperature: f32,
    top_p: f32,
    repeat_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Generator backed by an Ollama `/api/generate` endpoint in JSON mode.
pub struct OllamaGenerator {
    client: reqwest::Client,
    config: LLMConfig,
}

impl OllamaGenerator {
    pub fn new(mut config: LLMConfig) -> Self {
        config.endpoint = config.endpoint.trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
        let url = format!("{}/api/generate", self.config.endpoint);
        let body = OllamaGenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            stream: false,
            format: "json",
            options: OllamaOptions {
                num_predict: self.config.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                repeat_penalty: self.config.repeat_penalty,
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama generate error {status}: {text}"));
        }

        let result: OllamaGenerateResponse = response.json().await?;
        debug!("Model returned {} bytes", result.response.len());

        // Unparseable text is handed on as a bare string, which normalization rejects.
        Ok(serde_json::from_str(&result.response).unwrap_or(Value::String(result.response)))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
