use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::embedder::{DEFAULT_DIMENSIONS, Embedder, HashingEmbedder, OllamaEmbedder};
use crate::heuristics::HeuristicGenerator;
use crate::llm::{Generator, LLMConfig, OllamaGenerator};
use crate::rag::{DEFAULT_MIN_CODE_LENGTH, DEFAULT_TOP_K, ExplainSettings};

pub const CONFIG_ENV: &str = "CODE_EXPLAINER_CONFIG";

/// Application configuration, read from TOML with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub knowledge_base: PathBuf,
    pub log_level: String,
    pub retrieval: RetrievalConfig,
    pub embedder: EmbedderConfig,
    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_code_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderProvider {
    Hashing,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    pub model: String,
    pub endpoint: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorProvider {
    Heuristic,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub provider: GeneratorProvider,
    pub model: String,
    pub endpoint: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            knowledge_base: default_knowledge_base(),
            log_level: "info".to_string(),
            retrieval: RetrievalConfig::default(),
            embedder: EmbedderConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_code_length: DEFAULT_MIN_CODE_LENGTH,
        }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderProvider::Hashing,
            model: "nomic-embed-text".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            timeout_secs: 30,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        let llm = LLMConfig::default();
        Self {
            provider: GeneratorProvider::Heuristic,
            model: llm.model,
            endpoint: llm.endpoint,
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            top_p: llm.top_p,
            repeat_penalty: llm.repeat_penalty,
            timeout_secs: 120,
        }
    }
}

/// `data/code_samples.json` when present, else the per-user data directory.
fn default_knowledge_base() -> PathBuf {
    let local = PathBuf::from("data").join("code_samples.json");
    if local.exists() {
        return local;
    }
    dirs::data_dir()
        .map(|dir| dir.join("code-explainer").join("code_samples.json"))
        .unwrap_or(local)
}

impl Config {
    /// Like [`Config::read`], then validates. Callers that layer more overrides
    /// on top should use `read` and call [`Config::validate`] themselves.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads the TOML file at `path` (or `$CODE_EXPLAINER_CONFIG`) if it exists
    /// and applies environment overrides, without validating.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => bail!("Config file not found: {}", path.display()),
            None => Self::default(),
        };

        config.override_from(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `CODE_EXPLAINER_*` overrides looked up through `lookup`.
    pub fn override_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("CODE_EXPLAINER_DATA") {
            self.knowledge_base = PathBuf::from(val);
        }
        if let Some(val) = lookup("CODE_EXPLAINER_EMBEDDER") {
            self.embedder.model = val;
        }
        if let Some(val) = lookup("CODE_EXPLAINER_GENERATOR") {
            self.generator.model = val;
        }
        if let Some(val) = lookup("CODE_EXPLAINER_TOP_K") {
            if let Ok(num) = val.parse() {
                self.retrieval.top_k = num;
            }
        }
        if let Some(val) = lookup("CODE_EXPLAINER_LOG") {
            self.log_level = val;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be at least 1");
        }
        if self.embedder.dimensions == 0 {
            bail!("embedder.dimensions must be positive");
        }
        if self.embedder.timeout_secs == 0 || self.generator.timeout_secs == 0 {
            bail!("timeouts must be positive");
        }
        if self.embedder.provider == EmbedderProvider::Ollama && self.embedder.endpoint.trim().is_empty() {
            bail!("embedder.endpoint is required for the ollama provider");
        }
        if self.generator.provider == GeneratorProvider::Ollama && self.generator.endpoint.trim().is_empty() {
            bail!("generator.endpoint is required for the ollama provider");
        }
        Ok(())
    }

    pub fn settings(&self) -> ExplainSettings {
        ExplainSettings {
            top_k: self.retrieval.top_k,
            min_code_length: self.retrieval.min_code_length,
            embed_timeout: Duration::from_secs(self.embedder.timeout_secs),
            generate_timeout: Duration::from_secs(self.generator.timeout_secs),
        }
    }

    pub fn build_embedder(&self) -> Arc<dyn Embedder> {
        match self.embedder.provider {
            EmbedderProvider::Hashing => Arc::new(HashingEmbedder::new(self.embedder.dimensions)),
            EmbedderProvider::Ollama => Arc::new(OllamaEmbedder::new(
                self.embedder.model.clone(),
                self.embedder.endpoint.clone(),
                self.embedder.dimensions,
            )),
        }
    }

    pub fn build_generator(&self) -> Arc<dyn Generator> {
        match self.generator.provider {
            GeneratorProvider::Heuristic => Arc::new(HeuristicGenerator::new()),
            GeneratorProvider::Ollama => Arc::new(OllamaGenerator::new(LLMConfig {
                model: self.generator.model.clone(),
                endpoint: self.generator.endpoint.clone(),
                max_tokens: self.generator.max_tokens,
                temperature: self.generator.temperature,
                top_p: self.generator.top_p,
                repeat_penalty: self.generator.repeat_penalty,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.min_code_length, 10);
        assert_eq!(config.embedder.provider, EmbedderProvider::Hashing);
        assert_eq!(config.generator.provider, GeneratorProvider::Heuristic);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "knowledge_base = \"kb.json\"\n\n[retrieval]\ntop_k = 5\n\n[generator]\nprovider = \"ollama\"\nmodel = \"codellama\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.knowledge_base, PathBuf::from("kb.json"));
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.min_code_length, 10);
        assert_eq!(config.generator.provider, GeneratorProvider::Ollama);
        assert_eq!(config.generator.model, "codellama");
        assert_eq!(config.generator.max_tokens, 1000);
        assert_eq!(config.generator.model, config.build_generator().model_name());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CODE_EXPLAINER_DATA", "/srv/kb.json"),
            ("CODE_EXPLAINER_TOP_K", "4"),
            ("CODE_EXPLAINER_EMBEDDER", "all-minilm"),
        ]);
        let mut config = Config::default();
        config.override_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.knowledge_base, PathBuf::from("/srv/kb.json"));
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.embedder.model, "all-minilm");
    }

    #[test]
    fn test_unparseable_top_k_is_ignored() {
        let mut config = Config::default();
        config.override_from(|key| (key == "CODE_EXPLAINER_TOP_K").then(|| "many".to_string()));
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_defers_validation_to_caller() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[retrieval]\ntop_k = 0").unwrap();

        assert!(Config::load(Some(file.path())).is_err());

        let mut config = Config::read(Some(file.path())).unwrap();
        assert_eq!(config.retrieval.top_k, 0);
        config.retrieval.top_k = 5;
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let err = Config::load(Some(Path::new("/nonexistent/explainer.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_settings_conversion() {
        let settings = Config::default().settings();
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.embed_timeout, Duration::from_secs(30));
        assert_eq!(settings.generate_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_build_embedder_uses_dimensions() {
        let mut config = Config::default();
        config.embedder.dimensions = 64;
        assert_eq!(config.build_embedder().dimensions(), 64);
    }
}
