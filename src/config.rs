use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for an OpenAI-compatible API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            embedding_model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Lexical channel weight in the hybrid merge.
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    /// Vector channel weight in the hybrid merge.
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Knowledge-base candidates requested per exchange.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Stored history messages kept as conversational memory.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// History messages actually placed in the model context (4 pairs).
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            text_weight: default_text_weight(),
            vector_weight: default_vector_weight(),
            top_k: default_top_k(),
            history_limit: default_history_limit(),
            context_messages: default_context_messages(),
        }
    }
}

fn default_text_weight() -> f64 {
    0.7
}
fn default_vector_weight() -> f64 {
    0.3
}
fn default_top_k() -> usize {
    5
}
fn default_history_limit() -> usize {
    10
}
fn default_context_messages() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_text_len: default_min_text_len(),
            max_text_len: default_max_text_len(),
        }
    }
}

fn default_min_text_len() -> usize {
    10
}
fn default_max_text_len() -> usize {
    50_000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.retrieval.text_weight) {
        anyhow::bail!("retrieval.text_weight must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.vector_weight) {
        anyhow::bail!("retrieval.vector_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.history_limit == 0 {
        anyhow::bail!("retrieval.history_limit must be >= 1");
    }
    if config.analysis.min_text_len >= config.analysis.max_text_len {
        anyhow::bail!("analysis.min_text_len must be < analysis.max_text_len");
    }

    if config.llm.is_enabled() && config.llm.dims == 0 {
        anyhow::bail!(
            "llm.dims must be > 0 when provider is '{}'",
            config.llm.provider
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse(
            r#"
            [db]
            path = "data/caseline.sqlite"
            [server]
            bind = "127.0.0.1:8080"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "disabled");
        assert_eq!(cfg.llm.dims, 1536);
        assert!((cfg.retrieval.text_weight - 0.7).abs() < 1e-9);
        assert!((cfg.retrieval.vector_weight - 0.3).abs() < 1e-9);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.history_limit, 10);
        assert_eq!(cfg.retrieval.context_messages, 8);
    }

    #[test]
    fn test_rejects_bad_weight() {
        let result = parse(
            r#"
            [db]
            path = "x.sqlite"
            [server]
            bind = "127.0.0.1:8080"
            [retrieval]
            text_weight = 1.5
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let result = parse(
            r#"
            [db]
            path = "x.sqlite"
            [server]
            bind = "127.0.0.1:8080"
            [llm]
            provider = "bedrock"
            "#,
        );
        assert!(result.is_err());
    }
}
