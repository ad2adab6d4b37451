use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewError};

pub const DEFAULT_CONFIG_FILE: &str = "review-rag";
pub const ENV_PREFIX: &str = "REVIEW_RAG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Exact origins allowed by CORS; any `http://localhost:<port>` is always allowed.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    pub dataset_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local ONNX model loaded through fastembed.
    FastEmbed,
    /// OpenAI/Ollama-compatible `/embeddings` endpoint.
    Http,
    /// Deterministic feature hashing, no model required.
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: EmbeddingProvider,
    pub model_dir: PathBuf,
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Memory,
    Qdrant,
}

impl VectorBackend {
    /// Whether indexes outlive the process that built them.
    pub fn is_persistent(self) -> bool {
        match self {
            VectorBackend::Memory => false,
            VectorBackend::Qdrant => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    pub qdrant_url: String,
    pub collection_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub attempt_timeout_secs: u64,
    pub base_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub direct_top_k: usize,
    pub tool_top_k: usize,
    pub max_comments: usize,
    pub batch_concurrency: usize,
    pub history_messages: usize,
    /// Conversations untouched for this long are forgotten.
    pub thread_idle_secs: u64,
    pub max_threads: usize,
    pub summary_token_budget: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Labels for dataset columns outside the canonical review fields.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector: VectorConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub formatter: FormatterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let labels = [
            ("submission_date", "Data da Avaliação"),
            ("reviewer_id", "Id do Avaliador"),
            ("reviewer_birth_year", "Ano de Nascimento"),
            ("reviewer_gender", "Gênero"),
            ("reviewer_state", "Estado"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8081,
                cors_origins: vec!["http://127.0.0.1:8081".to_string()],
            },
            store: StoreConfig {
                database_url: "sqlite://reviews.db?mode=rwc".to_string(),
                dataset_path: PathBuf::from("data/B2W-Reviews01.csv"),
                max_connections: 5,
            },
            embeddings: EmbeddingsConfig {
                provider: EmbeddingProvider::FastEmbed,
                model_dir: PathBuf::from("/app/models/bge-small-en-v1.5"),
                endpoint: "http://localhost:11434/v1".to_string(),
                model: "nomic-embed-text".to_string(),
                dimension: 384,
                batch_size: 32,
                timeout_secs: 30,
            },
            vector: VectorConfig {
                backend: VectorBackend::Memory,
                qdrant_url: "http://localhost:6334".to_string(),
                collection_prefix: "reviews".to_string(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "mistral".to_string(),
                temperature: 0.0,
            },
            retry: RetryConfig {
                max_attempts: 5,
                attempt_timeout_secs: 120,
                base_backoff_ms: 500,
            },
            agent: AgentConfig {
                direct_top_k: 10,
                tool_top_k: 3,
                max_comments: 1000,
                batch_concurrency: 4,
                history_messages: 20,
                thread_idle_secs: 3600,
                max_threads: 10_000,
                summary_token_budget: 12_000,
            },
            formatter: FormatterConfig { labels },
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (`review-rag.toml` unless `path` is given),
    /// then `REVIEW_RAG__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.agent.direct_top_k == 0, "agent.direct_top_k must be at least 1"),
            (self.agent.tool_top_k == 0, "agent.tool_top_k must be at least 1"),
            (self.agent.max_comments == 0, "agent.max_comments must be at least 1"),
            (self.agent.batch_concurrency == 0, "agent.batch_concurrency must be at least 1"),
            (self.agent.max_threads == 0, "agent.max_threads must be at least 1"),
            (self.retry.max_attempts == 0, "retry.max_attempts must be at least 1"),
            (self.retry.attempt_timeout_secs == 0, "retry.attempt_timeout_secs must be at least 1"),
            (self.embeddings.dimension == 0, "embeddings.dimension must be at least 1"),
            (self.embeddings.batch_size == 0, "embeddings.batch_size must be at least 1"),
        ];

        for (failed, message) in checks {
            if failed {
                return Err(ReviewError::Config(message.to_string()));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.agent.direct_top_k, 10);
        assert_eq!(config.agent.tool_top_k, 3);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
base_url = "http://llm.internal/v1"
model = "qwen2.5"
temperature = 0.2

[vector]
backend = "qdrant"
qdrant_url = "http://qdrant:6334"
collection_prefix = "b2w"
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.llm.model, "qwen2.5");
        assert_eq!(config.vector.backend, VectorBackend::Qdrant);
        assert_eq!(config.server.port, 8081);
        assert_eq!(
            config.formatter.labels.get("reviewer_state").map(String::as_str),
            Some("Estado")
        );
    }

    #[test]
    fn only_qdrant_keeps_indexes() {
        assert!(!VectorBackend::Memory.is_persistent());
        assert!(VectorBackend::Qdrant.is_persistent());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut config = AppConfig::default();
        config.agent.direct_top_k = 0;
        assert!(matches!(config.validate(), Err(ReviewError::Config(_))));
    }
}
