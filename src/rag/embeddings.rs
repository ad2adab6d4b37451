use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingProvider, EmbeddingsConfig};
use crate::error::{Result, ReviewError};

/// Text → fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ReviewError::Embedding("embedding service returned no vectors".into()))
    }
}

pub async fn from_config(config: &EmbeddingsConfig) -> Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match config.provider {
        EmbeddingProvider::FastEmbed => {
            Box::new(FastEmbedder::new(&config.model_dir, config.dimension)?)
        }
        EmbeddingProvider::Http => Box::new(HttpEmbedder::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.dimension,
            Duration::from_secs(config.timeout_secs),
        )?),
        EmbeddingProvider::Hashing => Box::new(HashingEmbedder::new(config.dimension)),
    };
    Ok(embedder)
}

/// Local ONNX model loaded from a directory holding `model.onnx` and the tokenizer files.
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedder {
    pub fn new(model_dir: &Path, dimension: usize) -> Result<Self> {
        tracing::info!("Initializing embedding model from {}", model_dir.display());

        if !model_dir.exists() {
            return Err(ReviewError::Embedding(format!(
                "model directory not found: {}",
                model_dir.display()
            )));
        }

        let read = |name: &str| {
            std::fs::read(model_dir.join(name))
                .map_err(|e| ReviewError::Embedding(format!("failed to read {}: {}", name, e)))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        let model = TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| ReviewError::Embedding(format!("failed to initialize model: {}", e)))?;

        tracing::info!("Embedding model initialized");
        Ok(Self {
            model: Arc::new(model),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    /// ONNX inference is CPU-bound and runs on the blocking pool.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| ReviewError::Embedding(format!("embedding task failed: {}", e)))?
            .map_err(|e| ReviewError::Embedding(e.to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint (Ollama, LiteLLM, vLLM...).
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl HttpEmbedder {
    pub fn new(base_url: String, model: String, dimension: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReviewError::Embedding(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: &texts,
            })
            .send()
            .await
            .map_err(|e| upstream_error("embeddings", e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewError::Upstream {
                service: "embeddings".into(),
                message: format!("{} - {}", status, body),
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| upstream_error("embeddings", e, self.timeout))?;

        if parsed.data.len() != texts.len() {
            return Err(ReviewError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

pub(crate) fn upstream_error(service: &str, e: reqwest::Error, timeout: Duration) -> ReviewError {
    if e.is_timeout() {
        ReviewError::UpstreamTimeout {
            service: service.to_string(),
            elapsed: timeout,
        }
    } else {
        ReviewError::Upstream {
            service: service.to_string(),
            message: e.to_string(),
        }
    }
}

/// Feature-hashing embedder over character trigrams and whole words.
/// Deterministic and model-free: identical texts always map to identical vectors.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return vector;
        }

        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        };

        for word in normalized.split_whitespace() {
            add(word, 2.0);
        }

        let padded: Vec<char> = format!("  {} ", normalized).chars().collect();
        for window in padded.windows(3) {
            let gram: String = window.iter().collect();
            add(&gram, 1.0);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
