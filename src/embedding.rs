//! Embedding providers backed by the network or a local model.
//!
//! The [`EmbeddingProvider`] trait and the deterministic [`HashEmbedder`]
//! live in `knowledge-harness-core`. This module adds:
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance.
//! - **`LocalProvider`**: runs fastembed in-process (feature `local-embeddings`).
//!
//! Use [`create_provider`] to pick one from configuration:
//!
//! ```rust,no_run
//! # use knowledge_harness::config::EmbeddingConfig;
//! # use knowledge_harness::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "fnv1a-hash");
//! ```
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use knowledge_harness_core::embedding::{check_batch, EmbeddingProvider, HashEmbedder};

use crate::config::EmbeddingConfig;

const DEFAULT_HASH_DIMS: usize = 384;
const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Which wire format an HTTP provider speaks.
#[derive(Debug, Clone, Copy)]
enum Api {
    OpenAI,
    Ollama,
}

impl Api {
    fn label(self) -> &'static str {
        match self {
            Api::OpenAI => "OpenAI",
            Api::Ollama => "Ollama",
        }
    }

    fn endpoint(self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            Api::OpenAI => format!("{}/v1/embeddings", base),
            Api::Ollama => format!("{}/api/embed", base),
        }
    }

    fn parse(self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        match self {
            Api::OpenAI => parse_openai_response(json),
            Api::Ollama => parse_ollama_response(json),
        }
    }
}

/// Shared request loop for the HTTP providers.
struct HttpEmbedder {
    api: Api,
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl HttpEmbedder {
    fn new(
        api: Api,
        config: &EmbeddingConfig,
        default_url: &str,
        api_key: Option<String>,
    ) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            anyhow::anyhow!("embedding.model required for {} provider", api.label())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api,
            client,
            url: config.url.clone().unwrap_or_else(|| default_url.to_string()),
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = self.api.endpoint(&self.url);
        let label = self.api.label();

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&endpoint)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return self.api.parse(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "{} API error {}: {}",
                            label,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("{} API error {}: {}", label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "{} connection error ({}): {}",
                        label,
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    http: HttpEmbedder,
    dims: usize,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            http: HttpEmbedder::new(Api::OpenAI, config, OPENAI_URL, Some(api_key))?,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.http.embed(texts).await?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
/// Requires an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    http: HttpEmbedder,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            http: HttpEmbedder::new(Api::Ollama, config, OLLAMA_URL, None)?,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.http.embed(texts).await?;
        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let slot = Arc::clone(&self.model);
        let batch_size = self.batch_size;
        let input = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not initialized"))?;
            model
                .embed(input, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Create the [`EmbeddingProvider`] named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ollama_config(url: &str, max_retries: u32) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(3),
            url: Some(url.to_string()),
            max_retries,
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_provider_is_default() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), HashEmbedder::MODEL_NAME);
        assert_eq!(provider.dims(), DEFAULT_HASH_DIMS);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [1]})).is_err());
    }

    #[tokio::test]
    async fn test_ollama_embeds_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ollama_config(&server.uri(), 0)).unwrap();
        let vectors = provider
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_ollama_wrong_dims_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embeddings": [[1.0, 0.0]]})),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ollama_config(&server.uri(), 0)).unwrap();
        let err = provider.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_client_error_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ollama_config(&server.uri(), 3)).unwrap();
        let err = provider.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(&ollama_config(&server.uri(), 0)).unwrap();
        let err = provider.embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
