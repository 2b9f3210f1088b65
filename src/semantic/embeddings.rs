//! Embedding generation backends.
//!
//! - `OpenAiEmbeddings`: any OpenAI-compatible `/embeddings` endpoint
//! - `LocalEmbeddings`: fastembed models run in-process (feature `local-embeddings`)
//!
//! Both return one vector per input text, in input order, at the model's
//! native width. Reshaping to the canonical width happens in the caller.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SemanticSearchConfig;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding configuration error: {0}")]
    Config(String),

    #[error("Embedding provider rejected credentials: {0}")]
    Auth(String),

    #[error("Embedding request failed: {0}")]
    Http(String),

    #[error("Could not decode embedding response: {0}")]
    Decode(String),

    #[error("Embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Http(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Local,
}

/// Everything a backend needs to serve one model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub provider: Provider,
    pub name: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Where local models are downloaded to
    pub cache_dir: PathBuf,
}

impl ModelConfig {
    /// Resolve the active model from configuration.
    ///
    /// Missing model names and missing credentials are reported here, before
    /// any request is made.
    pub fn resolve(
        config: &SemanticSearchConfig,
        model_override: Option<&str>,
        base_path: &std::path::Path,
    ) -> Result<Self, EmbeddingError> {
        let name = model_override
            .unwrap_or(&config.model)
            .trim()
            .to_string();
        if name.is_empty() {
            return Err(EmbeddingError::Config("no embedding model configured".into()));
        }

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        if config.provider == Provider::OpenAi && api_key.is_none() {
            return Err(EmbeddingError::Config(
                "api_key is not set (semantic_search.api_key or OPENAI_API_KEY)".into(),
            ));
        }

        Ok(Self {
            provider: config.provider,
            name,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_secs(config.request_timeout_secs),
            cache_dir: base_path.join("models"),
        })
    }
}

/// A source of embedding vectors.
pub trait EmbeddingClient: Send + Sync {
    /// Embed every text. The result has one vector per input, same order.
    fn generate(&self, texts: &[String], model: &ModelConfig)
        -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn generate_one(&self, text: &str, model: &ModelConfig) -> Result<Vec<f32>, EmbeddingError> {
        self.generate(&[text.to_string()], model)?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                got: 0,
            })
    }
}

/// Pick the backend for a provider.
pub fn client_for(provider: Provider) -> Box<dyn EmbeddingClient> {
    match provider {
        Provider::OpenAi => Box::new(OpenAiEmbeddings::new()),
        Provider::Local => Box::new(LocalEmbeddings::new()),
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for OpenAI-compatible embedding APIs.
pub struct OpenAiEmbeddings {
    client: reqwest::blocking::Client,
}

impl OpenAiEmbeddings {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for OpenAiEmbeddings {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingClient for OpenAiEmbeddings {
    fn generate(
        &self,
        texts: &[String],
        model: &ModelConfig,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/embeddings", model.api_base);
        log::debug!("POST {url} ({} inputs, model {})", texts.len(), model.name);

        let mut request = self
            .client
            .post(&url)
            .timeout(model.timeout)
            .json(&EmbeddingRequest {
                model: &model.name,
                input: texts,
            });
        if let Some(key) = &model.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|err| err.error.message)
                .unwrap_or(body);
            return match status.as_u16() {
                401 | 403 => Err(EmbeddingError::Auth(message)),
                code => Err(EmbeddingError::Http(format!("{code}: {message}"))),
            };
        }

        parse_response(&body, texts.len())
    }
}

/// Decode an `/embeddings` response body into vectors in request order.
fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Decode(e.to_string()))?;

    if response.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: response.data.len(),
        });
    }

    response.data.sort_by_key(|datum| datum.index);
    Ok(response.data.into_iter().map(|datum| datum.embedding).collect())
}

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::Mutex;

    use fastembed::{InitOptions, TextEmbedding};

    use super::{EmbeddingClient, EmbeddingError, ModelConfig};

    /// Wrapper around fastembed's TextEmbedding model.
    /// Uses a Mutex because fastembed's embed() requires &mut self.
    /// The model is loaded on first use and reloaded when the name changes.
    pub struct LocalEmbeddings {
        model: Mutex<Option<(String, TextEmbedding)>>,
    }

    impl LocalEmbeddings {
        pub fn new() -> Self {
            Self {
                model: Mutex::new(None),
            }
        }

        /// Parse model name string to fastembed enum.
        pub(super) fn parse_model_name(
            name: &str,
        ) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
            match name.to_lowercase().as_str() {
                "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
                "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                    Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
                }
                "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
                "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                    Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
                }
                "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
                "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                    Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
                }
                "bge-large-en-v1.5" | "bgelargeenv15" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
                "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                    Ok(fastembed::EmbeddingModel::BGELargeENV15Q)
                }
                _ => Err(EmbeddingError::Config(format!(
                    "Unknown local model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                    name
                ))),
            }
        }

        fn load(config: &ModelConfig) -> Result<TextEmbedding, EmbeddingError> {
            let model_enum = Self::parse_model_name(&config.name)?;

            std::fs::create_dir_all(&config.cache_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            log::info!("loading local embedding model '{}'", config.name);
            let options = InitOptions::new(model_enum)
                .with_cache_dir(config.cache_dir.clone())
                .with_show_download_progress(true);

            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        }
    }

    impl Default for LocalEmbeddings {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EmbeddingClient for LocalEmbeddings {
        fn generate(
            &self,
            texts: &[String],
            config: &ModelConfig,
        ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(vec![]);
            }

            let mut guard = self.model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            let loaded = matches!(guard.as_ref(), Some((name, _)) if *name == config.name);
            if !loaded {
                *guard = Some((config.name.clone(), Self::load(config)?));
            }

            let (_, model) = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::InitFailed("model not loaded".to_string()))?;

            let vectors = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            if vectors.len() != texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    got: vectors.len(),
                });
            }
            Ok(vectors)
        }
    }
}

#[cfg(not(feature = "local-embeddings"))]
mod local {
    use super::{EmbeddingClient, EmbeddingError, ModelConfig};

    #[derive(Default)]
    pub struct LocalEmbeddings;

    impl LocalEmbeddings {
        pub fn new() -> Self {
            Self
        }
    }

    impl EmbeddingClient for LocalEmbeddings {
        fn generate(&self, _: &[String], _: &ModelConfig) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Config(
                "built without the local-embeddings feature".to_string(),
            ))
        }
    }
}

pub use local::LocalEmbeddings;
