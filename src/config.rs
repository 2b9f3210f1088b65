use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::Provider;

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model of the default (OpenAI-compatible) provider
const DEFAULT_SEMANTIC_MODEL: &str = "text-embedding-3-small";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
/// Default similarity threshold for semantic search
const DEFAULT_SEMANTIC_THRESHOLD: f64 = 0.5;
const DEFAULT_BATCH_SIZE: usize = 10;
/// Width every stored vector is reshaped to
const DEFAULT_CANONICAL_WIDTH: usize = 1536;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.6;

/// Configuration for semantic search functionality
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Enable or disable semantic search
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub provider: Provider,

    /// Model name for embeddings (e.g., "text-embedding-3-small")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Falls back to OPENAI_API_KEY when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Documents per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_semantic_threshold")]
    pub default_threshold: f64,

    #[serde(default = "default_canonical_width")]
    pub canonical_width: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: Provider::default(),
            model: DEFAULT_SEMANTIC_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            batch_size: DEFAULT_BATCH_SIZE,
            default_threshold: DEFAULT_SEMANTIC_THRESHOLD,
            canonical_width: DEFAULT_CANONICAL_WIDTH,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_SEMANTIC_MODEL.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_semantic_threshold() -> f64 {
    DEFAULT_SEMANTIC_THRESHOLD
}

fn default_canonical_width() -> usize {
    DEFAULT_CANONICAL_WIDTH
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Result limit when a search does not name one
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Share of the semantic ranking in hybrid search [0.0, 1.0]
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,

    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            semantic_search: SemanticSearchConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_semantic_weight() -> f64 {
    DEFAULT_SEMANTIC_WEIGHT
}

impl Config {
    fn validate(&mut self) -> anyhow::Result<()> {
        if self.search_limit == 0 {
            self.search_limit = 1
        }

        if !(0.0..=1.0).contains(&self.semantic_weight) {
            bail!(
                "semantic_weight must be between 0.0 and 1.0, got {}",
                self.semantic_weight
            );
        }

        // validate semantic_search config
        let sem = &mut self.semantic_search;
        if !(0.0..=1.0).contains(&sem.default_threshold) {
            bail!(
                "semantic_search.default_threshold must be between 0.0 and 1.0, got {}",
                sem.default_threshold
            );
        }

        if sem.batch_size == 0 {
            sem.batch_size = 1
        }

        if sem.canonical_width == 0 {
            bail!("semantic_search.canonical_width must be greater than 0");
        }

        if sem.request_timeout_secs == 0 {
            bail!("semantic_search.request_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
