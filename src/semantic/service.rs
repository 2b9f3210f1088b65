//! Semantic search service for vocabulary similarity search.
//!
//! Embeds the query text with the active model, reshapes it to the index
//! width and asks the vector index for the closest documents. Search never
//! fails: disabled configuration, empty queries and provider or store
//! errors all produce an empty result.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SemanticSearchConfig;
use crate::semantic::embeddings::{EmbeddingClient, EmbeddingError, ModelConfig};
use crate::semantic::index::{SearchHit, VectorIndex};
use crate::semantic::normalize::{l2_norm, to_canonical};

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("Semantic search is disabled")]
    Disabled,

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Query embedding is empty")]
    EmptyEmbedding,
}

pub struct SemanticQueryService {
    index: Arc<VectorIndex>,
    client: Arc<dyn EmbeddingClient>,
    config: SemanticSearchConfig,
    base_path: PathBuf,
}

impl SemanticQueryService {
    pub fn new(
        index: Arc<VectorIndex>,
        client: Arc<dyn EmbeddingClient>,
        config: SemanticSearchConfig,
        base_path: PathBuf,
    ) -> Self {
        Self {
            index,
            client,
            config,
            base_path,
        }
    }

    /// Check if semantic search is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Search for documents similar to `query`.
    ///
    /// # Arguments
    /// * `query` - The search query text
    /// * `limit` - Maximum results to return
    /// * `threshold` - Minimum similarity (uses config default if None)
    ///
    /// # Returns
    /// Hits sorted by similarity (highest first), or nothing on any failure.
    pub fn search(&self, query: &str, limit: usize, threshold: Option<f64>) -> Vec<SearchHit> {
        if query.trim().is_empty() || limit == 0 {
            return vec![];
        }

        match self.try_search(query, limit, threshold) {
            Ok(hits) => hits,
            Err(SemanticSearchError::Disabled) => {
                log::debug!("semantic search requested while disabled");
                vec![]
            }
            Err(err) => {
                log::warn!("semantic search for {query:?} failed: {err}");
                vec![]
            }
        }
    }

    fn try_search(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<SearchHit>, SemanticSearchError> {
        if !self.config.enabled {
            return Err(SemanticSearchError::Disabled);
        }

        let model = ModelConfig::resolve(&self.config, None, &self.base_path)?;
        let embedding = self.client.generate_one(query.trim(), &model)?;
        if embedding.is_empty() || l2_norm(&embedding) == 0.0 {
            return Err(SemanticSearchError::EmptyEmbedding);
        }

        let query_vector = to_canonical(&embedding, self.index.dimensions());
        let threshold = threshold.unwrap_or(self.config.default_threshold);

        Ok(self
            .index
            .search_model(&query_vector, &model.name, limit, threshold))
    }
}
