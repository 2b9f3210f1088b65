//! Semantic and lexical search infrastructure for vocabulary entries.
//!
//! # Architecture
//!
//! - `normalize`: Reshapes vectors to the canonical width and unit length
//! - `index`: SQLite-backed vector index with cosine distance ranking
//! - `lexical`: FTS5 mirror of word documents and its startup migration
//! - `embeddings`: Embedding providers (OpenAI-compatible HTTP, fastembed)
//! - `preprocess`: Text preparation for embedding input
//! - `batch`: Backfill job that embeds documents without a vector
//! - `service`: Query-side semantic search
//! - `hybrid`: Rank fusion of semantic and lexical results

pub mod batch;
pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod lexical;
pub mod normalize;
mod preprocess;
mod service;

pub use batch::{
    BatchError, BatchHandle, BatchOptions, BatchOrchestrator, BatchOutcome, BatchReport,
    BatchStatus, ProgressObserver,
};
pub use embeddings::{client_for, EmbeddingClient, EmbeddingError, ModelConfig, Provider};
pub use hybrid::rrf_fusion;
pub use index::{IndexStats, SearchHit, VectorIndex};
pub use lexical::{LexicalHit, LexicalIndex, SyncAction, SyncReport};
pub use service::SemanticQueryService;
