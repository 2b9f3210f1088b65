use crate::semantic::{BatchError, EmbeddingError};
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("document not found")]
    NotFound,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("an embedding batch is already running")]
    BatchRunning,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::AlreadyRunning => AppError::BatchRunning,
            BatchError::Config(err) => AppError::Embedding(err),
            BatchError::Spawn(err) => AppError::IO(err),
        }
    }
}
