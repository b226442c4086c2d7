use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("persisted index does not match configuration: expected {expected}, stored {stored}")]
    IndexConfigMismatch { expected: String, stored: String },

    #[error("an indexing job is already running for {0}")]
    JobAlreadyRunning(PathBuf),

    #[error("indexing job was cancelled")]
    JobCancelled,

    #[error("corrupt index artifact: {0}")]
    Persist(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("serialize error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
