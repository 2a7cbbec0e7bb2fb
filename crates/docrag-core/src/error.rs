//! Error types for docrag.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for docrag operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Content extraction failed
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractError),

    /// Chunking failed
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Vector index operation failed
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Metadata store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Search failed on every branch
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Answer generation failed
    #[error("generation error: {0}")]
    Generation(#[from] GenerateError),

    /// Ingestion job failed
    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller-supplied parameter out of bounds
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Content extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("extraction produced no text")]
    Empty,

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunking errors.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// Segments were present but tokenized to nothing
    #[error("no tokens in extracted text")]
    Empty,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Embedding client errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Vector index errors. `DimensionMismatch` and `Corrupt` are fatal for the
/// index component; operator intervention (rebuild) is required.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index corrupt: {0}")]
    Corrupt(String),

    #[error("index file missing: {0}")]
    Missing(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("insert failed: {0}")]
    Insert(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Search errors. Individual branch failures degrade to empty results;
/// `Unavailable` is returned only when no branch succeeded.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search unavailable: every branch failed")]
    Unavailable,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),
}

/// Generation client errors.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("generation provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed generation response: {0}")]
    InvalidResponse(String),

    #[error("stream interrupted: {0}")]
    Stream(String),
}

/// Ingestion job errors. The worker's outer loop converts these into
/// document state transitions; none escape a job.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("extraction produced no indexable text")]
    ExtractionEmpty,

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("index update failed: {0}")]
    Index(#[from] IndexError),

    #[error("store update failed: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for docrag operations.
pub type Result<T> = std::result::Result<T, Error>;
