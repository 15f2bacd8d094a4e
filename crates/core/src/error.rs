use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source produced no content after normalization")]
    EmptySource,

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ingestion already in progress for source {0}")]
    IngestInProgress(Uuid),

    #[error("store failure for source {source_id} during {stage}: {error}")]
    Store {
        source_id: Uuid,
        stage: &'static str,
        #[source]
        error: StoreError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector store unreachable: {0}")]
    Unavailable(String),

    #[error("chunk {0} already stored and overwrite was not requested")]
    DuplicateChunk(Uuid),

    #[error("vector store call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("chunk payload rejected: {0}")]
    InvalidPayload(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("store failure during retrieval: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
