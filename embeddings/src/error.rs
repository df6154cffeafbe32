use thiserror::Error;

/// Errors that can occur during embedding operations
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Invalid input provided to the provider
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// More texts than the provider accepts in one call
    #[error("maximum {max} texts per batch, got {actual}")]
    TooManyTexts { max: usize, actual: usize },

    /// Provider answered with a non-success status
    #[error("embedding API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// Provider returned a different number of vectors than texts sent
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// A sub-batch failed; `start-end` is the half-open range of inputs
    #[error("batch {start}-{end} failed: {source}")]
    BatchFailed {
        start: usize,
        end: usize,
        #[source]
        source: Box<EmbeddingError>,
    },

    /// Usage sink rejected a record
    #[error("usage recording failed: {0}")]
    Usage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
