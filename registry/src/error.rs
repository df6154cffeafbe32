use file_registry_embeddings::EmbeddingError;
use file_registry_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("no embedding provider is configured")]
    EmbeddingUnavailable,

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Short machine-readable code for callers that branch on failure kind.
    pub fn reason(&self) -> &'static str {
        match self {
            RegistryError::Validation(_)
            | RegistryError::UnknownOperation(_)
            | RegistryError::Config(_) => "validation_error",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Store(err) => match err {
                StoreError::NotFound(_) => "not_found",
                StoreError::Validation(_)
                | StoreError::ConstraintViolation(_)
                | StoreError::DimensionMismatch { .. } => "validation_error",
                _ => "backend_error",
            },
            RegistryError::Embedding(EmbeddingError::InvalidInput(_)) => "validation_error",
            RegistryError::Embedding(_) | RegistryError::Io(_) => "backend_error",
            RegistryError::EmbeddingUnavailable => "embedding_unavailable",
            RegistryError::Cancelled => "cancelled",
        }
    }

    /// `{"error": {"reason", "message"}}` body for operation callers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "reason": self.reason(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            RegistryError::from(StoreError::NotFound("local:/x".into())).reason(),
            "not_found"
        );
        assert_eq!(
            RegistryError::from(StoreError::ConstraintViolation("hash".into())).reason(),
            "validation_error"
        );
        assert_eq!(
            RegistryError::from(StoreError::backend("get", "1", "boom")).reason(),
            "backend_error"
        );
        assert_eq!(RegistryError::EmbeddingUnavailable.reason(), "embedding_unavailable");
        assert_eq!(RegistryError::Cancelled.reason(), "cancelled");
    }

    #[test]
    fn test_error_body_shape() {
        let body = RegistryError::Validation("path is required".into()).to_json();
        assert_eq!(body["error"]["reason"], "validation_error");
        assert_eq!(body["error"]["message"], "invalid input: path is required");
    }
}
