//! # File Registry Embeddings
//!
//! Text embeddings for semantic file search. Vectors come from a remote
//! provider behind [`EmbeddingProvider`]; [`VertexClient`] speaks the
//! Vertex-style `predict` protocol.
//!
//! ## Features
//!
//! - Document and query task hints
//! - Provider-capped sub-batching with range-aware errors
//! - Word-boundary truncation of oversized inputs
//! - Token usage accounting through [`UsageSink`]
//!
//! ## Example
//!
//! ```no_run
//! use file_registry_embeddings::EmbeddingProvider;
//! use file_registry_embeddings::TaskType;
//! use file_registry_embeddings::VertexClient;
//! use file_registry_embeddings::VertexConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), file_registry_embeddings::EmbeddingError> {
//!     let client = VertexClient::new(VertexConfig {
//!         endpoint: "https://example.invalid/v1/models".to_string(),
//!         ..Default::default()
//!     })?;
//!     let (vector, usage) = client.embed_one("tax report 2024", TaskType::RetrievalQuery).await?;
//!     println!("{} dims, {} tokens", vector.len(), usage.total_tokens);
//!     Ok(())
//! }
//! ```

mod error;
mod provider;
mod text;
mod usage;
mod vertex;

pub use error::EmbeddingError;
pub use error::Result;
pub use provider::Embedded;
pub use provider::EmbeddingProvider;
pub use provider::EmbeddingUsage;
pub use provider::MAX_TEXTS_PER_CALL;
pub use provider::TaskType;
pub use provider::embed_in_batches;
pub use text::DEFAULT_MAX_CHARS;
pub use text::DocumentText;
pub use text::prepare_text;
pub use text::truncate_text;
pub use usage::UsageLedger;
pub use usage::UsageRecord;
pub use usage::UsageSink;
pub use usage::UsageTotals;
pub use vertex::DEFAULT_MODEL;
pub use vertex::VertexClient;
pub use vertex::VertexConfig;
