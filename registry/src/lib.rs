//! # File Registry
//!
//! A passive index of file metadata gathered from many sources. Callers push
//! records in; the registry deduplicates, tags, searches and embeds them
//! without ever fetching file bytes itself (the local crawler reads bytes
//! only to hash them).
//!
//! ## Features
//!
//! - **Search**: filtered listing, full-text ranking, and semantic or hybrid
//!   ranking over stored embeddings
//! - **Duplicates**: content-hash grouping with wasted-space accounting
//! - **Batches**: bounded fan-out with per-item outcomes and cancellation
//! - **Crawl**: walk a local tree, hash, classify and register new files
//!
//! ## Example
//!
//! ```no_run
//! use file_registry_core::Registry;
//! use file_registry_core::RegistryConfig;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), file_registry_core::RegistryError> {
//!     let registry = Registry::from_config(RegistryConfig::default(), None)?;
//!     let registered = registry
//!         .call(
//!             "register",
//!             json!({"source": "local", "path": "/docs/report.pdf", "content_hash": "ab12"}),
//!         )
//!         .await?;
//!     println!("{registered}");
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod crawler;
pub mod duplicates;
mod error;
pub mod fusion;
pub mod hash;
pub mod mime;
pub mod ops;
pub mod pipeline;
mod registry;
pub mod search;
pub mod tags;

pub use batch::BatchExecutor;
pub use batch::BatchItem;
pub use batch::BatchReport;
pub use config::RegistryConfig;
pub use crawler::CrawlReport;
pub use crawler::CrawlRequest;
pub use crawler::Crawler;
pub use duplicates::DuplicateDetector;
pub use duplicates::DuplicateGroup;
pub use error::RegistryError;
pub use error::Result;
pub use pipeline::EmbeddingPipeline;
pub use registry::OPERATIONS;
pub use registry::Registry;
pub use search::SearchEngine;
pub use tags::TagManager;
