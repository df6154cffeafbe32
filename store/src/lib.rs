//! # File Registry Store
//!
//! Persistence for the file metadata index. Every backend implements
//! [`MetadataStore`]; callers never see which one is behind the trait.
//!
//! ## Backends
//!
//! - [`SqliteStore`]: embedded SQLite with FTS5 ranking and in-process
//!   cosine search over stored vectors
//! - [`GraphStore`]: a remote graph-object service over HTTP, with native
//!   hybrid ranking
//!
//! ## Example
//!
//! ```no_run
//! use file_registry_store::FileDraft;
//! use file_registry_store::MetadataStore;
//! use file_registry_store::SqliteStore;
//! use file_registry_store::StoreOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), file_registry_store::StoreError> {
//!     let store = SqliteStore::open_in_memory(StoreOptions::default())?;
//!     let draft = FileDraft::new("local", "/docs/report.pdf", "sha256:ab12");
//!     let outcome = store.upsert_record(&draft).await?;
//!     println!("registered {} (new: {})", outcome.id, outcome.is_new);
//!     Ok(())
//! }
//! ```

mod error;
mod graph;
mod model;
mod sqlite;
mod store;
pub mod vector;

pub use error::Result;
pub use error::StoreError;
pub use graph::GraphStore;
pub use graph::GraphStoreConfig;
pub use model::*;
pub use sqlite::SqliteStore;
pub use store::MetadataStore;
pub use store::StoreOptions;
