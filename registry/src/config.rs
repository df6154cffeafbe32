use crate::error::RegistryError;
use crate::error::Result;
use file_registry_embeddings::DEFAULT_MAX_CHARS;
use file_registry_embeddings::DEFAULT_MODEL;
use file_registry_embeddings::MAX_TEXTS_PER_CALL;
use file_registry_embeddings::VertexClient;
use file_registry_embeddings::VertexConfig;
use file_registry_store::GraphStore;
use file_registry_store::GraphStoreConfig;
use file_registry_store::MetadataStore;
use file_registry_store::SqliteStore;
use file_registry_store::StoreOptions;
use file_registry_store::vector::DEFAULT_EMBEDDING_DIM;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration, usually read from `~/.file-registry/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub store: StoreConfig,

    /// Absent means semantic features report `embedding_unavailable`.
    #[serde(default)]
    pub embedding: Option<EmbeddingSettings>,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub crawl: CrawlConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Graph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Graph service root
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the graph service token
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Written to `performed_by` in the activity log
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_db_path() -> PathBuf {
    config_dir().join("files.db")
}

fn default_store_timeout_secs() -> u64 {
    30
}

fn default_embedding_dimension() -> usize {
    DEFAULT_EMBEDDING_DIM
}

fn default_actor() -> String {
    "llm".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_store_timeout_secs(),
            embedding_dimension: default_embedding_dimension(),
            actor: default_actor(),
        }
    }
}

impl StoreConfig {
    fn options(&self) -> StoreOptions {
        StoreOptions {
            embedding_dimension: self.embedding_dimension,
            actor: self.actor.clone(),
        }
    }

    /// Open the configured backend.
    pub fn connect(&self) -> Result<Arc<dyn MetadataStore>> {
        match self.backend {
            StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&self.path, self.options())?)),
            StoreBackend::Graph => {
                let base_url = self
                    .base_url
                    .clone()
                    .ok_or_else(|| RegistryError::Config("store.base_url is required".into()))?;
                let config = GraphStoreConfig {
                    base_url,
                    api_key: secret_from_env(self.api_key_env.as_deref()),
                    timeout: Duration::from_secs(self.timeout_secs),
                    ..Default::default()
                };
                Ok(Arc::new(GraphStore::new(config, self.options())?))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Models collection URL of a Vertex-style predict API
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_provider")]
    pub provider: String,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Texts per provider call; capped at 250
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_provider() -> String {
    "vertex".to_string()
}

fn default_max_batch() -> usize {
    MAX_TEXTS_PER_CALL
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_embedding_timeout_secs() -> u64 {
    60
}

impl EmbeddingSettings {
    pub fn client(&self) -> Result<VertexClient> {
        Ok(VertexClient::new(VertexConfig {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            provider_name: self.provider.clone(),
            api_key: secret_from_env(self.api_key_env.as_deref()),
            dimension: self.dimension,
            max_batch: self.max_batch,
            max_chars: self.max_chars,
            timeout: Duration::from_secs(self.timeout_secs),
        })?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrent tasks per batch call
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_register_cap")]
    pub register_cap: usize,

    #[serde(default = "default_get_cap")]
    pub get_cap: usize,

    /// Cap for tag, untag and remove batches
    #[serde(default = "default_mutate_cap")]
    pub mutate_cap: usize,
}

fn default_workers() -> usize {
    10
}

fn default_register_cap() -> usize {
    50
}

fn default_get_cap() -> usize {
    100
}

fn default_mutate_cap() -> usize {
    500
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            register_cap: default_register_cap(),
            get_cap: default_get_cap(),
            mutate_cap: default_mutate_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "default_semantic_limit")]
    pub semantic_limit: usize,

    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Candidates fetched per ranking before fusion
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
}

fn default_search_limit() -> usize {
    20
}

fn default_semantic_limit() -> usize {
    10
}

fn default_lexical_weight() -> f32 {
    0.3
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_candidate_pool() -> usize {
    50
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            semantic_limit: default_semantic_limit(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            candidate_pool: default_candidate_pool(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Source name for crawled files
    #[serde(default = "default_crawl_source")]
    pub source: String,

    /// Bytes covered by the partial hash
    #[serde(default = "default_partial_hash_size")]
    pub partial_hash_size: usize,
}

fn default_crawl_source() -> String {
    "local".to_string()
}

fn default_partial_hash_size() -> usize {
    64 * 1024
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            source: default_crawl_source(),
            partial_hash_size: default_partial_hash_size(),
        }
    }
}

/// `~/.file-registry`, or `.file-registry` when no home directory exists.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".file-registry"))
        .unwrap_or_else(|| PathBuf::from(".file-registry"))
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn secret_from_env(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
        .filter(|value| !value.trim().is_empty())
}

impl RegistryConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: RegistryConfig = toml::from_str(&raw)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))?;
        config.validate().map_err(RegistryError::Config)?;
        Ok(config)
    }

    /// `path` when given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.store.embedding_dimension == 0 {
            return Err("store.embedding_dimension must be > 0".to_string());
        }
        if self.store.backend == StoreBackend::Graph && self.store.base_url.is_none() {
            return Err("store.base_url is required for the graph backend".to_string());
        }
        if let Some(embedding) = &self.embedding {
            if embedding.endpoint.trim().is_empty() {
                return Err("embedding.endpoint must not be empty".to_string());
            }
            if embedding.dimension != self.store.embedding_dimension {
                return Err(format!(
                    "embedding.dimension ({}) must match store.embedding_dimension ({})",
                    embedding.dimension, self.store.embedding_dimension
                ));
            }
            if embedding.max_batch == 0 || embedding.max_batch > MAX_TEXTS_PER_CALL {
                return Err(format!(
                    "embedding.max_batch must be between 1 and {MAX_TEXTS_PER_CALL}"
                ));
            }
        }
        if self.batch.workers == 0 {
            return Err("batch.workers must be > 0".to_string());
        }
        if self.batch.register_cap == 0 || self.batch.get_cap == 0 || self.batch.mutate_cap == 0 {
            return Err("batch caps must be > 0".to_string());
        }
        let weights = [self.search.lexical_weight, self.search.vector_weight];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err("search weights must be within 0..=1".to_string());
        }
        if self.crawl.partial_hash_size == 0 {
            return Err("crawl.partial_hash_size must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.batch.workers, 10);
        assert_eq!(config.batch.register_cap, 50);
        assert_eq!(config.batch.get_cap, 100);
        assert_eq!(config.search.lexical_weight, 0.3);
        assert_eq!(config.search.vector_weight, 0.7);
        assert_eq!(config.crawl.partial_hash_size, 65536);
        assert!(config.embedding.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RegistryConfig = toml::from_str(
            r#"
            [store]
            backend = "graph"
            base_url = "http://localhost:9000"

            [embedding]
            endpoint = "http://localhost:9001/v1/models"
            max_batch = 100

            [batch]
            workers = 4
            "#,
        )
        .expect("parse");

        assert_eq!(config.store.backend, StoreBackend::Graph);
        assert_eq!(config.store.timeout_secs, 30);
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.batch.mutate_cap, 500);
        let embedding = config.embedding.as_ref().expect("embedding section");
        assert_eq!(embedding.model, DEFAULT_MODEL);
        assert_eq!(embedding.max_batch, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RegistryConfig::default();
        config.batch.workers = 0;
        assert!(config.validate().is_err());

        let mut config = RegistryConfig::default();
        config.store.backend = StoreBackend::Graph;
        assert!(config.validate().is_err());

        let mut config = RegistryConfig::default();
        config.search.lexical_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[batch]\nworkers = \"many\"\n").expect("write");
        let err = RegistryConfig::load(&path).expect_err("invalid toml");
        assert!(err.to_string().contains("config.toml"), "{err}");
    }
}
