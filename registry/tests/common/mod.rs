#![allow(dead_code)]

use async_trait::async_trait;
use file_registry_core::Registry;
use file_registry_core::RegistryConfig;
use file_registry_embeddings::Embedded;
use file_registry_embeddings::EmbeddingError;
use file_registry_embeddings::EmbeddingProvider;
use file_registry_embeddings::EmbeddingUsage;
use file_registry_embeddings::TaskType;
use file_registry_embeddings::UsageLedger;
use file_registry_embeddings::UsageRecord;
use file_registry_embeddings::UsageSink;
use file_registry_store::SqliteStore;
use file_registry_store::StoreOptions;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

pub const DIM: usize = 3;

/// Maps text onto three topic axes: invoices, beaches, everything else.
#[derive(Default)]
pub struct TopicEmbedder {
    pub calls: Mutex<Vec<(usize, TaskType)>>,
}

pub fn topic_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    if text.contains("invoice") {
        vec![1.0, 0.1, 0.0]
    } else if text.contains("beach") {
        vec![0.0, 1.0, 0.1]
    } else {
        vec![0.1, 0.0, 1.0]
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "topics"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> file_registry_embeddings::Result<Embedded> {
        self.calls.lock().unwrap().push((texts.len(), task));
        Ok(Embedded {
            vectors: texts.iter().map(|t| topic_vector(t)).collect(),
            usage: EmbeddingUsage {
                total_tokens: texts.len() as u64 * 5,
                billable_characters: 0,
            },
        })
    }
}

pub struct Harness {
    pub registry: Registry,
    pub embedder: Arc<TopicEmbedder>,
    pub ledger: Arc<UsageLedger>,
}

fn store() -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::open_in_memory(StoreOptions {
            embedding_dimension: DIM,
            ..Default::default()
        })
        .unwrap(),
    )
}

/// Registry over an in-memory store with the topic embedder wired in.
pub fn harness() -> Harness {
    harness_with(RegistryConfig::default())
}

pub fn harness_with(config: RegistryConfig) -> Harness {
    let embedder = Arc::new(TopicEmbedder::default());
    let ledger = Arc::new(UsageLedger::new());
    let provider: Arc<dyn EmbeddingProvider> = embedder.clone();
    let sink: Arc<dyn UsageSink> = ledger.clone();
    let registry = Registry::new(store(), Some(provider), Some(sink), config);
    Harness {
        registry,
        embedder,
        ledger,
    }
}

/// Sink that rejects every record and counts the attempts.
#[derive(Default)]
pub struct RejectingSink {
    pub attempts: AtomicUsize,
}

impl RejectingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSink for RejectingSink {
    async fn record(&self, _usage: UsageRecord) -> file_registry_embeddings::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EmbeddingError::InvalidInput("usage store offline".to_string()))
    }
}

/// Registry whose usage sink always fails.
pub fn with_rejecting_sink() -> (Registry, Arc<RejectingSink>) {
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(TopicEmbedder::default());
    let sink = Arc::new(RejectingSink::default());
    let usage: Arc<dyn UsageSink> = sink.clone();
    let registry = Registry::new(store(), Some(provider), Some(usage), RegistryConfig::default());
    (registry, sink)
}

/// Registry with no embedding provider.
pub fn lexical_only() -> Registry {
    Registry::new(store(), None, None, RegistryConfig::default())
}

pub async fn register(registry: &Registry, args: Value) -> Value {
    registry.call("register", args).await.unwrap()
}

pub async fn register_file(registry: &Registry, path: &str, hash: &str, size: u64) -> String {
    let body = register(
        registry,
        json!({"source": "local", "path": path, "content_hash": hash, "size": size}),
    )
    .await;
    body["id"].as_str().unwrap().to_string()
}
