use crate::error::RegistryError;
use crate::error::Result;
use file_registry_embeddings::DocumentText;
use file_registry_embeddings::EmbeddingProvider;
use file_registry_embeddings::EmbeddingUsage;
use file_registry_embeddings::TaskType;
use file_registry_embeddings::UsageRecord;
use file_registry_embeddings::UsageSink;
use file_registry_embeddings::embed_in_batches;
use file_registry_embeddings::prepare_text;
use file_registry_store::FileRecord;
use file_registry_store::MetadataStore;
use std::sync::Arc;
use tracing::info;
use tracing::warn;

pub const DEFAULT_PENDING_BATCH: usize = 50;

fn document_of(record: &FileRecord) -> DocumentText<'_> {
    DocumentText {
        filename: &record.filename,
        path: &record.path,
        category: record.category.as_deref(),
        subcategory: record.subcategory.as_deref(),
        content_text: record.content_text.as_deref(),
        content_preview: record.content_preview.as_deref(),
    }
}

/// Turns record text into stored vectors.
#[derive(Clone)]
pub struct EmbeddingPipeline {
    store: Arc<dyn MetadataStore>,
    provider: Arc<dyn EmbeddingProvider>,
    usage: Option<Arc<dyn UsageSink>>,
}

impl EmbeddingPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        provider: Arc<dyn EmbeddingProvider>,
        usage: Option<Arc<dyn UsageSink>>,
    ) -> Self {
        Self {
            store,
            provider,
            usage,
        }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.provider.as_ref()
    }

    /// Usage failures are logged and otherwise ignored.
    async fn record_usage(&self, usage: EmbeddingUsage) {
        let Some(sink) = &self.usage else {
            return;
        };
        if usage.total_tokens == 0 {
            return;
        }
        let record = UsageRecord::new(
            self.provider.provider_name(),
            self.provider.model(),
            usage.total_tokens,
        );
        if let Err(e) = sink.record(record).await {
            warn!(provider = self.provider.provider_name(), "Failed to record embedding usage: {e}");
        }
    }

    pub async fn embed_one(&self, record: &FileRecord) -> Result<()> {
        let doc = document_of(record);
        if !doc.has_content() {
            return Err(RegistryError::Validation(format!(
                "file {} has no content to embed",
                record.key
            )));
        }
        let (vector, usage) = self
            .provider
            .embed_one(&prepare_text(&doc), TaskType::RetrievalDocument)
            .await?;
        self.record_usage(usage).await;
        self.store
            .upsert_embedding(&record.id, &vector, &self.provider.model_tag())
            .await?;
        Ok(())
    }

    /// Embed records in provider-sized sub-batches and store each vector.
    /// Returns the number of vectors written.
    pub async fn embed_batch(&self, records: &[FileRecord]) -> Result<usize> {
        let records: Vec<&FileRecord> = records
            .iter()
            .filter(|record| document_of(record).has_content())
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = records
            .iter()
            .map(|record| prepare_text(&document_of(record)))
            .collect();
        let embedded = embed_in_batches(
            self.provider.as_ref(),
            &texts,
            TaskType::RetrievalDocument,
            self.provider.max_batch(),
        )
        .await?;
        self.record_usage(embedded.usage).await;

        let model = self.provider.model_tag();
        for (record, vector) in records.iter().zip(&embedded.vectors) {
            self.store.upsert_embedding(&record.id, vector, &model).await?;
        }
        Ok(records.len())
    }

    /// Embed up to `batch_size` records that have content but no vector.
    /// Call until it returns 0.
    pub async fn process_pending(&self, batch_size: Option<usize>) -> Result<usize> {
        let limit = batch_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PENDING_BATCH);
        let pending = self.store.files_missing_embeddings(limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let processed = self.embed_batch(&pending).await?;
        info!(processed, "Embedded pending files");
        Ok(processed)
    }

    /// Query-side vector for `text`.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let (vector, usage) = self
            .provider
            .embed_one(text, TaskType::RetrievalQuery)
            .await?;
        self.record_usage(usage).await;
        Ok(vector)
    }

    /// Nearest records to `query`, each with its distance.
    pub async fn search_similar(&self, query: &str, k: usize) -> Result<Vec<(FileRecord, f32)>> {
        let vector = self.embed_query(query).await?;
        let hits = self.store.vector_search(&vector, k).await?;
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_by_id(&hit.id).await {
                Ok(record) => out.push((record, hit.distance)),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }
}
