use crate::error::Result;
use crate::model::Activity;
use crate::model::DuplicateScan;
use crate::model::EmbeddingStats;
use crate::model::FieldUpdate;
use crate::model::FileDraft;
use crate::model::FileRecord;
use crate::model::HybridQuery;
use crate::model::ListCriteria;
use crate::model::Page;
use crate::model::ScoredRecord;
use crate::model::StoreStats;
use crate::model::Tag;
use crate::model::UpsertOutcome;
use crate::model::VectorHit;
use async_trait::async_trait;

/// Storage port shared by every backend.
///
/// Implementations own their consistency: single-record writes are atomic,
/// tag usage counters move inside the same write as the association, and
/// every upsert, removal, tag change and verification appends one activity
/// entry.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;

    /// Dimension every stored vector must have.
    fn embedding_dimension(&self) -> usize;

    /// Insert a new record or merge into the existing one for the same key.
    async fn upsert_record(&self, draft: &FileDraft) -> Result<UpsertOutcome>;

    async fn get_by_id(&self, id: &str) -> Result<FileRecord>;

    async fn get_by_key(&self, source: &str, path: &str) -> Result<FileRecord>;

    /// Soft delete: status becomes `deleted`, tags and vector are dropped.
    async fn remove_by_id(&self, id: &str) -> Result<FileRecord>;

    async fn remove_by_key(&self, source: &str, path: &str) -> Result<FileRecord> {
        let record = self.get_by_key(source, path).await?;
        self.remove_by_id(&record.id).await
    }

    /// Hard delete; associations and the vector go with the record.
    async fn purge_by_id(&self, id: &str) -> Result<FileRecord>;

    async fn update_fields(&self, id: &str, update: &FieldUpdate) -> Result<FileRecord>;

    async fn list_filtered(&self, criteria: &ListCriteria) -> Result<Page>;

    /// Attach tags; returns the names that were not attached before.
    async fn attach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>>;

    /// Detach tags; returns the names that were attached and are now gone.
    async fn detach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>>;

    async fn file_tags(&self, id: &str) -> Result<Vec<String>>;

    async fn list_tags(&self) -> Result<Vec<Tag>>;

    async fn get_or_create_tag(&self, name: &str) -> Result<Tag>;

    /// Active records with this content hash, oldest indexed first.
    async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>>;

    /// Active records whose non-empty hash is shared by at least one other
    /// record within the scan scope.
    async fn duplicate_candidates(&self, scan: &DuplicateScan) -> Result<Vec<FileRecord>>;

    /// Store or replace the vector for a record.
    async fn upsert_embedding(&self, id: &str, vector: &[f32], model: &str) -> Result<()>;

    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>>;

    /// Nearest active records, lowest distance first.
    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    /// Neighbours of an indexed record, excluding the record itself.
    async fn similar_to(&self, id: &str, k: usize) -> Result<Vec<VectorHit>> {
        let Some(vector) = self.embedding_of(id).await? else {
            return Ok(Vec::new());
        };
        let hits = self.vector_search(&vector, k + 1).await?;
        Ok(hits.into_iter().filter(|hit| hit.id != id).take(k).collect())
    }

    /// Whether `hybrid_search` is backed by a native combined ranking.
    fn supports_hybrid_search(&self) -> bool {
        false
    }

    /// Backend-native hybrid ranking. `None` means unsupported.
    async fn hybrid_search(&self, _query: &HybridQuery) -> Result<Option<Vec<ScoredRecord>>> {
        Ok(None)
    }

    /// Active, non-directory records with content and no vector, most
    /// recently modified first.
    async fn files_missing_embeddings(&self, limit: usize) -> Result<Vec<FileRecord>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn embedding_stats(&self) -> Result<EmbeddingStats>;

    async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>>;
}

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Required length of stored vectors.
    pub embedding_dimension: usize,
    /// `performed_by` value written to the activity log.
    pub actor: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            embedding_dimension: crate::vector::DEFAULT_EMBEDDING_DIM,
            actor: "llm".to_string(),
        }
    }
}
