use crate::batch::BatchExecutor;
use crate::batch::BatchItem;
use crate::batch::BatchReport;
use crate::config::RegistryConfig;
use crate::crawler::CrawlReport;
use crate::crawler::CrawlRequest;
use crate::crawler::Crawler;
use crate::duplicates::DuplicateDetector;
use crate::error::RegistryError;
use crate::error::Result;
use crate::ops::ActivityResponse;
use crate::ops::BatchGetRequest;
use crate::ops::BatchRegisterRequest;
use crate::ops::BatchRemoveRequest;
use crate::ops::BatchTagRequest;
use crate::ops::DEFAULT_ACTIVITY_LIMIT;
use crate::ops::DEFAULT_RECENT_LIMIT;
use crate::ops::DEFAULT_SIMILAR_LIMIT;
use crate::ops::DuplicatesRequest;
use crate::ops::DuplicatesResponse;
use crate::ops::EmbedPendingRequest;
use crate::ops::EmbedPendingResponse;
use crate::ops::FileRef;
use crate::ops::FileWithTags;
use crate::ops::LimitRequest;
use crate::ops::Locator;
use crate::ops::RecentResponse;
use crate::ops::RegisterRequest;
use crate::ops::RegisterResponse;
use crate::ops::SearchRequest;
use crate::ops::SemanticSearchRequest;
use crate::ops::SemanticSearchResponse;
use crate::ops::SimilarFile;
use crate::ops::SimilarRequest;
use crate::ops::SimilarResponse;
use crate::ops::StatsResponse;
use crate::ops::StatusResponse;
use crate::ops::TagRequest;
use crate::ops::TaggedResponse;
use crate::ops::TagsResponse;
use crate::ops::UntaggedResponse;
use crate::ops::VerifyResponse;
use crate::ops::parse_args;
use crate::ops::raw_item_key;
use crate::ops::registered_item;
use crate::pipeline::EmbeddingPipeline;
use crate::search::SearchEngine;
use crate::search::SearchPage;
use crate::tags::TagManager;
use crate::tags::normalize_tags;
use chrono::Utc;
use file_registry_embeddings::EmbeddingProvider;
use file_registry_embeddings::UsageSink;
use file_registry_store::FieldUpdate;
use file_registry_store::FileRecord;
use file_registry_store::ListCriteria;
use file_registry_store::MetadataStore;
use file_registry_store::SortDirection;
use file_registry_store::SortField;
use file_registry_store::file_key;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

/// Every name accepted by [`Registry::call`].
pub const OPERATIONS: &[&str] = &[
    "register",
    "get",
    "search",
    "semantic_search",
    "tag",
    "untag",
    "tags",
    "duplicates",
    "remove",
    "purge",
    "verify",
    "stats",
    "recent",
    "activity",
    "similar",
    "embed_pending",
    "batch_register",
    "batch_get",
    "batch_tag",
    "batch_untag",
    "batch_remove",
    "crawl",
];

fn require_items(len: usize, cap: usize, field: &str) -> Result<()> {
    if len == 0 {
        return Err(RegistryError::Validation(format!("{field} array is required")));
    }
    if len > cap {
        return Err(RegistryError::Validation(format!(
            "maximum {cap} items per batch call, got {len}"
        )));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Entry point wiring the store, embedding pipeline and engines together.
///
/// Cloning is cheap; clones share the store, provider and cancellation
/// token.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn MetadataStore>,
    config: Arc<RegistryConfig>,
    tags: TagManager,
    duplicates: DuplicateDetector,
    pipeline: Option<Arc<EmbeddingPipeline>>,
    search: SearchEngine,
    crawler: Crawler,
    cancel: CancellationToken,
}

impl Registry {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        usage: Option<Arc<dyn UsageSink>>,
        config: RegistryConfig,
    ) -> Self {
        let pipeline = provider
            .map(|provider| Arc::new(EmbeddingPipeline::new(store.clone(), provider, usage)));
        Self {
            tags: TagManager::new(store.clone()),
            duplicates: DuplicateDetector::new(store.clone()),
            search: SearchEngine::new(store.clone(), pipeline.clone(), config.search.clone()),
            crawler: Crawler::new(store.clone(), config.crawl.clone()),
            pipeline,
            store,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// Open the configured store and, when an `[embedding]` section exists,
    /// the HTTP embedding client.
    pub fn from_config(config: RegistryConfig, usage: Option<Arc<dyn UsageSink>>) -> Result<Self> {
        config.validate().map_err(RegistryError::Config)?;
        let store = config.store.connect()?;
        let provider: Option<Arc<dyn EmbeddingProvider>> = match &config.embedding {
            Some(settings) => Some(Arc::new(settings.client()?)),
            None => None,
        };
        info!(
            backend = store.backend_name(),
            embeddings = provider.is_some(),
            "File registry ready"
        );
        Ok(Self::new(store, provider, usage, config))
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn has_embeddings(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop launching batch items; running items finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn operation_names() -> &'static [&'static str] {
        OPERATIONS
    }

    fn executor(&self) -> BatchExecutor {
        BatchExecutor::new(self.config.batch.workers, self.cancel.child_token())
    }

    fn pipeline(&self) -> Result<&Arc<EmbeddingPipeline>> {
        self.pipeline
            .as_ref()
            .ok_or(RegistryError::EmbeddingUnavailable)
    }

    /// Look up the record a [`FileRef`] names, whatever its status.
    pub async fn resolve(&self, file: &FileRef) -> Result<FileRecord> {
        let record = match file.locator()? {
            Locator::Id(id) => self.store.get_by_id(id).await?,
            Locator::Key { source, path } => self.store.get_by_key(source, path).await?,
        };
        Ok(record)
    }

    /// Run a named operation with a JSON argument bag.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        debug!(operation = name, "Dispatching operation");
        match name {
            "register" => to_json(self.register(parse_args(args)?).await?),
            "get" => to_json(self.get(&parse_args(args)?).await?),
            "search" => to_json(self.search(parse_args(args)?).await?),
            "semantic_search" => to_json(self.semantic_search(parse_args(args)?).await?),
            "tag" => to_json(self.tag(parse_args(args)?).await?),
            "untag" => to_json(self.untag(parse_args(args)?).await?),
            "tags" => to_json(self.list_tags().await?),
            "duplicates" => to_json(self.duplicates(parse_args(args)?).await?),
            "remove" => to_json(self.remove(&parse_args(args)?).await?),
            "purge" => to_json(self.purge(&parse_args(args)?).await?),
            "verify" => to_json(self.verify(&parse_args(args)?).await?),
            "stats" => to_json(self.stats().await?),
            "recent" => to_json(self.recent(parse_args(args)?).await?),
            "activity" => to_json(self.activity(parse_args(args)?).await?),
            "similar" => to_json(self.similar(parse_args(args)?).await?),
            "embed_pending" => to_json(self.embed_pending(parse_args(args)?).await?),
            "batch_register" => to_json(self.batch_register(parse_args(args)?).await?),
            "batch_get" => to_json(self.batch_get(parse_args(args)?).await?),
            "batch_tag" => to_json(self.batch_tag(parse_args(args)?).await?),
            "batch_untag" => to_json(self.batch_untag(parse_args(args)?).await?),
            "batch_remove" => to_json(self.batch_remove(parse_args(args)?).await?),
            "crawl" => to_json(self.crawl(parse_args(args)?).await?),
            other => Err(RegistryError::UnknownOperation(other.to_string())),
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        let RegisterRequest { draft, tags } = request;
        draft.validate()?;
        let tags = normalize_tags(&tags)?;
        let outcome = self.store.upsert_record(&draft).await?;
        if !tags.is_empty() {
            self.tags.attach(&outcome.id, &tags).await?;
        }
        Ok(RegisterResponse {
            id: outcome.id,
            key: draft.key(),
            status: "registered".to_string(),
            is_new: outcome.is_new,
        })
    }

    pub async fn get(&self, file: &FileRef) -> Result<FileWithTags> {
        let record = self.resolve(file).await?;
        let tags = self.tags.tags_of(&record.id).await?;
        Ok(FileWithTags { record, tags })
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchPage> {
        let criteria = request.into_criteria(self.config.search.default_limit);
        self.search.lexical(&criteria).await
    }

    pub async fn semantic_search(
        &self,
        request: SemanticSearchRequest,
    ) -> Result<SemanticSearchResponse> {
        let results = self.search.semantic(&request.into()).await?;
        Ok(SemanticSearchResponse {
            total: results.len(),
            results,
        })
    }

    pub async fn tag(&self, request: TagRequest) -> Result<TaggedResponse> {
        if request.tags.is_empty() {
            return Err(RegistryError::Validation("tags array is required".to_string()));
        }
        let record = self.resolve(&request.file).await?;
        let added = self.tags.attach(&record.id, &request.tags).await?;
        Ok(TaggedResponse {
            status: "tagged".to_string(),
            id: record.id,
            added,
        })
    }

    pub async fn untag(&self, request: TagRequest) -> Result<UntaggedResponse> {
        if request.tags.is_empty() {
            return Err(RegistryError::Validation("tags array is required".to_string()));
        }
        let record = self.resolve(&request.file).await?;
        let removed = self.tags.detach(&record.id, &request.tags).await?;
        Ok(UntaggedResponse {
            status: "untagged".to_string(),
            id: record.id,
            removed,
        })
    }

    pub async fn list_tags(&self) -> Result<TagsResponse> {
        let tags = self.tags.list().await?;
        Ok(TagsResponse {
            total: tags.len(),
            tags,
        })
    }

    pub async fn duplicates(&self, request: DuplicatesRequest) -> Result<DuplicatesResponse> {
        if let Some(hash) = request
            .content_hash
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        {
            let duplicates = self.duplicates.find_by_hash(hash).await?;
            return Ok(DuplicatesResponse::Single {
                content_hash: hash.to_string(),
                count: duplicates.len(),
                duplicates,
            });
        }
        let groups = self
            .duplicates
            .list_groups(request.min_size, &request.sources, request.limit)
            .await?;
        let summary = self.duplicates.summary(&request.sources).await?;
        Ok(DuplicatesResponse::Groups {
            total_groups: groups.len(),
            duplicate_groups: groups,
            summary,
        })
    }

    pub async fn remove(&self, file: &FileRef) -> Result<StatusResponse> {
        let record = self.resolve(file).await?;
        let removed = self.store.remove_by_id(&record.id).await?;
        info!(key = %removed.key, "Removed file");
        Ok(StatusResponse {
            status: "removed".to_string(),
            id: removed.id,
        })
    }

    pub async fn purge(&self, file: &FileRef) -> Result<StatusResponse> {
        let record = self.resolve(file).await?;
        let purged = self.store.purge_by_id(&record.id).await?;
        info!(key = %purged.key, "Purged file");
        Ok(StatusResponse {
            status: "purged".to_string(),
            id: purged.id,
        })
    }

    pub async fn verify(&self, file: &FileRef) -> Result<VerifyResponse> {
        let record = self.resolve(file).await?;
        let now = Utc::now();
        let updated = self
            .store
            .update_fields(&record.id, &FieldUpdate::verified(now))
            .await?;
        Ok(VerifyResponse {
            status: "verified".to_string(),
            verified_at: updated.verified_at.unwrap_or(now),
            id: updated.id,
        })
    }

    pub async fn stats(&self) -> Result<StatsResponse> {
        let files = self.store.stats().await?;
        let duplicates = self.duplicates.summary(&[]).await?;
        let embeddings = self.store.embedding_stats().await?;
        Ok(StatsResponse {
            files,
            duplicate_groups: duplicates.total_groups,
            duplicate_instances: duplicates.total_duplicates,
            wasted_bytes: duplicates.total_wasted,
            embeddings,
        })
    }

    /// Most recently indexed active records.
    pub async fn recent(&self, request: LimitRequest) -> Result<RecentResponse> {
        let criteria = ListCriteria {
            limit: request
                .limit
                .filter(|l| *l > 0)
                .unwrap_or(DEFAULT_RECENT_LIMIT),
            order: SortField::Indexed,
            direction: SortDirection::Desc,
            ..Default::default()
        };
        let files: Vec<FileRecord> = self
            .store
            .list_filtered(&criteria)
            .await?
            .items
            .into_iter()
            .map(|item| item.record)
            .collect();
        Ok(RecentResponse {
            total: files.len(),
            files,
        })
    }

    pub async fn activity(&self, request: LimitRequest) -> Result<ActivityResponse> {
        let limit = request
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT);
        let activity = self.store.recent_activity(limit).await?;
        Ok(ActivityResponse {
            total: activity.len(),
            activity,
        })
    }

    pub async fn similar(&self, request: SimilarRequest) -> Result<SimilarResponse> {
        let source = self.resolve(&request.file).await?;
        let limit = request
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_SIMILAR_LIMIT);
        let hits = self.store.similar_to(&source.id, limit).await?;
        let mut similar = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.store.get_by_id(&hit.id).await {
                Ok(record) => similar.push(SimilarFile {
                    record,
                    distance: hit.distance,
                }),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(SimilarResponse {
            source_id: source.id,
            total: similar.len(),
            similar,
        })
    }

    /// One pass of the back-fill; callers loop until `processed` is 0.
    pub async fn embed_pending(&self, request: EmbedPendingRequest) -> Result<EmbedPendingResponse> {
        let processed = self.pipeline()?.process_pending(request.batch_size).await?;
        Ok(EmbedPendingResponse { processed })
    }

    pub async fn batch_register(&self, request: BatchRegisterRequest) -> Result<BatchReport> {
        require_items(request.files.len(), self.config.batch.register_cap, "files")?;
        let registry = self.clone();
        let report = self
            .executor()
            .run("batch_register", request.files, move |index, raw| {
                let registry = registry.clone();
                async move {
                    let key = raw_item_key(&raw);
                    let outcome = match parse_args::<RegisterRequest>(raw) {
                        Ok(request) => registry.register(request).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(response) => registered_item(index, &response),
                        Err(e) => {
                            let item = BatchItem::failure(index, e.reason(), e.to_string());
                            match key {
                                Some(key) => item.with_key(key),
                                None => item,
                            }
                        }
                    }
                }
            })
            .await;
        Ok(report)
    }

    pub async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchReport> {
        let BatchGetRequest { ids, keys } = request;
        if ids.is_empty() && keys.is_empty() {
            return Err(RegistryError::Validation(
                "either 'ids' or 'keys' is required".to_string(),
            ));
        }
        require_items(ids.len() + keys.len(), self.config.batch.get_cap, "ids")?;
        let items: Vec<FileRef> = ids
            .into_iter()
            .map(FileRef::by_id)
            .chain(keys.into_iter().map(|k| FileRef::by_key(k.source, k.path)))
            .collect();

        let registry = self.clone();
        let report = self
            .executor()
            .run("batch_get", items, move |index, file| {
                let registry = registry.clone();
                async move {
                    let item = BatchItem::success(index, "found");
                    let item = match (&file.id, &file.source, &file.path) {
                        (Some(id), _, _) => item.with_id(id.clone()),
                        (None, Some(source), Some(path)) => item.with_key(file_key(source, path)),
                        _ => item,
                    };
                    let found = match registry.get(&file).await {
                        Ok(found) => found,
                        Err(e) => {
                            let failure = BatchItem::failure(index, e.reason(), e.to_string());
                            return BatchItem {
                                id: item.id,
                                key: item.key,
                                ..failure
                            };
                        }
                    };
                    match serde_json::to_value(&found) {
                        Ok(details) => item
                            .with_id(found.record.id.clone())
                            .with_key(found.record.key.clone())
                            .with_details(details),
                        Err(e) => BatchItem::failure(index, "backend_error", e.to_string()),
                    }
                }
            })
            .await;
        Ok(report)
    }

    pub async fn batch_tag(&self, request: BatchTagRequest) -> Result<BatchReport> {
        self.batch_tags("batch_tag", request, true).await
    }

    pub async fn batch_untag(&self, request: BatchTagRequest) -> Result<BatchReport> {
        self.batch_tags("batch_untag", request, false).await
    }

    async fn batch_tags(&self, label: &str, request: BatchTagRequest, attach: bool) -> Result<BatchReport> {
        require_items(request.ids.len(), self.config.batch.mutate_cap, "ids")?;
        if request.tags.is_empty() {
            return Err(RegistryError::Validation("tags array is required".to_string()));
        }
        let tags = Arc::new(normalize_tags(&request.tags)?);
        let manager = self.tags.clone();
        let report = self
            .executor()
            .run(label, request.ids, move |index, id| {
                let manager = manager.clone();
                let tags = tags.clone();
                async move {
                    let (status, field, outcome) = if attach {
                        ("tagged", "added", manager.attach(&id, &tags).await)
                    } else {
                        ("untagged", "removed", manager.detach(&id, &tags).await)
                    };
                    match outcome {
                        Ok(changed) => BatchItem::success(index, status)
                            .with_id(id)
                            .with_details(serde_json::json!({ field: changed })),
                        Err(e) => BatchItem::failure(index, e.reason(), e.to_string()).with_id(id),
                    }
                }
            })
            .await;
        Ok(report)
    }

    pub async fn batch_remove(&self, request: BatchRemoveRequest) -> Result<BatchReport> {
        require_items(request.ids.len(), self.config.batch.mutate_cap, "ids")?;
        let store = self.store.clone();
        let report = self
            .executor()
            .run("batch_remove", request.ids, move |index, id| {
                let store = store.clone();
                async move {
                    match store.remove_by_id(&id).await {
                        Ok(record) => BatchItem::success(index, "removed")
                            .with_id(record.id)
                            .with_key(record.key),
                        Err(e) => {
                            let e = RegistryError::from(e);
                            BatchItem::failure(index, e.reason(), e.to_string()).with_id(id)
                        }
                    }
                }
            })
            .await;
        Ok(report)
    }

    pub async fn crawl(&self, request: CrawlRequest) -> Result<CrawlReport> {
        self.crawler.crawl(&request, &self.executor()).await
    }
}
