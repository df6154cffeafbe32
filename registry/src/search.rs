use crate::config::SearchConfig;
use crate::error::RegistryError;
use crate::error::Result;
use crate::fusion::distance_to_score;
use crate::fusion::weighted_fusion;
use crate::pipeline::EmbeddingPipeline;
use file_registry_store::FileRecord;
use file_registry_store::HybridQuery;
use file_registry_store::ListCriteria;
use file_registry_store::MetadataStore;
use file_registry_store::ScoredRecord;
use file_registry_store::SortField;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A result row: the record, its tags and duplicate information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: FileRecord,
    pub tags: Vec<String>,
    pub is_duplicate: bool,
    /// Other active records with the same content hash.
    pub duplicate_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticQuery {
    pub query: String,
    pub limit: Option<usize>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub any_tags: Vec<String>,
    pub lexical_weight: Option<f32>,
    pub vector_weight: Option<f32>,
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn MetadataStore>,
    pipeline: Option<Arc<EmbeddingPipeline>>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        pipeline: Option<Arc<EmbeddingPipeline>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            config,
        }
    }

    /// Text-index search or plain filtered listing when no query is given.
    pub async fn lexical(&self, criteria: &ListCriteria) -> Result<SearchPage> {
        let page = self.store.list_filtered(criteria).await?;
        Ok(SearchPage {
            results: self.enrich(page.items).await?,
            total: page.total,
            next_cursor: page.next_cursor,
        })
    }

    /// Semantic or hybrid ranking, post-filtered and enriched.
    pub async fn semantic(&self, query: &SemanticQuery) -> Result<Vec<SearchHit>> {
        let text = query.query.trim();
        if text.is_empty() {
            return Err(RegistryError::Validation("query is required".to_string()));
        }
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.semantic_limit);
        let lexical_weight = query.lexical_weight.unwrap_or(self.config.lexical_weight);
        let vector_weight = query.vector_weight.unwrap_or(self.config.vector_weight);
        if lexical_weight < 0.0 || vector_weight < 0.0 {
            return Err(RegistryError::Validation(
                "search weights must not be negative".to_string(),
            ));
        }
        let pool = limit.max(self.config.candidate_pool);

        let ranked = match (&self.pipeline, self.store.supports_hybrid_search()) {
            (Some(pipeline), _) if lexical_weight <= 0.0 => {
                debug!(pool, "Pure vector search");
                pipeline
                    .search_similar(text, pool)
                    .await?
                    .into_iter()
                    .map(|(record, distance)| ScoredRecord {
                        record,
                        score: Some(distance_to_score(distance)),
                    })
                    .collect()
            }
            (pipeline, true) => {
                let embedding = match pipeline {
                    Some(pipeline) => Some(pipeline.embed_query(text).await?),
                    None => None,
                };
                let hybrid = HybridQuery {
                    text: text.to_string(),
                    embedding,
                    lexical_weight,
                    vector_weight,
                    tags: query.tags.clone(),
                    limit: pool,
                };
                self.store.hybrid_search(&hybrid).await?.unwrap_or_default()
            }
            (None, false) => return Err(RegistryError::EmbeddingUnavailable),
            (Some(pipeline), false) => {
                let criteria = ListCriteria {
                    query: Some(text.to_string()),
                    sources: query.sources.clone(),
                    categories: query.categories.clone(),
                    tags: query.tags.clone(),
                    any_tags: query.any_tags.clone(),
                    limit: pool,
                    order: SortField::Relevance,
                    ..Default::default()
                };
                let lexical = self.store.list_filtered(&criteria).await?.items;
                let vector = pipeline.search_similar(text, pool).await?;
                weighted_fusion(lexical, vector, lexical_weight, vector_weight, pool)
            }
        };

        let filter = ListCriteria {
            sources: query.sources.clone(),
            categories: query.categories.clone(),
            tags: query.tags.clone(),
            any_tags: query.any_tags.clone(),
            ..Default::default()
        };
        let mut hits = self.enrich(ranked).await?;
        hits.retain(|hit| filter.matches(&hit.record, &hit.tags));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Attach tags and duplicate counts to ranked records.
    pub async fn enrich(&self, items: Vec<ScoredRecord>) -> Result<Vec<SearchHit>> {
        let mut same_hash: HashMap<String, Vec<String>> = HashMap::new();
        let mut hits = Vec::with_capacity(items.len());
        for item in items {
            let record = item.record;
            let tags = self.store.file_tags(&record.id).await?;
            if !same_hash.contains_key(&record.content_hash) {
                let ids = self
                    .store
                    .find_by_hash(&record.content_hash)
                    .await?
                    .into_iter()
                    .map(|r| r.id)
                    .collect();
                same_hash.insert(record.content_hash.clone(), ids);
            }
            let duplicate_count = same_hash
                .get(&record.content_hash)
                .map(|ids| ids.iter().filter(|id| **id != record.id).count())
                .unwrap_or_default();
            hits.push(SearchHit {
                record,
                tags,
                is_duplicate: duplicate_count > 0,
                duplicate_count,
                score: item.score,
            });
        }
        Ok(hits)
    }
}
