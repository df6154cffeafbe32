//! Remote backend: a graph-object service reached over HTTP.
//!
//! Files are objects of type `file` keyed by `source:path`. Record fields
//! live in the object's property bag and tags are object labels, so tag
//! usage counts come from the service's label index. Routes used, relative
//! to `{base_url}/api/graph`:
//!
//! | Route | Use |
//! |---|---|
//! | `GET /objects` | lookup by key, property filters, paged listing |
//! | `POST /objects`, `GET/PATCH/DELETE /objects/{id}` | object CRUD |
//! | `PUT/GET/DELETE /objects/{id}/embedding` | stored vector |
//! | `GET /objects/{id}/similar` | neighbours of an object |
//! | `POST /search/fts`, `/search/vector`, `/search/hybrid` | ranking |
//! | `GET /tags` | labels with counts |
//! | `GET/POST /activity` | audit trail |
//!
//! Criteria the service cannot evaluate are applied client-side through
//! [`ListCriteria::matches`].

use crate::error::Result;
use crate::error::StoreError;
use crate::model::Activity;
use crate::model::ActivityAction;
use crate::model::DuplicateScan;
use crate::model::EmbeddingStats;
use crate::model::FieldUpdate;
use crate::model::FileDraft;
use crate::model::FileRecord;
use crate::model::FileStatus;
use crate::model::HybridQuery;
use crate::model::ListCriteria;
use crate::model::Page;
use crate::model::ScoredRecord;
use crate::model::SortDirection;
use crate::model::SortField;
use crate::model::StoreStats;
use crate::model::Tag;
use crate::model::UpsertOutcome;
use crate::model::VectorHit;
use crate::model::extension_of;
use crate::model::file_key;
use crate::model::non_empty;
use crate::store::MetadataStore;
use crate::store::StoreOptions;
use crate::vector;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use reqwest::RequestBuilder;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const OBJECT_TYPE: &str = "file";

#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    /// Service root, e.g. `https://graph.example.com`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// Objects requested per listing page.
    pub page_size: usize,
    /// Upper bound on objects scanned by client-side filtering.
    pub max_scan: usize,
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            page_size: 500,
            max_scan: 10_000,
        }
    }
}

/// `MetadataStore` over a remote graph-object service.
#[derive(Clone)]
pub struct GraphStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
    max_scan: usize,
    options: StoreOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphObject {
    id: String,
    #[serde(rename = "type", default)]
    object_type: Option<String>,
    key: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

/// Record fields as stored in the object property bag.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct FileProperties {
    source: Option<String>,
    path: Option<String>,
    filename: Option<String>,
    extension: Option<String>,
    size: Option<u64>,
    mime_type: Option<String>,
    is_directory: Option<bool>,
    source_file_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
    indexed_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    content_indexed_at: Option<DateTime<Utc>>,
    content_hash: Option<String>,
    partial_hash: Option<String>,
    content_text: Option<String>,
    content_preview: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    embedding_model: Option<String>,
    embedding_at: Option<DateTime<Utc>>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct CreateObject<'a> {
    #[serde(rename = "type")]
    object_type: &'a str,
    key: String,
    status: &'a str,
    properties: Value,
    labels: Vec<String>,
}

#[skip_serializing_none]
#[derive(Debug, Default, Serialize)]
struct UpdateObject {
    status: Option<String>,
    properties: Option<Value>,
    labels: Option<Vec<String>>,
    replace_labels: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    data: Vec<GraphObject>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    types: [&'a str; 1],
    labels: Option<&'a [String]>,
    status: Option<&'a str>,
    limit: usize,
    vector: Option<&'a [f32]>,
    lexical_weight: Option<f32>,
    vector_weight: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    object: GraphObject,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Serialize)]
struct VectorSearchRequest<'a> {
    vector: &'a [f32],
    types: [&'a str; 1],
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct Neighbour {
    object: GraphObject,
    distance: f32,
}

#[derive(Debug, Deserialize)]
struct NeighbourResponse {
    #[serde(default)]
    data: Vec<Neighbour>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingBody {
    vector: Vec<f32>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TagCount {
    name: String,
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    data: Vec<TagCount>,
}

#[derive(Debug, Serialize)]
struct NewActivity<'a> {
    file_id: Option<&'a str>,
    source: &'a str,
    path: &'a str,
    action: ActivityAction,
    details: Option<String>,
    performed_by: &'a str,
}

#[derive(Debug, Deserialize)]
struct ActivityList {
    #[serde(default)]
    data: Vec<Activity>,
}

impl GraphStore {
    pub fn new(config: GraphStoreConfig, options: StoreOptions) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            page_size: config.page_size.max(1),
            max_scan: config.max_scan.max(1),
            options,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/graph{route}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        target: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| StoreError::backend(operation, target, err))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(target.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::backend(
                operation,
                target,
                format!("{status} - {body}"),
            ));
        }
        resp.json()
            .await
            .map_err(|err| StoreError::backend(operation, target, err))
    }

    async fn send_empty(
        &self,
        operation: &'static str,
        target: &str,
        request: RequestBuilder,
    ) -> Result<()> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| StoreError::backend(operation, target, err))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(target.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::backend(
                operation,
                target,
                format!("{status} - {body}"),
            ));
        }
        Ok(())
    }

    async fn object(&self, id: &str) -> Result<GraphObject> {
        let request = self.http.get(self.url(&format!("/objects/{id}")));
        self.send("get", id, request).await
    }

    async fn object_by_key(&self, key: &str) -> Result<Option<GraphObject>> {
        let request = self
            .http
            .get(self.url("/objects"))
            .query(&[("type", OBJECT_TYPE), ("key", key), ("limit", "1")]);
        let list: ObjectList = self.send("get", key, request).await?;
        Ok(list.data.into_iter().next())
    }

    async fn patch(
        &self,
        operation: &'static str,
        id: &str,
        body: &UpdateObject,
    ) -> Result<GraphObject> {
        let request = self
            .http
            .patch(self.url(&format!("/objects/{id}")))
            .json(body);
        self.send(operation, id, request).await
    }

    /// Page through every object matching the pushed-down filters.
    async fn scan(
        &self,
        labels: &[String],
        status: Option<FileStatus>,
        property: Option<(&str, &str)>,
    ) -> Result<Vec<GraphObject>> {
        let mut objects = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query: Vec<(String, String)> = vec![
                ("type".to_string(), OBJECT_TYPE.to_string()),
                ("limit".to_string(), self.page_size.to_string()),
            ];
            if !labels.is_empty() {
                query.push(("labels".to_string(), labels.join(",")));
            }
            if let Some(status) = status {
                query.push(("status".to_string(), status.to_string()));
            }
            if let Some((name, value)) = property {
                query.push((format!("property.{name}"), value.to_string()));
            }
            if let Some(cursor) = &cursor {
                query.push(("cursor".to_string(), cursor.clone()));
            }
            let request = self.http.get(self.url("/objects")).query(&query);
            let page: ObjectList = self.send("list", "objects", request).await?;
            objects.extend(page.data);
            match page.next_cursor {
                Some(next) if !next.is_empty() && objects.len() < self.max_scan => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        objects.truncate(self.max_scan);
        Ok(objects)
    }

    async fn log_activity(
        &self,
        record: &FileRecord,
        file_id: Option<&str>,
        action: ActivityAction,
        details: Option<String>,
    ) -> Result<()> {
        let body = NewActivity {
            file_id,
            source: &record.source,
            path: &record.path,
            action,
            details,
            performed_by: &self.options.actor,
        };
        let request = self.http.post(self.url("/activity")).json(&body);
        self.send_empty("log_activity", &record.key, request).await
    }

    async fn active_duplicates(&self, record: &FileRecord) -> Result<bool> {
        let same = self.find_by_hash(&record.content_hash).await?;
        Ok(same.iter().any(|other| other.id != record.id))
    }
}

fn into_record(object: GraphObject) -> Result<FileRecord> {
    let props: FileProperties = serde_json::from_value(Value::Object(object.properties))?;
    let (key_source, key_path) = object
        .key
        .split_once(':')
        .map(|(s, p)| (s.to_string(), p.to_string()))
        .unwrap_or_default();
    let source = props.source.unwrap_or(key_source);
    let path = props.path.unwrap_or(key_path);
    let status = if object.deleted_at.is_some() {
        FileStatus::Deleted
    } else {
        object
            .status
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default()
    };
    let filename = props
        .filename
        .unwrap_or_else(|| crate::model::filename_from_path(&path));
    Ok(FileRecord {
        id: object.id,
        key: file_key(&source, &path),
        source,
        path,
        filename,
        extension: props.extension,
        size: props.size.unwrap_or_default(),
        mime_type: props.mime_type,
        is_directory: props.is_directory.unwrap_or_default(),
        source_file_id: props.source_file_id,
        created_at: props.created_at,
        modified_at: props.modified_at,
        indexed_at: props
            .indexed_at
            .or(object.created_at)
            .unwrap_or_else(Utc::now),
        verified_at: props.verified_at,
        content_indexed_at: props.content_indexed_at,
        content_hash: props.content_hash.unwrap_or_default(),
        partial_hash: props.partial_hash,
        content_text: props.content_text,
        content_preview: props.content_preview,
        category: props.category,
        subcategory: props.subcategory,
        embedding_model: props.embedding_model,
        embedding_at: props.embedding_at,
        status,
    })
}

fn with_labels(object: GraphObject) -> Result<(FileRecord, Vec<String>)> {
    let mut labels = object.labels.clone();
    labels.sort();
    Ok((into_record(object)?, labels))
}

fn owned(value: Option<&str>) -> Option<String> {
    non_empty(value).map(str::to_string)
}

/// Properties carried by a draft; empty strings are dropped so merges on
/// the service never overwrite known values with blanks.
fn draft_properties(draft: &FileDraft) -> FileProperties {
    let filename = owned(draft.filename.as_deref());
    FileProperties {
        source: Some(draft.source.clone()),
        path: Some(draft.path.clone()),
        extension: filename.as_deref().and_then(extension_of),
        filename,
        size: draft.size,
        mime_type: owned(draft.mime_type.as_deref()),
        is_directory: draft.is_directory,
        source_file_id: owned(draft.source_file_id.as_deref()),
        created_at: draft.created_at,
        modified_at: draft.modified_at,
        content_hash: owned(Some(&draft.content_hash)),
        partial_hash: owned(draft.partial_hash.as_deref()),
        content_text: owned(draft.content_text.as_deref()),
        content_preview: owned(draft.content_preview.as_deref()),
        category: owned(draft.category.as_deref()),
        subcategory: owned(draft.subcategory.as_deref()),
        ..Default::default()
    }
}

fn update_properties(update: &FieldUpdate) -> FileProperties {
    FileProperties {
        verified_at: update.verified_at,
        size: update.size,
        modified_at: update.modified_at,
        mime_type: owned(update.mime_type.as_deref()),
        content_hash: owned(update.content_hash.as_deref()),
        partial_hash: owned(update.partial_hash.as_deref()),
        content_text: owned(update.content_text.as_deref()),
        content_preview: owned(update.content_preview.as_deref()),
        category: owned(update.category.as_deref()),
        subcategory: owned(update.subcategory.as_deref()),
        content_indexed_at: update.touches_content().then(Utc::now),
        ..Default::default()
    }
}

fn compare(a: &FileRecord, b: &FileRecord, order: SortField) -> Ordering {
    match order {
        SortField::Size => a.size.cmp(&b.size),
        SortField::Name => a.filename.to_lowercase().cmp(&b.filename.to_lowercase()),
        SortField::Indexed => a.indexed_at.cmp(&b.indexed_at),
        SortField::Modified | SortField::Relevance => a.modified_at.cmp(&b.modified_at),
    }
}

fn sort_items(items: &mut [ScoredRecord], criteria: &ListCriteria, ranked: bool) {
    if ranked && criteria.order == SortField::Relevance {
        if criteria.direction == SortDirection::Asc {
            items.reverse();
        }
        return;
    }
    items.sort_by(|a, b| {
        let ordering = compare(&a.record, &b.record, criteria.order);
        match criteria.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl MetadataStore for GraphStore {
    fn backend_name(&self) -> &'static str {
        "graph"
    }

    fn embedding_dimension(&self) -> usize {
        self.options.embedding_dimension
    }

    async fn upsert_record(&self, draft: &FileDraft) -> Result<UpsertOutcome> {
        let key = draft.key();
        let now = Utc::now();
        let mut props = draft_properties(draft);
        if non_empty(draft.content_text.as_deref()).is_some() {
            props.content_indexed_at = Some(now);
        }

        let outcome = match self.object_by_key(&key).await? {
            Some(existing) => {
                props.verified_at = Some(now);
                let body = UpdateObject {
                    status: Some(FileStatus::Active.to_string()),
                    properties: Some(serde_json::to_value(&props)?),
                    ..Default::default()
                };
                let object = self.patch("upsert", &existing.id, &body).await?;
                let record = into_record(object)?;
                self.log_activity(&record, Some(&record.id), ActivityAction::Updated, None)
                    .await?;
                UpsertOutcome {
                    id: record.id,
                    is_new: false,
                }
            }
            None => {
                if draft.content_hash.trim().is_empty() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "content_hash is required for {key}"
                    )));
                }
                let filename = draft.resolved_filename();
                props.extension = extension_of(&filename);
                props.filename = Some(filename);
                props.indexed_at = Some(now);
                let body = CreateObject {
                    object_type: OBJECT_TYPE,
                    key: key.clone(),
                    status: FileStatus::Active.as_str(),
                    properties: serde_json::to_value(&props)?,
                    labels: Vec::new(),
                };
                let request = self.http.post(self.url("/objects")).json(&body);
                let object: GraphObject = self.send("upsert", &key, request).await?;
                let record = into_record(object)?;
                self.log_activity(&record, Some(&record.id), ActivityAction::Registered, None)
                    .await?;
                UpsertOutcome {
                    id: record.id,
                    is_new: true,
                }
            }
        };
        debug!(id = %outcome.id, is_new = outcome.is_new, "Upserted graph object");
        Ok(outcome)
    }

    async fn get_by_id(&self, id: &str) -> Result<FileRecord> {
        into_record(self.object(id).await?)
    }

    async fn get_by_key(&self, source: &str, path: &str) -> Result<FileRecord> {
        let key = file_key(source, path);
        match self.object_by_key(&key).await? {
            Some(object) => into_record(object),
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn remove_by_id(&self, id: &str) -> Result<FileRecord> {
        self.object(id).await?;
        let body = UpdateObject {
            status: Some(FileStatus::Deleted.to_string()),
            labels: Some(Vec::new()),
            replace_labels: Some(true),
            properties: Some(serde_json::json!({ "embedding_model": null, "embedding_at": null })),
        };
        let object = self.patch("remove", id, &body).await?;
        let request = self.http.delete(self.url(&format!("/objects/{id}/embedding")));
        match self.send_empty("remove", id, request).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        let record = into_record(object)?;
        self.log_activity(&record, Some(id), ActivityAction::Removed, None)
            .await?;
        Ok(record)
    }

    async fn purge_by_id(&self, id: &str) -> Result<FileRecord> {
        let record = into_record(self.object(id).await?)?;
        let request = self
            .http
            .delete(self.url(&format!("/objects/{id}")))
            .query(&[("hard", "true")]);
        self.send_empty("purge", id, request).await?;
        self.log_activity(&record, None, ActivityAction::Purged, Some(format!("id={id}")))
            .await?;
        Ok(record)
    }

    async fn update_fields(&self, id: &str, update: &FieldUpdate) -> Result<FileRecord> {
        if update.is_empty() {
            return self.get_by_id(id).await;
        }
        let body = UpdateObject {
            status: update.status.map(|status| status.to_string()),
            properties: Some(serde_json::to_value(update_properties(update))?),
            ..Default::default()
        };
        let record = into_record(self.patch("update", id, &body).await?)?;
        let action = if update.verified_at.is_some() {
            ActivityAction::Verified
        } else {
            ActivityAction::Updated
        };
        self.log_activity(&record, Some(id), action, None).await?;
        Ok(record)
    }

    async fn list_filtered(&self, criteria: &ListCriteria) -> Result<Page> {
        let statuses = criteria.effective_statuses();
        let pushed_status = match statuses.as_slice() {
            [single] => Some(*single),
            _ => None,
        };

        let (candidates, ranked) = match criteria.text_query() {
            Some(text) => {
                let status = pushed_status.map(FileStatus::as_str);
                let body = SearchRequest {
                    query: text,
                    types: [OBJECT_TYPE],
                    labels: (!criteria.tags.is_empty()).then_some(criteria.tags.as_slice()),
                    status,
                    limit: self.max_scan,
                    vector: None,
                    lexical_weight: None,
                    vector_weight: None,
                };
                let request = self.http.post(self.url("/search/fts")).json(&body);
                let response: SearchResponse = self.send("list", "search/fts", request).await?;
                let hits: Vec<(GraphObject, Option<f32>)> = response
                    .data
                    .into_iter()
                    .map(|hit| (hit.object, Some(hit.score)))
                    .collect();
                (hits, true)
            }
            None => {
                let objects = self.scan(&criteria.tags, pushed_status, None).await?;
                (objects.into_iter().map(|o| (o, None)).collect(), false)
            }
        };

        let mut items = Vec::new();
        for (object, score) in candidates {
            let (record, labels) = with_labels(object)?;
            if !criteria.matches(&record, &labels) {
                continue;
            }
            if let Some(wanted) = criteria.has_duplicates
                && self.active_duplicates(&record).await? != wanted
            {
                continue;
            }
            items.push(ScoredRecord { record, score });
        }
        sort_items(&mut items, criteria, ranked);

        let total = items.len() as u64;
        let offset = match criteria.cursor.as_deref().filter(|c| !c.is_empty()) {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| StoreError::Validation(format!("invalid cursor: {cursor}")))?,
            None => criteria.offset,
        };
        let page: Vec<ScoredRecord> = items
            .into_iter()
            .skip(offset)
            .take(criteria.effective_limit())
            .collect();
        let consumed = (offset + page.len()) as u64;
        Ok(Page {
            total,
            next_cursor: (consumed < total).then(|| consumed.to_string()),
            items: page,
        })
    }

    async fn attach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>> {
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(StoreError::Validation("tag names must not be empty".to_string()));
        }
        let object = self.object(id).await?;
        let mut added: Vec<String> = Vec::new();
        for name in names {
            if !object.labels.contains(name) && !added.contains(name) {
                added.push(name.clone());
            }
        }
        if added.is_empty() {
            return Ok(added);
        }
        let body = UpdateObject {
            labels: Some(added.clone()),
            ..Default::default()
        };
        let record = into_record(self.patch("attach_tags", id, &body).await?)?;
        self.log_activity(&record, Some(id), ActivityAction::Tagged, Some(added.join(",")))
            .await?;
        Ok(added)
    }

    async fn detach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>> {
        let object = self.object(id).await?;
        let (remaining, removed): (Vec<String>, Vec<String>) = object
            .labels
            .iter()
            .cloned()
            .partition(|label| !names.contains(label));
        if removed.is_empty() {
            return Ok(removed);
        }
        let body = UpdateObject {
            labels: Some(remaining),
            replace_labels: Some(true),
            ..Default::default()
        };
        let record = into_record(self.patch("detach_tags", id, &body).await?)?;
        self.log_activity(
            &record,
            Some(id),
            ActivityAction::Untagged,
            Some(removed.join(",")),
        )
        .await?;
        Ok(removed)
    }

    async fn file_tags(&self, id: &str) -> Result<Vec<String>> {
        let (_, labels) = with_labels(self.object(id).await?)?;
        Ok(labels)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let request = self
            .http
            .get(self.url("/tags"))
            .query(&[("type", OBJECT_TYPE)]);
        let list: TagList = self.send("list_tags", "tags", request).await?;
        let mut tags: Vec<Tag> = list
            .data
            .into_iter()
            .map(|tag| Tag {
                id: tag.name.clone(),
                name: tag.name,
                usage_count: tag.count,
                created_at: None,
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation("tag names must not be empty".to_string()));
        }
        // Labels exist implicitly once attached; an unused tag has count 0.
        let existing = self
            .list_tags()
            .await?
            .into_iter()
            .find(|tag| tag.name == name);
        Ok(existing.unwrap_or_else(|| Tag {
            id: name.to_string(),
            name: name.to_string(),
            usage_count: 0,
            created_at: None,
        }))
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>> {
        if content_hash.is_empty() {
            return Ok(Vec::new());
        }
        let objects = self
            .scan(&[], Some(FileStatus::Active), Some(("content_hash", content_hash)))
            .await?;
        let mut records = objects
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>>>()?;
        records.retain(|r| r.content_hash == content_hash && r.status == FileStatus::Active);
        records.sort_by(|a, b| a.indexed_at.cmp(&b.indexed_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn duplicate_candidates(&self, scan: &DuplicateScan) -> Result<Vec<FileRecord>> {
        let objects = self.scan(&[], Some(FileStatus::Active), None).await?;
        let mut records: Vec<FileRecord> = objects
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| {
                r.status == FileStatus::Active
                    && !r.content_hash.is_empty()
                    && (scan.sources.is_empty() || scan.sources.contains(&r.source))
                    && scan.min_size.is_none_or(|min| r.size >= min)
            })
            .collect();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &records {
            *counts.entry(record.content_hash.clone()).or_default() += 1;
        }
        records.retain(|r| counts.get(&r.content_hash).copied().unwrap_or_default() > 1);
        records.sort_by(|a, b| {
            a.content_hash
                .cmp(&b.content_hash)
                .then_with(|| a.indexed_at.cmp(&b.indexed_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn upsert_embedding(&self, id: &str, embedding: &[f32], model: &str) -> Result<()> {
        vector::check_dimension(embedding, self.options.embedding_dimension)?;
        let body = EmbeddingBody {
            vector: embedding.to_vec(),
            model: model.to_string(),
        };
        let request = self
            .http
            .put(self.url(&format!("/objects/{id}/embedding")))
            .json(&body);
        self.send_empty("upsert_embedding", id, request).await?;
        let props = FileProperties {
            embedding_model: Some(model.to_string()),
            embedding_at: Some(Utc::now()),
            ..Default::default()
        };
        let update = UpdateObject {
            properties: Some(serde_json::to_value(props)?),
            ..Default::default()
        };
        self.patch("upsert_embedding", id, &update).await?;
        Ok(())
    }

    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let request = self.http.get(self.url(&format!("/objects/{id}/embedding")));
        match self
            .send::<EmbeddingBody>("embedding_of", id, request)
            .await
        {
            Ok(body) => Ok(Some(body.vector)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        vector::check_dimension(embedding, self.options.embedding_dimension)?;
        let body = VectorSearchRequest {
            vector: embedding,
            types: [OBJECT_TYPE],
            limit: k,
        };
        let request = self.http.post(self.url("/search/vector")).json(&body);
        let response: NeighbourResponse = self.send("vector_search", "search/vector", request).await?;
        Ok(neighbour_hits(response))
    }

    async fn similar_to(&self, id: &str, k: usize) -> Result<Vec<VectorHit>> {
        let request = self
            .http
            .get(self.url(&format!("/objects/{id}/similar")))
            .query(&[("limit", k.to_string())]);
        let response: NeighbourResponse = self.send("similar", id, request).await?;
        let mut hits = neighbour_hits(response);
        hits.retain(|hit| hit.id != id);
        hits.truncate(k);
        Ok(hits)
    }

    fn supports_hybrid_search(&self) -> bool {
        true
    }

    async fn hybrid_search(&self, query: &HybridQuery) -> Result<Option<Vec<ScoredRecord>>> {
        let body = SearchRequest {
            query: &query.text,
            types: [OBJECT_TYPE],
            labels: (!query.tags.is_empty()).then_some(query.tags.as_slice()),
            status: Some(FileStatus::Active.as_str()),
            limit: query.limit,
            vector: query.embedding.as_deref(),
            lexical_weight: Some(query.lexical_weight),
            vector_weight: Some(query.vector_weight),
        };
        let request = self.http.post(self.url("/search/hybrid")).json(&body);
        let response: SearchResponse = self.send("hybrid_search", "search/hybrid", request).await?;
        let records = response
            .data
            .into_iter()
            .map(|hit| {
                Ok(ScoredRecord {
                    record: into_record(hit.object)?,
                    score: Some(hit.score),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(records))
    }

    async fn files_missing_embeddings(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let objects = self.scan(&[], Some(FileStatus::Active), None).await?;
        let mut records: Vec<FileRecord> = objects
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|r| {
                r.status == FileStatus::Active
                    && !r.is_directory
                    && r.has_content()
                    && r.embedding_model.is_none()
            })
            .collect();
        records.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for object in self.scan(&[], None, None).await? {
            stats.add(&into_record(object)?);
        }
        Ok(stats)
    }

    async fn embedding_stats(&self) -> Result<EmbeddingStats> {
        let mut stats = EmbeddingStats::default();
        let mut by_model: BTreeMap<String, u64> = BTreeMap::new();
        for object in self.scan(&[], Some(FileStatus::Active), None).await? {
            let record = into_record(object)?;
            if let Some(model) = &record.embedding_model {
                stats.total_embeddings += 1;
                *by_model.entry(model.clone()).or_default() += 1;
            }
            if !record.is_directory && record.has_content() {
                stats.files_with_content += 1;
                if record.embedding_model.is_none() {
                    stats.files_needing_embeddings += 1;
                }
            }
        }
        stats.by_model = by_model;
        Ok(stats)
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
        let request = self
            .http
            .get(self.url("/activity"))
            .query(&[("limit", limit.to_string())]);
        let list: ActivityList = self.send("recent_activity", "activity", request).await?;
        Ok(list.data)
    }
}

fn neighbour_hits(response: NeighbourResponse) -> Vec<VectorHit> {
    let mut hits: Vec<VectorHit> = response
        .data
        .into_iter()
        .filter(|n| n.object.deleted_at.is_none())
        .map(|n| VectorHit {
            id: n.object.id,
            distance: n.distance,
        })
        .collect();
    hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    hits
}
