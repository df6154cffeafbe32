//! Typed request and response bodies for the named operations.
//!
//! Argument bags arrive as JSON objects and are parsed exactly once into the
//! request structs below; everything past that boundary is typed.

use crate::batch::BatchItem;
use crate::duplicates::DuplicateGroup;
use crate::duplicates::DuplicateSummary;
use crate::error::RegistryError;
use crate::error::Result;
use crate::search::SearchHit;
use crate::search::SemanticQuery;
use chrono::DateTime;
use chrono::Utc;
use file_registry_store::Activity;
use file_registry_store::EmbeddingStats;
use file_registry_store::FileDraft;
use file_registry_store::FileRecord;
use file_registry_store::FileStatus;
use file_registry_store::ListCriteria;
use file_registry_store::SortDirection;
use file_registry_store::SortField;
use file_registry_store::StoreStats;
use file_registry_store::Tag;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_with::OneOrMany;
use serde_with::serde_as;

pub const DEFAULT_RECENT_LIMIT: usize = 20;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;
pub const DEFAULT_SIMILAR_LIMIT: usize = 10;

/// Parse an argument bag; `null` counts as an empty object.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    let args = match args {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    Ok(serde_json::from_value(args)?)
}

/// Names one record by id or by `(source, path)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRef {
    pub id: Option<String>,
    pub source: Option<String>,
    pub path: Option<String>,
}

/// Resolved form of a [`FileRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Id(&'a str),
    Key { source: &'a str, path: &'a str },
}

impl FileRef {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_key(source: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: None,
            source: Some(source.into()),
            path: Some(path.into()),
        }
    }

    pub fn locator(&self) -> Result<Locator<'_>> {
        fn present(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|v| !v.is_empty())
        }
        if let Some(id) = present(&self.id) {
            return Ok(Locator::Id(id));
        }
        match (present(&self.source), present(&self.path)) {
            (Some(source), Some(path)) => Ok(Locator::Key { source, path }),
            _ => Err(RegistryError::Validation(
                "either 'id' or both 'source' and 'path' are required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(flatten)]
    pub draft: FileDraft,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    pub key: String,
    pub status: String,
    pub is_new: bool,
}

/// A record together with its tag names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWithTags {
    #[serde(flatten)]
    pub record: FileRecord,
    pub tags: Vec<String>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
    pub path_pattern: Option<String>,
    pub filename_pattern: Option<String>,
    pub tags: Vec<String>,
    pub any_tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    /// A single status or a list of them.
    #[serde_as(as = "OneOrMany<_>")]
    pub status: Vec<FileStatus>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub has_duplicates: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub cursor: Option<String>,
    pub order: Option<SortField>,
    pub order_dir: Option<SortDirection>,
}

impl SearchRequest {
    pub fn into_criteria(self, default_limit: usize) -> ListCriteria {
        let order = self.order.unwrap_or(if self.query.is_some() {
            SortField::Relevance
        } else {
            SortField::Modified
        });
        ListCriteria {
            query: self.query,
            sources: self.sources,
            categories: self.categories,
            mime_types: self.mime_types,
            extensions: self.extensions,
            path_pattern: self.path_pattern,
            filename_pattern: self.filename_pattern,
            tags: self.tags,
            any_tags: self.any_tags,
            exclude_tags: self.exclude_tags,
            min_size: self.min_size,
            max_size: self.max_size,
            modified_after: self.modified_after,
            modified_before: self.modified_before,
            statuses: self.status,
            has_duplicates: self.has_duplicates,
            limit: self.limit.filter(|l| *l > 0).unwrap_or(default_limit),
            offset: self.offset.unwrap_or_default(),
            cursor: self.cursor,
            order,
            direction: self.order_dir.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticSearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub any_tags: Vec<String>,
    pub lexical_weight: Option<f32>,
    pub vector_weight: Option<f32>,
}

impl From<SemanticSearchRequest> for SemanticQuery {
    fn from(req: SemanticSearchRequest) -> Self {
        SemanticQuery {
            query: req.query,
            limit: req.limit,
            sources: req.sources,
            categories: req.categories,
            tags: req.tags,
            any_tags: req.any_tags,
            lexical_weight: req.lexical_weight,
            vector_weight: req.vector_weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticSearchResponse {
    pub results: Vec<SearchHit>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRequest {
    #[serde(flatten)]
    pub file: FileRef,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedResponse {
    pub status: String,
    pub id: String,
    pub added: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UntaggedResponse {
    pub status: String,
    pub id: String,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<Tag>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicatesRequest {
    pub content_hash: Option<String>,
    pub limit: Option<usize>,
    pub min_size: Option<u64>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DuplicatesResponse {
    Single {
        content_hash: String,
        duplicates: Vec<FileRecord>,
        count: usize,
    },
    Groups {
        duplicate_groups: Vec<DuplicateGroup>,
        total_groups: usize,
        summary: DuplicateSummary,
    },
}

/// `{status, id}` acknowledgement for remove and purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub status: String,
    pub id: String,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub files: StoreStats,
    pub duplicate_groups: u64,
    pub duplicate_instances: u64,
    pub wasted_bytes: u64,
    pub embeddings: EmbeddingStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentResponse {
    pub files: Vec<FileRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub activity: Vec<Activity>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarRequest {
    #[serde(flatten)]
    pub file: FileRef,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarResponse {
    pub source_id: String,
    pub similar: Vec<SimilarFile>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedPendingRequest {
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedPendingResponse {
    pub processed: usize,
}

/// Items stay raw so a malformed entry fails alone instead of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRegisterRequest {
    pub files: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub source: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchGetRequest {
    pub ids: Vec<String>,
    pub keys: Vec<KeyRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchTagRequest {
    pub ids: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRemoveRequest {
    pub ids: Vec<String>,
}

/// Key of a raw batch item, when it names one.
pub(crate) fn raw_item_key(item: &Value) -> Option<String> {
    let source = item.get("source")?.as_str()?;
    let path = item.get("path")?.as_str()?;
    Some(file_registry_store::file_key(source, path))
}

pub(crate) fn registered_item(index: usize, response: &RegisterResponse) -> BatchItem {
    BatchItem::success(index, &response.status)
        .with_id(response.id.clone())
        .with_key(response.key.clone())
        .with_details(serde_json::json!({ "is_new": response.is_new }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_file_ref_prefers_id() {
        let file: FileRef = parse_args(json!({"id": "7", "source": "local"})).unwrap();
        assert_eq!(file.locator().unwrap(), Locator::Id("7"));

        let file: FileRef = parse_args(json!({"source": "local", "path": "/a"})).unwrap();
        assert_eq!(
            file.locator().unwrap(),
            Locator::Key {
                source: "local",
                path: "/a"
            }
        );
    }

    #[test]
    fn test_file_ref_requires_id_or_key() {
        let file: FileRef = parse_args(json!({"source": "local"})).unwrap();
        let err = file.locator().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid input: either 'id' or both 'source' and 'path' are required"
        );
    }

    #[test]
    fn test_search_status_accepts_one_or_many() {
        let one: SearchRequest = parse_args(json!({"status": "deleted"})).unwrap();
        assert_eq!(one.status, vec![FileStatus::Deleted]);

        let many: SearchRequest =
            parse_args(json!({"status": ["active", "missing"], "query": "report"})).unwrap();
        let criteria = many.into_criteria(20);
        assert_eq!(criteria.statuses, vec![FileStatus::Active, FileStatus::Missing]);
        assert_eq!(criteria.order, SortField::Relevance);
        assert_eq!(criteria.limit, 20);
    }

    #[test]
    fn test_register_request_flattens_draft() {
        let req: RegisterRequest = parse_args(json!({
            "source": "gdrive",
            "path": "/docs/a.pdf",
            "content_hash": "abc",
            "size": 12,
            "tags": ["work"],
        }))
        .unwrap();
        assert_eq!(req.draft.key(), "gdrive:/docs/a.pdf");
        assert_eq!(req.draft.size, Some(12));
        assert_eq!(req.tags, vec!["work"]);
    }

    #[test]
    fn test_bad_argument_types_are_validation_errors() {
        let err = parse_args::<SearchRequest>(json!({"limit": "ten"})).unwrap_err();
        assert_eq!(err.reason(), "validation_error");
    }
}
