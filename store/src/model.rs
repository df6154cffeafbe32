use crate::error::Result;
use crate::error::StoreError;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a file record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Active,
    Missing,
    Moved,
    Deleted,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Missing => "missing",
            FileStatus::Moved => "moved",
            FileStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(FileStatus::Active),
            "missing" => Ok(FileStatus::Missing),
            "moved" => Ok(FileStatus::Moved),
            "deleted" => Ok(FileStatus::Deleted),
            other => Err(StoreError::Validation(format!("unknown status: {other}"))),
        }
    }
}

/// One indexed file, unique per `(source, path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub source: String,
    pub path: String,
    pub key: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_indexed_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: FileStatus,
}

impl FileRecord {
    /// True when the record carries text the embedding pipeline can use.
    pub fn has_content(&self) -> bool {
        non_empty(self.content_text.as_deref()).is_some()
            || non_empty(self.content_preview.as_deref()).is_some()
    }
}

/// Caller-supplied metadata for one registration.
///
/// Optional fields that are `None` (or empty strings) never overwrite values
/// already stored for the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDraft {
    pub source: String,
    pub path: String,
    pub content_hash: String,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub is_directory: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub source_file_id: Option<String>,
    pub partial_hash: Option<String>,
    pub content_text: Option<String>,
    pub content_preview: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl FileDraft {
    pub fn new(
        source: impl Into<String>,
        path: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            content_hash: content_hash.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        file_key(&self.source, &self.path)
    }

    /// Filename to store: the explicit one, else the last path segment.
    pub fn resolved_filename(&self) -> String {
        match non_empty(self.filename.as_deref()) {
            Some(name) => name.to_string(),
            None => filename_from_path(&self.path),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(StoreError::Validation("source is required".to_string()));
        }
        if self.path.trim().is_empty() {
            return Err(StoreError::Validation("path is required".to_string()));
        }
        if self.content_hash.trim().is_empty() {
            return Err(StoreError::Validation("content_hash is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    pub id: String,
    pub is_new: bool,
}

/// Partial update applied by `update_fields`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    pub status: Option<FileStatus>,
    pub verified_at: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    pub content_hash: Option<String>,
    pub partial_hash: Option<String>,
    pub content_text: Option<String>,
    pub content_preview: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
}

impl FieldUpdate {
    pub fn verified(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(FileStatus::Active),
            verified_at: Some(at),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_content(&self) -> bool {
        non_empty(self.content_text.as_deref()).is_some()
            || non_empty(self.content_preview.as_deref()).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub usage_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Registered,
    Updated,
    Tagged,
    Untagged,
    Removed,
    Verified,
    Purged,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::Registered => "registered",
            ActivityAction::Updated => "updated",
            ActivityAction::Tagged => "tagged",
            ActivityAction::Untagged => "untagged",
            ActivityAction::Removed => "removed",
            ActivityAction::Verified => "verified",
            ActivityAction::Purged => "purged",
        }
    }
}

impl FromStr for ActivityAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "registered" => Ok(ActivityAction::Registered),
            "updated" => Ok(ActivityAction::Updated),
            "tagged" => Ok(ActivityAction::Tagged),
            "untagged" => Ok(ActivityAction::Untagged),
            "removed" => Ok(ActivityAction::Removed),
            "verified" => Ok(ActivityAction::Verified),
            "purged" => Ok(ActivityAction::Purged),
            other => Err(StoreError::Validation(format!("unknown action: {other}"))),
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub source: String,
    pub path: String,
    pub action: ActivityAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub performed_by: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Modified,
    Size,
    Name,
    Indexed,
    Relevance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters, ordering and pagination for `list_filtered`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListCriteria {
    pub query: Option<String>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
    /// SQL LIKE pattern matched against the path.
    pub path_pattern: Option<String>,
    /// SQL LIKE pattern matched against the filename.
    pub filename_pattern: Option<String>,
    /// Every tag must be attached.
    pub tags: Vec<String>,
    /// At least one tag must be attached.
    pub any_tags: Vec<String>,
    /// None of these tags may be attached.
    pub exclude_tags: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub modified_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Empty means `{active}`.
    pub statuses: Vec<FileStatus>,
    pub has_duplicates: Option<bool>,
    pub limit: usize,
    pub offset: usize,
    pub cursor: Option<String>,
    pub order: SortField,
    pub direction: SortDirection,
}

pub const DEFAULT_LIST_LIMIT: usize = 50;

impl Default for ListCriteria {
    fn default() -> Self {
        Self {
            query: None,
            sources: Vec::new(),
            categories: Vec::new(),
            mime_types: Vec::new(),
            extensions: Vec::new(),
            path_pattern: None,
            filename_pattern: None,
            tags: Vec::new(),
            any_tags: Vec::new(),
            exclude_tags: Vec::new(),
            min_size: None,
            max_size: None,
            modified_after: None,
            modified_before: None,
            statuses: Vec::new(),
            has_duplicates: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
            cursor: None,
            order: SortField::default(),
            direction: SortDirection::default(),
        }
    }
}

impl ListCriteria {
    pub fn effective_statuses(&self) -> Vec<FileStatus> {
        if self.statuses.is_empty() {
            vec![FileStatus::Active]
        } else {
            self.statuses.clone()
        }
    }

    pub fn text_query(&self) -> Option<&str> {
        non_empty(self.query.as_deref())
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit
        }
    }

    /// Extensions normalized to the stored form: lowercase, no leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    /// Checks every criterion except the text query, pagination and the
    /// duplicate flag against an already loaded record and its tags.
    pub fn matches(&self, record: &FileRecord, tags: &[String]) -> bool {
        let in_set = |set: &[String], value: Option<&str>| {
            set.is_empty() || value.is_some_and(|v| set.iter().any(|s| s == v))
        };
        if !self.effective_statuses().contains(&record.status) {
            return false;
        }
        if !in_set(&self.sources, Some(record.source.as_str()))
            || !in_set(&self.categories, record.category.as_deref())
            || !in_set(&self.mime_types, record.mime_type.as_deref())
        {
            return false;
        }
        let extensions = self.normalized_extensions();
        if !in_set(&extensions, record.extension.as_deref()) {
            return false;
        }
        if let Some(pattern) = non_empty(self.path_pattern.as_deref())
            && !like_match(pattern, &record.path)
        {
            return false;
        }
        if let Some(pattern) = non_empty(self.filename_pattern.as_deref())
            && !like_match(pattern, &record.filename)
        {
            return false;
        }
        if self.min_size.is_some_and(|min| record.size < min)
            || self.max_size.is_some_and(|max| record.size > max)
        {
            return false;
        }
        if let Some(after) = self.modified_after
            && !record.modified_at.is_some_and(|m| m >= after)
        {
            return false;
        }
        if let Some(before) = self.modified_before
            && !record.modified_at.is_some_and(|m| m <= before)
        {
            return false;
        }
        let has = |name: &String| tags.iter().any(|t| t == name);
        if !self.tags.iter().all(has) {
            return false;
        }
        if !self.any_tags.is_empty() && !self.any_tags.iter().any(has) {
            return false;
        }
        !self.exclude_tags.iter().any(has)
    }
}

/// A record with the score assigned by the ranking that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: FileRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub total: u64,
    pub items: Vec<ScoredRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Scope of a duplicate scan. Filters apply to individual records before
/// grouping by hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateScan {
    pub min_size: Option<u64>,
    pub sources: Vec<String>,
}

/// Nearest-neighbour hit; lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
}

/// Input for a backend-native combined lexical and vector ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub lexical_weight: f32,
    pub vector_weight: f32,
    pub tags: Vec<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub count: u64,
    pub size: u64,
}

impl Bucket {
    pub fn add(&mut self, size: u64) {
        self.count += 1;
        self.size += size;
    }
}

/// Aggregate counts. Totals and the source/category/extension breakdowns
/// cover active records; `by_status` covers every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_files: u64,
    pub total_size: u64,
    pub by_source: BTreeMap<String, Bucket>,
    pub by_category: BTreeMap<String, Bucket>,
    pub by_status: BTreeMap<String, Bucket>,
    pub by_extension: BTreeMap<String, Bucket>,
}

impl StoreStats {
    /// Fold one record into the aggregate.
    pub fn add(&mut self, record: &FileRecord) {
        self.by_status
            .entry(record.status.to_string())
            .or_default()
            .add(record.size);
        if record.status != FileStatus::Active {
            return;
        }
        self.total_files += 1;
        self.total_size += record.size;
        self.by_source
            .entry(record.source.clone())
            .or_default()
            .add(record.size);
        self.by_category
            .entry(record.category.clone().unwrap_or_else(|| UNKNOWN.to_string()))
            .or_default()
            .add(record.size);
        self.by_extension
            .entry(record.extension.clone().unwrap_or_else(|| UNKNOWN.to_string()))
            .or_default()
            .add(record.size);
    }
}

/// Bucket name for records without a category or extension.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub total_embeddings: u64,
    pub files_with_content: u64,
    pub files_needing_embeddings: u64,
    pub by_model: BTreeMap<String, u64>,
}

pub fn file_key(source: &str, path: &str) -> String {
    format!("{source}:{path}")
}

/// Last non-empty path segment; accepts both `/` and `\` separators.
pub fn filename_from_path(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// Lowercase extension without the dot. Names that only start with a dot
/// (`.bashrc`) have no extension.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// SQL LIKE semantics (`%` any run, `_` one char), ASCII case-insensitive.
pub(crate) fn like_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();
    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, v));
                p += 1;
            }
            Some('_') => {
                p += 1;
                v += 1;
            }
            Some(c) if *c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match backtrack {
                Some((bp, bv)) => {
                    p = bp + 1;
                    v = bv + 1;
                    backtrack = Some((bp, bv + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filename_from_path() {
        assert_eq!(filename_from_path("/home/me/report.pdf"), "report.pdf");
        assert_eq!(filename_from_path("Drive/Folder/"), "Folder");
        assert_eq!(filename_from_path("C:\\docs\\a.txt"), "a.txt");
        assert_eq!(filename_from_path("plain"), "plain");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("Report.PDF"), Some("pdf".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("Makefile"), None);
    }

    #[test]
    fn test_draft_validation_names_missing_field() {
        let draft = FileDraft::new("local", "/tmp/a.txt", "");
        let err = draft.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid input: content_hash is required");

        let draft = FileDraft::new("", "/tmp/a.txt", "abc");
        assert!(draft.validate().unwrap_err().to_string().contains("source"));
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("%.pdf", "/x/Report.PDF"));
        assert!(like_match("/home/%/notes_", "/home/me/notes1"));
        assert!(!like_match("/home/%/notes_", "/home/me/notes"));
        assert!(like_match("%", ""));
    }

    #[test]
    fn test_criteria_tag_semantics() {
        let record = FileRecord {
            id: "1".to_string(),
            source: "local".to_string(),
            path: "/a.txt".to_string(),
            key: "local:/a.txt".to_string(),
            filename: "a.txt".to_string(),
            extension: Some("txt".to_string()),
            size: 10,
            mime_type: None,
            is_directory: false,
            source_file_id: None,
            created_at: None,
            modified_at: None,
            indexed_at: Utc::now(),
            verified_at: None,
            content_indexed_at: None,
            content_hash: "h".to_string(),
            partial_hash: None,
            content_text: None,
            content_preview: None,
            category: None,
            subcategory: None,
            embedding_model: None,
            embedding_at: None,
            status: FileStatus::Active,
        };
        let tags = vec!["a".to_string()];

        let all = ListCriteria {
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert!(!all.matches(&record, &tags));

        let any = ListCriteria {
            any_tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert!(any.matches(&record, &tags));

        let exclude = ListCriteria {
            exclude_tags: vec!["a".to_string()],
            ..Default::default()
        };
        assert!(!exclude.matches(&record, &tags));

        let ext = ListCriteria {
            extensions: vec![".TXT".to_string()],
            ..Default::default()
        };
        assert!(ext.matches(&record, &tags));
    }
}
