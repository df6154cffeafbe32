use crate::batch::BatchExecutor;
use crate::batch::BatchItem;
use crate::config::CrawlConfig;
use crate::error::RegistryError;
use crate::error::Result;
use crate::hash::hash_file_blocking;
use crate::mime::category_for_mime;
use crate::mime::mime_for_extension;
use crate::tags::TagManager;
use crate::tags::normalize_tags;
use chrono::DateTime;
use chrono::Utc;
use file_registry_store::FileDraft;
use file_registry_store::FileStatus;
use file_registry_store::MetadataStore;
use file_registry_store::file_key;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::warn;
use walkdir::WalkDir;

const STATUS_REGISTERED: &str = "registered";
const STATUS_SKIPPED: &str = "skipped";
const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlRequest {
    /// Directory to walk; a leading `~/` is expanded.
    pub path: String,
    /// Regex a file name must match.
    pub pattern: Option<String>,
    /// Regex that excludes matching file names.
    pub exclude_pattern: Option<String>,
    /// Negative or absent means unlimited; 0 keeps only files in the root.
    pub max_depth: Option<i64>,
    pub include_hidden: bool,
    pub dry_run: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CrawlReport {
    DryRun {
        path: String,
        total_found: usize,
        total_size: u64,
        by_category: BTreeMap<String, usize>,
        by_extension: BTreeMap<String, usize>,
    },
    Completed {
        path: String,
        total: usize,
        registered: usize,
        skipped: usize,
        failed: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<CrawlFailure>,
    },
}

#[derive(Debug, Clone)]
struct DiscoveredFile {
    path: PathBuf,
    size: u64,
    modified_at: Option<DateTime<Utc>>,
}

impl DiscoveredFile {
    fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

struct NameFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    include_hidden: bool,
}

impl NameFilter {
    fn compile(request: &CrawlRequest) -> Result<Self> {
        let compile = |field: &str, pattern: Option<&str>| -> Result<Option<Regex>> {
            match pattern.filter(|p| !p.is_empty()) {
                Some(pattern) => Regex::new(pattern)
                    .map(Some)
                    .map_err(|e| RegistryError::Validation(format!("invalid {field} regexp: {e}"))),
                None => Ok(None),
            }
        };
        Ok(Self {
            include: compile("pattern", request.pattern.as_deref())?,
            exclude: compile("exclude_pattern", request.exclude_pattern.as_deref())?,
            include_hidden: request.include_hidden,
        })
    }

    fn accepts(&self, name: &str) -> bool {
        self.include.as_ref().is_none_or(|re| re.is_match(name))
            && !self.exclude.as_ref().is_some_and(|re| re.is_match(name))
    }
}

fn resolve_root(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RegistryError::Validation("path is required".to_string()));
    }
    let expanded = match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    };
    let root = std::path::absolute(&expanded)?;
    let meta = std::fs::metadata(&root)
        .map_err(|e| RegistryError::Validation(format!("path not accessible: {e}")))?;
    if !meta.is_dir() {
        return Err(RegistryError::Validation(format!(
            "path is not a directory: {}",
            root.display()
        )));
    }
    Ok(root)
}

fn discover(root: &Path, max_depth: Option<i64>, filter: &NameFilter) -> Vec<DiscoveredFile> {
    let mut walker = WalkDir::new(root).min_depth(1);
    if let Some(depth) = max_depth.filter(|d| *d >= 0) {
        walker = walker.max_depth(depth as usize + 1);
    }
    let include_hidden = filter.include_hidden;
    let entries = walker.into_iter().filter_entry(move |entry| {
        include_hidden || entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
    });

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Crawl: error accessing path: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !filter.accepts(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %entry.path().display(), "Crawl: cannot stat file: {e}");
                continue;
            }
        };
        files.push(DiscoveredFile {
            path: entry.into_path(),
            size: meta.len(),
            modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    files
}

/// Walks a local tree and registers what it finds.
#[derive(Clone)]
pub struct Crawler {
    store: Arc<dyn MetadataStore>,
    tags: TagManager,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(store: Arc<dyn MetadataStore>, config: CrawlConfig) -> Self {
        Self {
            tags: TagManager::new(store.clone()),
            store,
            config,
        }
    }

    pub async fn crawl(&self, request: &CrawlRequest, executor: &BatchExecutor) -> Result<CrawlReport> {
        let root = resolve_root(&request.path)?;
        let filter = NameFilter::compile(request)?;
        let tags = normalize_tags(&request.tags)?;
        info!(path = %root.display(), max_depth = ?request.max_depth, dry_run = request.dry_run, "Starting crawl");

        let walk_root = root.clone();
        let max_depth = request.max_depth;
        let files = tokio::task::spawn_blocking(move || discover(&walk_root, max_depth, &filter))
            .await
            .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?;
        info!(files_found = files.len(), "Crawl: discovery complete");

        let path = root.to_string_lossy().into_owned();
        if request.dry_run {
            return Ok(dry_run_summary(path, &files));
        }

        let total = files.len();
        let store = self.store.clone();
        let tag_manager = self.tags.clone();
        let source = self.config.source.clone();
        let partial_size = self.config.partial_hash_size;
        let tags = Arc::new(tags);

        let report = executor
            .run("crawl", files, move |index, file| {
                let store = store.clone();
                let tag_manager = tag_manager.clone();
                let source = source.clone();
                let tags = tags.clone();
                async move {
                    let path = file.path.to_string_lossy().into_owned();
                    let key = file_key(&source, &path);
                    match register_file(&store, &tag_manager, &source, &file, partial_size, &tags).await {
                        Ok((id, status)) => BatchItem::success(index, status).with_id(id).with_key(key),
                        Err(e) => BatchItem::failure(index, e.reason(), e.to_string()).with_key(key),
                    }
                }
            })
            .await;

        let count = |status: &str| report.results.iter().filter(|r| r.status == status).count();
        let (registered, skipped, failed) = (count(STATUS_REGISTERED), count(STATUS_SKIPPED), report.failed);
        let errors: Vec<CrawlFailure> = report
            .results
            .into_iter()
            .filter(|r| r.is_failure())
            .map(|r| CrawlFailure {
                key: r.key.unwrap_or_default(),
                error: r.error.unwrap_or_default(),
            })
            .collect();
        info!(total, registered, skipped, failed, "Crawl completed");
        Ok(CrawlReport::Completed {
            path,
            total,
            registered,
            skipped,
            failed,
            errors,
        })
    }
}

async fn register_file(
    store: &Arc<dyn MetadataStore>,
    tags: &TagManager,
    source: &str,
    file: &DiscoveredFile,
    partial_size: usize,
    tag_names: &[String],
) -> Result<(String, &'static str)> {
    let path = file.path.to_string_lossy().into_owned();
    match store.get_by_key(source, &path).await {
        Ok(existing) if existing.status == FileStatus::Active => {
            return Ok((existing.id, STATUS_SKIPPED));
        }
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let hashes = hash_file_blocking(file.path.clone(), partial_size).await?;
    let mime = mime_for_extension(file.extension().as_deref().unwrap_or_default());
    let category = category_for_mime(&mime).to_string();

    let mut draft = FileDraft::new(source, path, hashes.content_hash);
    draft.partial_hash = Some(hashes.partial_hash);
    draft.size = Some(file.size);
    draft.modified_at = file.modified_at;
    draft.mime_type = Some(mime);
    draft.category = Some(category);
    draft.is_directory = Some(false);

    let outcome = store.upsert_record(&draft).await?;
    if !tag_names.is_empty() {
        tags.attach(&outcome.id, tag_names).await?;
    }
    Ok((outcome.id, STATUS_REGISTERED))
}

fn dry_run_summary(path: String, files: &[DiscoveredFile]) -> CrawlReport {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_extension: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_size = 0;
    for file in files {
        let ext = file.extension();
        let mime = mime_for_extension(ext.as_deref().unwrap_or_default());
        *by_category
            .entry(category_for_mime(&mime).to_string())
            .or_default() += 1;
        let ext_key = ext
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| NO_EXTENSION.to_string());
        *by_extension.entry(ext_key).or_default() += 1;
        total_size += file.size;
    }
    CrawlReport::DryRun {
        path,
        total_found: files.len(),
        total_size,
        by_category,
        by_extension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.pdf"), b"pdf").unwrap();
        std::fs::write(root.join("notes.txt"), b"notes").unwrap();
        std::fs::write(root.join(".hidden"), b"h").unwrap();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("sub/b.PDF"), b"pdf2").unwrap();
        std::fs::write(root.join("sub/deeper/c.pdf"), b"pdf3").unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git/config.pdf"), b"x").unwrap();
        dir
    }

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        let mut names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn filter(pattern: Option<&str>, exclude: Option<&str>, hidden: bool) -> NameFilter {
        NameFilter::compile(&CrawlRequest {
            pattern: pattern.map(str::to_string),
            exclude_pattern: exclude.map(str::to_string),
            include_hidden: hidden,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_pattern_filters_names_and_hidden_dirs_are_pruned() {
        let dir = tree();
        let files = discover(dir.path(), None, &filter(Some(r"(?i)\.pdf$"), None, false));
        assert_eq!(names(&files), vec!["a.pdf", "b.PDF", "c.pdf"]);
    }

    #[test]
    fn test_depth_zero_keeps_root_files_only() {
        let dir = tree();
        let files = discover(dir.path(), Some(0), &filter(None, None, false));
        assert_eq!(names(&files), vec!["a.pdf", "notes.txt"]);

        let files = discover(dir.path(), Some(1), &filter(None, Some("^notes"), false));
        assert_eq!(names(&files), vec!["a.pdf", "b.PDF"]);
    }

    #[test]
    fn test_hidden_entries_included_on_request() {
        let dir = tree();
        let files = discover(dir.path(), None, &filter(None, None, true));
        assert_eq!(files.len(), 6);
    }

    #[test]
    fn test_dry_run_summary_keys() {
        let dir = tree();
        let files = discover(dir.path(), None, &filter(None, None, false));
        let CrawlReport::DryRun {
            total_found,
            by_extension,
            by_category,
            ..
        } = dry_run_summary("root".to_string(), &files)
        else {
            panic!("expected a dry run summary");
        };
        assert_eq!(total_found, 4);
        assert_eq!(by_extension.get(".pdf"), Some(&3));
        assert_eq!(by_extension.get(".txt"), Some(&1));
        assert_eq!(by_category.get("document"), Some(&4));
    }

    #[test]
    fn test_invalid_regex_is_a_validation_error() {
        let err = NameFilter::compile(&CrawlRequest {
            pattern: Some("(".to_string()),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert_eq!(err.reason(), "validation_error");
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let dir = tree();
        let err = resolve_root(&dir.path().join("a.pdf").to_string_lossy()).unwrap_err();
        assert!(err.to_string().contains("not a directory"), "{err}");
        assert!(resolve_root("").is_err());
    }
}
