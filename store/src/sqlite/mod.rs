//! Local backend: SQLite with an FTS5 index over path, filename and
//! extracted text, and vectors kept as blobs scored in process.

mod filter;
mod rows;
mod schema;

use crate::error::Result;
use crate::error::StoreError;
use crate::model::Activity;
use crate::model::ActivityAction;
use crate::model::Bucket;
use crate::model::DuplicateScan;
use crate::model::EmbeddingStats;
use crate::model::FieldUpdate;
use crate::model::FileDraft;
use crate::model::FileRecord;
use crate::model::ListCriteria;
use crate::model::Page;
use crate::model::ScoredRecord;
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
use filter::build_where;
use filter::fts_query;
use filter::order_by;
use filter::placeholders;
use rows::FILE_COLUMN_COUNT;
use rows::FILE_COLUMNS;
use rows::FILES_FROM;
use rows::activity_from_row;
use rows::record_from_row;
use rows::tag_from_row;
use rows::to_i64;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;
use tracing::info;

/// SQLite-backed `MetadataStore`.
///
/// One connection guarded by a mutex; every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    options: StoreOptions,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        info!("Opening SQLite metadata store at {}", path.display());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, options)
    }

    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, options)
    }

    fn with_connection(conn: Connection, options: StoreOptions) -> Result<Self> {
        schema::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            options,
        })
    }

    async fn run<T, F>(&self, operation: &'static str, target: String, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let join_target = target.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::backend(operation, &target, "connection lock poisoned"))?;
            f(&mut guard).map_err(|err| err.in_operation(operation, &target))
        })
        .await
        .map_err(|err| StoreError::backend(operation, join_target, err))?
    }
}

fn parse_id(id: &str) -> Result<i64> {
    id.trim()
        .parse()
        .map_err(|_| StoreError::NotFound(format!("file {id}")))
}

fn load_record(conn: &Connection, id: i64) -> Result<FileRecord> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM {FILES_FROM} WHERE f.id = ?1"),
        [id],
        record_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(format!("file {id}")))
}

fn load_by_key(conn: &Connection, source: &str, path: &str) -> Result<FileRecord> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM {FILES_FROM} WHERE f.source = ?1 AND f.path = ?2"),
        params![source, path],
        record_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(file_key(source, path)))
}

fn query_records(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params_from_iter(params.iter()), record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn log_activity(
    conn: &Connection,
    file_id: Option<i64>,
    record: (&str, &str),
    action: ActivityAction,
    details: Option<String>,
    actor: &str,
) -> rusqlite::Result<()> {
    let (source, path) = record;
    conn.execute(
        "INSERT INTO file_activity (file_id, source, path, action, details, performed_at, performed_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![file_id, source, path, action, details, Utc::now(), actor],
    )?;
    Ok(())
}

fn tags_of(conn: &Connection, file_id: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM file_tags ft JOIN tags t ON t.id = ft.tag_id
         WHERE ft.file_id = ?1 ORDER BY t.name",
    )?;
    let names = stmt
        .query_map([file_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

fn ensure_tag(conn: &Connection, name: &str, now: DateTime<Utc>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tags (name, usage_count, created_at) VALUES (?1, 0, ?2)
         ON CONFLICT(name) DO NOTHING",
        params![name, now],
    )?;
    conn.query_row("SELECT id FROM tags WHERE name = ?1", [name], |row| {
        row.get(0)
    })
}

/// Drop every tag association of a file, decrementing usage counters.
fn detach_all(conn: &Connection, file_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE tags SET usage_count = usage_count - 1
         WHERE usage_count > 0 AND id IN (SELECT tag_id FROM file_tags WHERE file_id = ?1)",
        [file_id],
    )?;
    conn.execute("DELETE FROM file_tags WHERE file_id = ?1", [file_id])?;
    Ok(())
}

fn validate_tag_names(names: &[String]) -> Result<()> {
    if names.iter().any(|name| name.trim().is_empty()) {
        return Err(StoreError::Validation("tag names must not be empty".to_string()));
    }
    Ok(())
}

fn upsert(conn: &mut Connection, draft: &FileDraft, actor: &str) -> Result<UpsertOutcome> {
    let now = Utc::now();
    let tx = conn.transaction()?;
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM files WHERE source = ?1 AND path = ?2",
            params![draft.source, draft.path],
            |row| row.get(0),
        )
        .optional()?;
    let content_indexed_at = non_empty(draft.content_text.as_deref()).map(|_| now);
    let size = draft.size.map(to_i64);

    let outcome = match existing {
        None => {
            if draft.content_hash.trim().is_empty() {
                return Err(StoreError::ConstraintViolation(format!(
                    "content_hash is required for {}",
                    draft.key()
                )));
            }
            let filename = draft.resolved_filename();
            let extension = extension_of(&filename);
            tx.execute(
                "INSERT INTO files (
                    source, path, filename, extension, size, mime_type, is_directory,
                    source_file_id, created_at, modified_at, indexed_at, content_indexed_at,
                    content_hash, partial_hash, content_text, content_preview, category,
                    subcategory, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, 'active')",
                params![
                    draft.source,
                    draft.path,
                    filename,
                    extension,
                    size.unwrap_or_default(),
                    non_empty(draft.mime_type.as_deref()),
                    draft.is_directory.unwrap_or_default(),
                    non_empty(draft.source_file_id.as_deref()),
                    draft.created_at,
                    draft.modified_at,
                    now,
                    content_indexed_at,
                    draft.content_hash,
                    non_empty(draft.partial_hash.as_deref()),
                    non_empty(draft.content_text.as_deref()),
                    non_empty(draft.content_preview.as_deref()),
                    non_empty(draft.category.as_deref()),
                    non_empty(draft.subcategory.as_deref()),
                ],
            )?;
            let id = tx.last_insert_rowid();
            log_activity(
                &tx,
                Some(id),
                (&draft.source, &draft.path),
                ActivityAction::Registered,
                None,
                actor,
            )?;
            UpsertOutcome {
                id: id.to_string(),
                is_new: true,
            }
        }
        Some(id) => {
            let filename = non_empty(draft.filename.as_deref());
            let extension = filename.and_then(extension_of);
            tx.execute(
                "UPDATE files SET
                    filename = COALESCE(NULLIF(?2, ''), filename),
                    extension = COALESCE(?3, extension),
                    size = COALESCE(?4, size),
                    mime_type = COALESCE(NULLIF(?5, ''), mime_type),
                    is_directory = COALESCE(?6, is_directory),
                    source_file_id = COALESCE(NULLIF(?7, ''), source_file_id),
                    created_at = COALESCE(?8, created_at),
                    modified_at = COALESCE(?9, modified_at),
                    content_hash = COALESCE(NULLIF(?10, ''), content_hash),
                    partial_hash = COALESCE(NULLIF(?11, ''), partial_hash),
                    content_text = COALESCE(NULLIF(?12, ''), content_text),
                    content_preview = COALESCE(NULLIF(?13, ''), content_preview),
                    category = COALESCE(NULLIF(?14, ''), category),
                    subcategory = COALESCE(NULLIF(?15, ''), subcategory),
                    content_indexed_at = COALESCE(?16, content_indexed_at),
                    verified_at = ?17,
                    status = 'active'
                WHERE id = ?1",
                params![
                    id,
                    filename,
                    extension,
                    size,
                    non_empty(draft.mime_type.as_deref()),
                    draft.is_directory,
                    non_empty(draft.source_file_id.as_deref()),
                    draft.created_at,
                    draft.modified_at,
                    non_empty(Some(draft.content_hash.as_str())),
                    non_empty(draft.partial_hash.as_deref()),
                    non_empty(draft.content_text.as_deref()),
                    non_empty(draft.content_preview.as_deref()),
                    non_empty(draft.category.as_deref()),
                    non_empty(draft.subcategory.as_deref()),
                    content_indexed_at,
                    now,
                ],
            )?;
            log_activity(
                &tx,
                Some(id),
                (&draft.source, &draft.path),
                ActivityAction::Updated,
                None,
                actor,
            )?;
            UpsertOutcome {
                id: id.to_string(),
                is_new: false,
            }
        }
    };
    tx.commit()?;
    Ok(outcome)
}

fn update(
    conn: &mut Connection,
    id: i64,
    update: &FieldUpdate,
    actor: &str,
) -> Result<FileRecord> {
    let tx = conn.transaction()?;
    let record = load_record(&tx, id)?;
    if update.is_empty() {
        return Ok(record);
    }
    let content_indexed_at = update.touches_content().then(Utc::now);
    tx.execute(
        "UPDATE files SET
            status = COALESCE(?2, status),
            verified_at = COALESCE(?3, verified_at),
            size = COALESCE(?4, size),
            modified_at = COALESCE(?5, modified_at),
            mime_type = COALESCE(NULLIF(?6, ''), mime_type),
            content_hash = COALESCE(NULLIF(?7, ''), content_hash),
            partial_hash = COALESCE(NULLIF(?8, ''), partial_hash),
            content_text = COALESCE(NULLIF(?9, ''), content_text),
            content_preview = COALESCE(NULLIF(?10, ''), content_preview),
            category = COALESCE(NULLIF(?11, ''), category),
            subcategory = COALESCE(NULLIF(?12, ''), subcategory),
            content_indexed_at = COALESCE(?13, content_indexed_at)
        WHERE id = ?1",
        params![
            id,
            update.status,
            update.verified_at,
            update.size.map(to_i64),
            update.modified_at,
            non_empty(update.mime_type.as_deref()),
            non_empty(update.content_hash.as_deref()),
            non_empty(update.partial_hash.as_deref()),
            non_empty(update.content_text.as_deref()),
            non_empty(update.content_preview.as_deref()),
            non_empty(update.category.as_deref()),
            non_empty(update.subcategory.as_deref()),
            content_indexed_at,
        ],
    )?;
    let action = if update.verified_at.is_some() {
        ActivityAction::Verified
    } else {
        ActivityAction::Updated
    };
    log_activity(
        &tx,
        Some(id),
        (&record.source, &record.path),
        action,
        None,
        actor,
    )?;
    tx.commit()?;
    load_record(conn, id)
}

fn remove(conn: &mut Connection, id: i64, actor: &str) -> Result<FileRecord> {
    let tx = conn.transaction()?;
    let record = load_record(&tx, id)?;
    detach_all(&tx, id)?;
    tx.execute("DELETE FROM file_embeddings WHERE file_id = ?1", [id])?;
    tx.execute("UPDATE files SET status = 'deleted' WHERE id = ?1", [id])?;
    log_activity(
        &tx,
        Some(id),
        (&record.source, &record.path),
        ActivityAction::Removed,
        None,
        actor,
    )?;
    tx.commit()?;
    load_record(conn, id)
}

fn purge(conn: &mut Connection, id: i64, actor: &str) -> Result<FileRecord> {
    let tx = conn.transaction()?;
    let record = load_record(&tx, id)?;
    detach_all(&tx, id)?;
    tx.execute("DELETE FROM files WHERE id = ?1", [id])?;
    log_activity(
        &tx,
        None,
        (&record.source, &record.path),
        ActivityAction::Purged,
        Some(format!("id={id}")),
        actor,
    )?;
    tx.commit()?;
    Ok(record)
}

fn list(conn: &Connection, criteria: &ListCriteria) -> Result<Page> {
    let fts = criteria.text_query().and_then(fts_query);
    let from = if fts.is_some() {
        format!("{FILES_FROM} JOIN files_fts ON files_fts.rowid = f.id")
    } else {
        FILES_FROM.to_string()
    };
    let clause = build_where(criteria, fts.as_deref());
    let where_sql = clause.sql();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {from}{where_sql}"),
        params_from_iter(clause.params.iter()),
        |row| row.get(0),
    )?;
    let total = u64::try_from(total).unwrap_or_default();

    let offset = match criteria.cursor.as_deref().filter(|c| !c.is_empty()) {
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| StoreError::Validation(format!("invalid cursor: {cursor}")))?,
        None => criteria.offset,
    };
    let limit = criteria.effective_limit();
    let rank_column = if fts.is_some() {
        "bm25(files_fts)"
    } else {
        "NULL"
    };
    let sql = format!(
        "SELECT {FILE_COLUMNS}, {rank_column} AS fts_rank FROM {from}{where_sql}{} LIMIT ? OFFSET ?",
        order_by(criteria, fts.is_some())
    );
    let mut params = clause.params;
    params.push(Value::Integer(to_i64(limit as u64)));
    params.push(Value::Integer(to_i64(offset as u64)));

    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let record = record_from_row(row)?;
            let rank: Option<f64> = row.get(FILE_COLUMN_COUNT)?;
            Ok(ScoredRecord {
                record,
                score: rank.map(|rank| -rank as f32),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let consumed = (offset + items.len()) as u64;
    let next_cursor = (consumed < total).then(|| consumed.to_string());
    Ok(Page {
        total,
        items,
        next_cursor,
    })
}

fn attach(conn: &mut Connection, id: i64, names: &[String], actor: &str) -> Result<Vec<String>> {
    validate_tag_names(names)?;
    let now = Utc::now();
    let tx = conn.transaction()?;
    let record = load_record(&tx, id)?;
    let mut added = Vec::new();
    for name in names {
        let tag_id = ensure_tag(&tx, name, now)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO file_tags (file_id, tag_id, tagged_at) VALUES (?1, ?2, ?3)",
            params![id, tag_id, now],
        )?;
        if inserted > 0 {
            tx.execute(
                "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
                [tag_id],
            )?;
            added.push(name.clone());
        }
    }
    if !added.is_empty() {
        log_activity(
            &tx,
            Some(id),
            (&record.source, &record.path),
            ActivityAction::Tagged,
            Some(added.join(",")),
            actor,
        )?;
    }
    tx.commit()?;
    Ok(added)
}

fn detach(conn: &mut Connection, id: i64, names: &[String], actor: &str) -> Result<Vec<String>> {
    let tx = conn.transaction()?;
    let record = load_record(&tx, id)?;
    let current = tags_of(&tx, id)?;
    let mut removed = Vec::new();
    for name in names.iter().filter(|name| current.contains(name)) {
        let deleted = tx.execute(
            "DELETE FROM file_tags
             WHERE file_id = ?1 AND tag_id = (SELECT id FROM tags WHERE name = ?2)",
            params![id, name],
        )?;
        if deleted > 0 {
            tx.execute(
                "UPDATE tags SET usage_count = usage_count - 1 WHERE name = ?1 AND usage_count > 0",
                [name],
            )?;
            removed.push(name.clone());
        }
    }
    if !removed.is_empty() {
        log_activity(
            &tx,
            Some(id),
            (&record.source, &record.path),
            ActivityAction::Untagged,
            Some(removed.join(",")),
            actor,
        )?;
    }
    tx.commit()?;
    Ok(removed)
}

fn duplicate_scope(prefix: &str, scan: &DuplicateScan) -> (String, Vec<Value>) {
    let mut sql = format!("{prefix}status = 'active' AND {prefix}content_hash <> ''");
    let mut params = Vec::new();
    if !scan.sources.is_empty() {
        sql.push_str(&format!(
            " AND {prefix}source IN ({})",
            placeholders(scan.sources.len())
        ));
        params.extend(scan.sources.iter().cloned().map(Value::Text));
    }
    if let Some(min) = scan.min_size {
        sql.push_str(&format!(" AND {prefix}size >= ?"));
        params.push(Value::Integer(to_i64(min)));
    }
    (sql, params)
}

fn buckets(conn: &Connection, sql: &str) -> rusqlite::Result<BTreeMap<String, Bucket>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        let count: i64 = row.get(1)?;
        let size: i64 = row.get(2)?;
        Ok((
            row.get::<_, String>(0)?,
            Bucket {
                count: u64::try_from(count).unwrap_or_default(),
                size: u64::try_from(size).unwrap_or_default(),
            },
        ))
    })?;
    rows.collect()
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<u64> {
    let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(u64::try_from(value).unwrap_or_default())
}

const HAS_CONTENT: &str = "((f.content_text IS NOT NULL AND f.content_text <> '') \
     OR (f.content_preview IS NOT NULL AND f.content_preview <> ''))";

#[async_trait]
impl MetadataStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn embedding_dimension(&self) -> usize {
        self.options.embedding_dimension
    }

    async fn upsert_record(&self, draft: &FileDraft) -> Result<UpsertOutcome> {
        let draft = draft.clone();
        let actor = self.options.actor.clone();
        let outcome = self
            .run("upsert", draft.key(), move |conn| upsert(conn, &draft, &actor))
            .await?;
        debug!(id = %outcome.id, is_new = outcome.is_new, "Upserted file record");
        Ok(outcome)
    }

    async fn get_by_id(&self, id: &str) -> Result<FileRecord> {
        let file_id = parse_id(id)?;
        self.run("get", id.to_string(), move |conn| load_record(conn, file_id))
            .await
    }

    async fn get_by_key(&self, source: &str, path: &str) -> Result<FileRecord> {
        let (source, path) = (source.to_string(), path.to_string());
        self.run("get", file_key(&source, &path), move |conn| {
            load_by_key(conn, &source, &path)
        })
        .await
    }

    async fn remove_by_id(&self, id: &str) -> Result<FileRecord> {
        let file_id = parse_id(id)?;
        let actor = self.options.actor.clone();
        self.run("remove", id.to_string(), move |conn| {
            remove(conn, file_id, &actor)
        })
        .await
    }

    async fn purge_by_id(&self, id: &str) -> Result<FileRecord> {
        let file_id = parse_id(id)?;
        let actor = self.options.actor.clone();
        self.run("purge", id.to_string(), move |conn| {
            purge(conn, file_id, &actor)
        })
        .await
    }

    async fn update_fields(&self, id: &str, fields: &FieldUpdate) -> Result<FileRecord> {
        let file_id = parse_id(id)?;
        let fields = fields.clone();
        let actor = self.options.actor.clone();
        self.run("update", id.to_string(), move |conn| {
            update(conn, file_id, &fields, &actor)
        })
        .await
    }

    async fn list_filtered(&self, criteria: &ListCriteria) -> Result<Page> {
        let criteria = criteria.clone();
        self.run("list", "files".to_string(), move |conn| list(conn, &criteria))
            .await
    }

    async fn attach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>> {
        let file_id = parse_id(id)?;
        let names = names.to_vec();
        let actor = self.options.actor.clone();
        self.run("attach_tags", id.to_string(), move |conn| {
            attach(conn, file_id, &names, &actor)
        })
        .await
    }

    async fn detach_tags(&self, id: &str, names: &[String]) -> Result<Vec<String>> {
        let file_id = parse_id(id)?;
        let names = names.to_vec();
        let actor = self.options.actor.clone();
        self.run("detach_tags", id.to_string(), move |conn| {
            detach(conn, file_id, &names, &actor)
        })
        .await
    }

    async fn file_tags(&self, id: &str) -> Result<Vec<String>> {
        let file_id = parse_id(id)?;
        self.run("file_tags", id.to_string(), move |conn| {
            Ok(tags_of(conn, file_id)?)
        })
        .await
    }

    async fn list_tags(&self) -> Result<Vec<Tag>> {
        self.run("list_tags", "tags".to_string(), |conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, usage_count, created_at FROM tags ORDER BY name")?;
            let tags = stmt
                .query_map([], tag_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
        .await
    }

    async fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        validate_tag_names(&[name.to_string()])?;
        let name = name.to_string();
        self.run("get_or_create_tag", name.clone(), move |conn| {
            let tag_id = ensure_tag(conn, &name, Utc::now())?;
            Ok(conn.query_row(
                "SELECT id, name, usage_count, created_at FROM tags WHERE id = ?1",
                [tag_id],
                tag_from_row,
            )?)
        })
        .await
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<FileRecord>> {
        let hash = content_hash.to_string();
        self.run("find_by_hash", hash.clone(), move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {FILE_COLUMNS} FROM {FILES_FROM}
                     WHERE f.content_hash = ?1 AND f.status = 'active'
                     ORDER BY f.indexed_at, f.id"
                ),
                &[Value::Text(hash)],
            )
        })
        .await
    }

    async fn duplicate_candidates(&self, scan: &DuplicateScan) -> Result<Vec<FileRecord>> {
        let scan = scan.clone();
        self.run("duplicate_candidates", "files".to_string(), move |conn| {
            let (outer, mut params) = duplicate_scope("f.", &scan);
            let (inner, inner_params) = duplicate_scope("", &scan);
            params.extend(inner_params);
            query_records(
                conn,
                &format!(
                    "SELECT {FILE_COLUMNS} FROM {FILES_FROM}
                     WHERE {outer} AND f.content_hash IN (
                         SELECT content_hash FROM files WHERE {inner}
                         GROUP BY content_hash HAVING COUNT(*) > 1
                     )
                     ORDER BY f.content_hash, f.indexed_at, f.id"
                ),
                &params,
            )
        })
        .await
    }

    async fn upsert_embedding(&self, id: &str, embedding: &[f32], model: &str) -> Result<()> {
        vector::check_dimension(embedding, self.options.embedding_dimension)?;
        let file_id = parse_id(id)?;
        let blob = vector::encode(embedding);
        let model = model.to_string();
        self.run("upsert_embedding", id.to_string(), move |conn| {
            load_record(conn, file_id)?;
            conn.execute(
                "INSERT INTO file_embeddings (file_id, model, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(file_id) DO UPDATE SET
                     model = excluded.model,
                     vector = excluded.vector,
                     created_at = excluded.created_at",
                params![file_id, model, blob, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let file_id = parse_id(id)?;
        self.run("embedding_of", id.to_string(), move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT vector FROM file_embeddings WHERE file_id = ?1",
                    [file_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(blob.map(|bytes| vector::decode(&bytes)))
        })
        .await
    }

    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        vector::check_dimension(embedding, self.options.embedding_dimension)?;
        let query = embedding.to_vec();
        self.run("vector_search", "file_embeddings".to_string(), move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.file_id, e.vector FROM file_embeddings e
                 JOIN files f ON f.id = e.file_id
                 WHERE f.status = 'active'",
            )?;
            let stored = stmt
                .query_map([], |row| {
                    let id: i64 = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((id.to_string(), vector::decode(&blob)))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(vector::nearest(
                &query,
                stored.iter().map(|(id, v)| (id.clone(), v.as_slice())),
                k,
            ))
        })
        .await
    }

    async fn files_missing_embeddings(&self, limit: usize) -> Result<Vec<FileRecord>> {
        self.run("files_missing_embeddings", "files".to_string(), move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {FILE_COLUMNS} FROM {FILES_FROM}
                     WHERE f.status = 'active' AND f.is_directory = 0
                       AND {HAS_CONTENT} AND e.file_id IS NULL
                     ORDER BY f.modified_at DESC, f.id DESC
                     LIMIT ?1"
                ),
                &[Value::Integer(to_i64(limit as u64))],
            )
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.run("stats", "files".to_string(), |conn| {
            let (total_files, total_size): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE status = 'active'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(StoreStats {
                total_files: u64::try_from(total_files).unwrap_or_default(),
                total_size: u64::try_from(total_size).unwrap_or_default(),
                by_source: buckets(
                    conn,
                    "SELECT source, COUNT(*), COALESCE(SUM(size), 0) FROM files
                     WHERE status = 'active' GROUP BY source",
                )?,
                by_category: buckets(
                    conn,
                    "SELECT COALESCE(category, 'unknown'), COUNT(*), COALESCE(SUM(size), 0)
                     FROM files WHERE status = 'active' GROUP BY 1",
                )?,
                by_status: buckets(
                    conn,
                    "SELECT status, COUNT(*), COALESCE(SUM(size), 0) FROM files GROUP BY status",
                )?,
                by_extension: buckets(
                    conn,
                    "SELECT COALESCE(extension, 'unknown'), COUNT(*), COALESCE(SUM(size), 0)
                     FROM files WHERE status = 'active' GROUP BY 1",
                )?,
            })
        })
        .await
    }

    async fn embedding_stats(&self) -> Result<EmbeddingStats> {
        self.run("embedding_stats", "file_embeddings".to_string(), |conn| {
            let mut by_model = BTreeMap::new();
            let mut stmt =
                conn.prepare("SELECT model, COUNT(*) FROM file_embeddings GROUP BY model")?;
            for row in stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })? {
                let (model, n) = row?;
                by_model.insert(model, u64::try_from(n).unwrap_or_default());
            }
            Ok(EmbeddingStats {
                total_embeddings: count(conn, "SELECT COUNT(*) FROM file_embeddings")?,
                files_with_content: count(
                    conn,
                    &format!(
                        "SELECT COUNT(*) FROM files f
                         WHERE f.status = 'active' AND f.is_directory = 0 AND {HAS_CONTENT}"
                    ),
                )?,
                files_needing_embeddings: count(
                    conn,
                    &format!(
                        "SELECT COUNT(*) FROM {FILES_FROM}
                         WHERE f.status = 'active' AND f.is_directory = 0
                           AND {HAS_CONTENT} AND e.file_id IS NULL"
                    ),
                )?,
                by_model,
            })
        })
        .await
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<Activity>> {
        self.run("recent_activity", "file_activity".to_string(), move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, file_id, source, path, action, details, performed_at, performed_by
                 FROM file_activity ORDER BY performed_at DESC, id DESC LIMIT ?1",
            )?;
            let entries = stmt
                .query_map([to_i64(limit as u64)], activity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileStatus;
    use crate::model::SortField;
    use pretty_assertions::assert_eq;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(StoreOptions {
            embedding_dimension: 3,
            ..Default::default()
        })
        .unwrap()
    }

    fn draft(path: &str, hash: &str, size: u64) -> FileDraft {
        FileDraft {
            size: Some(size),
            ..FileDraft::new("local", path, hash)
        }
    }

    #[tokio::test]
    async fn test_reregistration_merges_non_empty_fields() {
        let store = store();
        let first = FileDraft {
            mime_type: Some("text/plain".to_string()),
            category: Some("document".to_string()),
            ..draft("/docs/a.txt", "h1", 10)
        };
        let created = store.upsert_record(&first).await.unwrap();
        assert!(created.is_new);

        let second = FileDraft {
            size: Some(20),
            mime_type: Some(String::new()),
            subcategory: Some("notes".to_string()),
            ..FileDraft::new("local", "/docs/a.txt", "h2")
        };
        let updated = store.upsert_record(&second).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert!(!updated.is_new);

        let record = store.get_by_id(&created.id).await.unwrap();
        assert_eq!(record.size, 20);
        assert_eq!(record.content_hash, "h2");
        assert_eq!(record.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(record.category.as_deref(), Some("document"));
        assert_eq!(record.subcategory.as_deref(), Some("notes"));
        assert_eq!(record.filename, "a.txt");
        assert_eq!(record.extension.as_deref(), Some("txt"));
        assert!(record.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_whitespace_fields_do_not_overwrite_known_values() {
        let store = store();
        let first = FileDraft {
            mime_type: Some("text/plain".to_string()),
            content_text: Some("meeting notes".to_string()),
            category: Some("document".to_string()),
            ..draft("/a.txt", "h1", 10)
        };
        let id = store.upsert_record(&first).await.unwrap().id;
        let indexed_at = store.get_by_id(&id).await.unwrap().content_indexed_at;

        let blank = FileDraft {
            mime_type: Some("  ".to_string()),
            content_text: Some("   ".to_string()),
            category: Some("\t".to_string()),
            ..FileDraft::new("local", "/a.txt", " ")
        };
        store.upsert_record(&blank).await.unwrap();
        let record = store.get_by_id(&id).await.unwrap();
        assert_eq!(record.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(record.content_text.as_deref(), Some("meeting notes"));
        assert_eq!(record.category.as_deref(), Some("document"));
        assert_eq!(record.content_hash, "h1");
        assert_eq!(record.content_indexed_at, indexed_at);

        let fields = FieldUpdate {
            mime_type: Some(" ".to_string()),
            content_preview: Some("  ".to_string()),
            size: Some(12),
            ..Default::default()
        };
        let record = store.update_fields(&id, &fields).await.unwrap();
        assert_eq!(record.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(record.content_preview, None);
        assert_eq!(record.size, 12);
        assert_eq!(record.content_indexed_at, indexed_at);
    }

    #[tokio::test]
    async fn test_insert_without_hash_is_rejected() {
        let store = store();
        let err = store
            .upsert_record(&FileDraft::new("local", "/x", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        let page = store.list_filtered(&ListCriteria::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let store = store();
        assert!(store.get_by_id("42").await.unwrap_err().is_not_found());
        assert!(store.get_by_id("abc").await.unwrap_err().is_not_found());
        assert!(
            store
                .get_by_key("local", "/missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_tag_counts_follow_attach_and_detach() {
        let store = store();
        let id = store.upsert_record(&draft("/a", "h", 1)).await.unwrap().id;
        let names = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let added = store.attach_tags(&id, &names).await.unwrap();
        assert_eq!(added, vec!["a".to_string(), "b".to_string()]);

        let again = store.attach_tags(&id, &["a".to_string()]).await.unwrap();
        assert!(again.is_empty());

        let removed = store
            .detach_tags(&id, &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, vec!["a".to_string()]);

        let tags = store.list_tags().await.unwrap();
        let counts: Vec<(String, u64)> = tags.into_iter().map(|t| (t.name, t.usage_count)).collect();
        assert_eq!(counts, vec![("a".to_string(), 0), ("b".to_string(), 1)]);
        assert_eq!(store.file_tags(&id).await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_soft_remove_drops_tags_and_hides_record() {
        let store = store();
        let id = store.upsert_record(&draft("/a", "h", 1)).await.unwrap().id;
        store.attach_tags(&id, &["t".to_string()]).await.unwrap();
        store.upsert_embedding(&id, &[1.0, 0.0, 0.0], "m").await.unwrap();

        let removed = store.remove_by_key("local", "/a").await.unwrap();
        assert_eq!(removed.status, FileStatus::Deleted);
        assert_eq!(store.list_tags().await.unwrap()[0].usage_count, 0);
        assert_eq!(store.embedding_of(&id).await.unwrap(), None);
        assert_eq!(store.list_filtered(&ListCriteria::default()).await.unwrap().total, 0);

        let back = store.upsert_record(&draft("/a", "h", 1)).await.unwrap();
        assert_eq!(back.id, id);
        assert_eq!(store.get_by_id(&id).await.unwrap().status, FileStatus::Active);
    }

    #[tokio::test]
    async fn test_purge_deletes_row() {
        let store = store();
        let id = store.upsert_record(&draft("/a", "h", 1)).await.unwrap().id;
        store.purge_by_id(&id).await.unwrap();
        assert!(store.get_by_id(&id).await.unwrap_err().is_not_found());
        let activity = store.recent_activity(10).await.unwrap();
        assert_eq!(activity[0].action, ActivityAction::Purged);
        assert_eq!(activity[0].file_id, None);
    }

    #[tokio::test]
    async fn test_full_text_query_and_relevance_order() {
        let store = store();
        let mut report = draft("/docs/tax-report.pdf", "h1", 1);
        report.content_text = Some("annual tax return for 2024".to_string());
        store.upsert_record(&report).await.unwrap();
        store
            .upsert_record(&draft("/music/song.mp3", "h2", 1))
            .await
            .unwrap();

        let page = store
            .list_filtered(&ListCriteria {
                query: Some("tax".to_string()),
                order: SortField::Relevance,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].record.path, "/docs/tax-report.pdf");
        assert!(page.items[0].score.is_some());

        let odd = store
            .list_filtered(&ListCriteria {
                query: Some("tax\" OR (".to_string()),
                ..Default::default()
            })
            .await;
        assert!(odd.is_ok());
    }

    #[tokio::test]
    async fn test_pagination_cursor() {
        let store = store();
        for i in 0..5 {
            store
                .upsert_record(&draft(&format!("/f{i}"), &format!("h{i}"), i))
                .await
                .unwrap();
        }
        let first = store
            .list_filtered(&ListCriteria {
                limit: 2,
                order: SortField::Size,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = store
            .list_filtered(&ListCriteria {
                limit: 2,
                cursor: Some("4".to_string()),
                order: SortField::Size,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.next_cursor, None);
    }

    #[tokio::test]
    async fn test_duplicate_candidates_respect_scope() {
        let store = store();
        store.upsert_record(&draft("/a", "same", 100)).await.unwrap();
        store.upsert_record(&draft("/b", "same", 150)).await.unwrap();
        store.upsert_record(&draft("/c", "other", 5)).await.unwrap();
        let all = store
            .duplicate_candidates(&DuplicateScan::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let large = store
            .duplicate_candidates(&DuplicateScan {
                min_size: Some(120),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(large.is_empty());

        let flagged = store
            .list_filtered(&ListCriteria {
                has_duplicates: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(flagged.total, 2);
    }

    #[tokio::test]
    async fn test_vectors_and_missing_embeddings() {
        let store = store();
        let mut with_text = draft("/a.txt", "h1", 1);
        with_text.content_text = Some("hello".to_string());
        let a = store.upsert_record(&with_text).await.unwrap().id;
        let mut other = draft("/b.txt", "h2", 1);
        other.content_preview = Some("preview".to_string());
        let b = store.upsert_record(&other).await.unwrap().id;
        store.upsert_record(&draft("/c.bin", "h3", 1)).await.unwrap();

        assert_eq!(store.files_missing_embeddings(10).await.unwrap().len(), 2);

        store.upsert_embedding(&a, &[1.0, 0.0, 0.0], "p/m").await.unwrap();
        store.upsert_embedding(&b, &[0.0, 1.0, 0.0], "p/m").await.unwrap();
        let err = store.upsert_embedding(&a, &[1.0], "p/m").await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let hits = store.vector_search(&[0.9, 0.1, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].id, a);
        let similar = store.similar_to(&a, 5).await.unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, b);

        let stats = store.embedding_stats().await.unwrap();
        assert_eq!(stats.total_embeddings, 2);
        assert_eq!(stats.files_needing_embeddings, 0);
        assert_eq!(stats.by_model.get("p/m"), Some(&2));
        let record = store.get_by_id(&a).await.unwrap();
        assert_eq!(record.embedding_model.as_deref(), Some("p/m"));
    }

    #[tokio::test]
    async fn test_verify_writes_activity() {
        let store = store();
        let id = store.upsert_record(&draft("/a", "h", 1)).await.unwrap().id;
        let record = store
            .update_fields(&id, &FieldUpdate::verified(Utc::now()))
            .await
            .unwrap();
        assert!(record.verified_at.is_some());
        let actions: Vec<ActivityAction> = store
            .recent_activity(10)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(
            actions,
            vec![ActivityAction::Verified, ActivityAction::Registered]
        );
    }
}
