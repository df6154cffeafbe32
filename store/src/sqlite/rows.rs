use crate::model::Activity;
use crate::model::ActivityAction;
use crate::model::FileRecord;
use crate::model::FileStatus;
use crate::model::Tag;
use crate::model::file_key;
use rusqlite::Row;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSql;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;

/// Columns read by `record_from_row`, in order. Callers append their own
/// trailing columns (the FTS rank) after these.
pub(crate) const FILE_COLUMNS: &str = "f.id, f.source, f.path, f.filename, f.extension, f.size, \
    f.mime_type, f.is_directory, f.source_file_id, f.created_at, f.modified_at, f.indexed_at, \
    f.verified_at, f.content_indexed_at, f.content_hash, f.partial_hash, f.content_text, \
    f.content_preview, f.category, f.subcategory, f.status, e.model, e.created_at";

pub(crate) const FILE_COLUMN_COUNT: usize = 23;

pub(crate) const FILES_FROM: &str = "files f LEFT JOIN file_embeddings e ON e.file_id = f.id";

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let id: i64 = row.get(0)?;
    let source: String = row.get(1)?;
    let path: String = row.get(2)?;
    let size: i64 = row.get(5)?;
    Ok(FileRecord {
        id: id.to_string(),
        key: file_key(&source, &path),
        source,
        path,
        filename: row.get(3)?,
        extension: row.get(4)?,
        size: u64::try_from(size).unwrap_or_default(),
        mime_type: row.get(6)?,
        is_directory: row.get(7)?,
        source_file_id: row.get(8)?,
        created_at: row.get(9)?,
        modified_at: row.get(10)?,
        indexed_at: row.get(11)?,
        verified_at: row.get(12)?,
        content_indexed_at: row.get(13)?,
        content_hash: row.get(14)?,
        partial_hash: row.get(15)?,
        content_text: row.get(16)?,
        content_preview: row.get(17)?,
        category: row.get(18)?,
        subcategory: row.get(19)?,
        status: row.get(20)?,
        embedding_model: row.get(21)?,
        embedding_at: row.get(22)?,
    })
}

pub(crate) fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let id: i64 = row.get(0)?;
    let usage_count: i64 = row.get(2)?;
    Ok(Tag {
        id: id.to_string(),
        name: row.get(1)?,
        usage_count: u64::try_from(usage_count).unwrap_or_default(),
        created_at: row.get(3)?,
    })
}

pub(crate) fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let id: i64 = row.get(0)?;
    let file_id: Option<i64> = row.get(1)?;
    Ok(Activity {
        id: id.to_string(),
        file_id: file_id.map(|id| id.to_string()),
        source: row.get(2)?,
        path: row.get(3)?,
        action: row.get(4)?,
        details: row.get(5)?,
        performed_at: row.get(6)?,
        performed_by: row.get(7)?,
    })
}

pub(crate) fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FileStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

impl ToSql for ActivityAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ActivityAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}
