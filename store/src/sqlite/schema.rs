use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    path TEXT NOT NULL,
    filename TEXT NOT NULL,
    extension TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT,
    is_directory INTEGER NOT NULL DEFAULT 0,
    source_file_id TEXT,
    created_at TEXT,
    modified_at TEXT,
    indexed_at TEXT NOT NULL,
    verified_at TEXT,
    content_indexed_at TEXT,
    content_hash TEXT NOT NULL CHECK (content_hash <> ''),
    partial_hash TEXT,
    content_text TEXT,
    content_preview TEXT,
    category TEXT,
    subcategory TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    UNIQUE(source, path)
);

CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash);
CREATE INDEX IF NOT EXISTS idx_files_source ON files(source);
CREATE INDEX IF NOT EXISTS idx_files_category ON files(category);
CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);
CREATE INDEX IF NOT EXISTS idx_files_modified_at ON files(modified_at);
CREATE INDEX IF NOT EXISTS idx_files_indexed_at ON files(indexed_at);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_tags (
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    tagged_at TEXT NOT NULL,
    PRIMARY KEY (file_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_file_tags_tag ON file_tags(tag_id);

CREATE TABLE IF NOT EXISTS file_embeddings (
    file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
    model TEXT NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_activity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER REFERENCES files(id) ON DELETE SET NULL,
    source TEXT NOT NULL,
    path TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT,
    performed_at TEXT NOT NULL,
    performed_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_activity_file ON file_activity(file_id);

CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    path,
    filename,
    content_text,
    content='files',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS files_fts_insert AFTER INSERT ON files BEGIN
    INSERT INTO files_fts(rowid, path, filename, content_text)
    VALUES (new.id, new.path, new.filename, new.content_text);
END;

CREATE TRIGGER IF NOT EXISTS files_fts_delete AFTER DELETE ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, path, filename, content_text)
    VALUES ('delete', old.id, old.path, old.filename, old.content_text);
END;

CREATE TRIGGER IF NOT EXISTS files_fts_update AFTER UPDATE ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, path, filename, content_text)
    VALUES ('delete', old.id, old.path, old.filename, old.content_text);
    INSERT INTO files_fts(rowid, path, filename, content_text)
    VALUES (new.id, new.path, new.filename, new.content_text);
END;
"#;

pub(crate) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    conn.execute_batch(SCHEMA)
}
