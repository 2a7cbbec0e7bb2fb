//! Schema migrations.
//!
//! Statements are idempotent and run at startup. The FTS5 table is an
//! external-content index over `chunks.content` kept consistent by triggers,
//! so the lexical index rides the normal chunk write path with no separate
//! build step.

pub const MIGRATIONS: &[&str] = &[
    // users
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    )",
    // documents
    "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL REFERENCES users(id),
        filename TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        file_path TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        mime_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        job_id TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        processed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
    // chunks
    "CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        page_number INTEGER,
        content TEXT NOT NULL,
        token_count INTEGER NOT NULL,
        has_embedding INTEGER NOT NULL DEFAULT 0,
        embedding_model TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(document_id, chunk_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
    // full-text index over chunk content
    "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
        content,
        content='chunks',
        content_rowid='id',
        tokenize='porter unicode61'
    )",
    "CREATE TRIGGER IF NOT EXISTS chunks_fts_ai AFTER INSERT ON chunks BEGIN
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
    END",
    "CREATE TRIGGER IF NOT EXISTS chunks_fts_ad AFTER DELETE ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content)
        VALUES ('delete', old.id, old.content);
    END",
    "CREATE TRIGGER IF NOT EXISTS chunks_fts_au AFTER UPDATE OF content ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content)
        VALUES ('delete', old.id, old.content);
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
    END",
    // append-only query log
    "CREATE TABLE IF NOT EXISTS query_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        query_id TEXT NOT NULL UNIQUE,
        user_id INTEGER NOT NULL REFERENCES users(id),
        query_text TEXT NOT NULL,
        k INTEGER NOT NULL DEFAULT 5,
        result_count INTEGER NOT NULL DEFAULT 0,
        results TEXT,
        response_time_ms REAL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_query_logs_user ON query_logs(user_id)",
];
