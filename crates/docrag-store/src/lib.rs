//! # docrag-store
//!
//! Relational metadata store for docrag, backed by SQLite through sqlx.
//!
//! Holds documents, chunks, and the append-only query log, and provides the
//! lexical half of hybrid retrieval: an FTS5 external-content index over
//! chunk text (porter-stemmed, unicode-tokenized) scored by BM25 and kept
//! consistent by triggers on the chunk table. Document lifecycle transitions
//! are serialized by conditional UPDATEs, so two workers can never claim the
//! same job.

mod schema;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docrag_core::{ChunkPiece, ChunkRecord, DocumentRecord, DocumentStatus, QueryLogEntry, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

/// A chunk joined with its document's metadata, for result enrichment.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_filename: String,
    pub content: String,
    pub chunk_index: i64,
    pub page_number: Option<i64>,
}

/// A lexical search match with its BM25-derived score (higher better).
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_filename: String,
    pub content: String,
    pub chunk_index: i64,
    pub page_number: Option<i64>,
    pub score: f64,
}

/// Fields for creating a document row at upload time.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub job_id: String,
}

/// SQLite-backed metadata store.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

fn q(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn ins(e: sqlx::Error) -> StoreError {
    StoreError::Insert(e.to_string())
}

impl MetadataStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Init(format!("create db dir: {e}")))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::Init(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Init(e.to_string()))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in schema::MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Init(format!("migration failed: {e}")))?;
        }
        info!("store migrations applied");
        Ok(())
    }

    /// The underlying pool, for tests and maintenance tooling.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Find or create a user row, returning its id.
    pub async fn ensure_user(&self, username: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO users (username, created_at) VALUES (?, ?)")
            .bind(username)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(ins)?;

        let row = sqlx::query("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(q)?;
        row.try_get("id").map_err(q)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Create a document in state `pending`.
    pub async fn create_document(&self, new: &NewDocument) -> Result<DocumentRecord, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO documents
                 (owner_id, filename, original_filename, file_path, file_size,
                  mime_type, status, job_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(new.owner_id)
        .bind(&new.filename)
        .bind(&new.original_filename)
        .bind(&new.file_path)
        .bind(new.file_size)
        .bind(&new.mime_type)
        .bind(&new.job_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ins)?;

        let id = result.last_insert_rowid();
        self.get_document(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("document {id} just inserted")))
    }

    pub async fn get_document(&self, id: i64) -> Result<Option<DocumentRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(q)?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Documents currently in the given lifecycle state.
    pub async fn documents_with_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM documents WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(q)?;
        rows.iter().map(document_from_row).collect()
    }

    /// Atomically claim a pending document for processing.
    ///
    /// Returns `None` when the document is not pending or the job id does
    /// not match — the caller must treat that as a no-op.
    pub async fn try_begin_processing(
        &self,
        id: i64,
        job_id: &str,
    ) -> Result<Option<DocumentRecord>, StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'processing', error_message = NULL
             WHERE id = ? AND job_id = ? AND status = 'pending'",
        )
        .bind(id)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(q)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_document(id).await
    }

    pub async fn mark_completed(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE documents
             SET status = 'completed', processed_at = ?, error_message = NULL
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE documents SET status = 'failed', error_message = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(q)?;
        Ok(())
    }

    /// Operator retry path: `failed -> pending`.
    pub async fn reset_for_retry(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'pending', error_message = NULL
             WHERE id = ? AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(q)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a document, cascading to its chunks. Returns the ids of the
    /// removed chunks so the caller can tombstone their vector slots.
    pub async fn delete_document(&self, id: i64) -> Result<Vec<i64>, StoreError> {
        let chunk_ids = self.chunk_ids_for_document(id).await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("document {id}")));
        }
        Ok(chunk_ids)
    }

    /// Failed documents created before `cutoff` (maintenance purge input).
    pub async fn stale_failed_documents(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            "SELECT id FROM documents WHERE status = 'failed' AND created_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;
        rows.iter().map(|r| r.try_get("id").map_err(q)).collect()
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Persist a document's chunks in order, `has_embedding = false`, in one
    /// transaction. Returns the assigned chunk ids in chunk order.
    pub async fn insert_chunks(
        &self,
        document_id: i64,
        pieces: &[ChunkPiece],
    ) -> Result<Vec<i64>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(ins)?;
        let mut ids = Vec::with_capacity(pieces.len());

        for piece in pieces {
            let result = sqlx::query(
                "INSERT INTO chunks
                     (document_id, chunk_index, page_number, content, token_count,
                      has_embedding, created_at)
                 VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(document_id)
            .bind(piece.chunk_index as i64)
            .bind(piece.page_number.map(i64::from))
            .bind(&piece.content)
            .bind(piece.token_count as i64)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(ins)?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await.map_err(ins)?;
        debug!("persisted {} chunks for document {}", ids.len(), document_id);
        Ok(ids)
    }

    /// Flip `has_embedding` and record the model tag for the given chunks.
    pub async fn mark_chunks_embedded(
        &self,
        chunk_ids: &[i64],
        model: &str,
    ) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let placeholders = placeholders(chunk_ids.len());
        let sql = format!(
            "UPDATE chunks SET has_embedding = 1, embedding_model = ? WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(model);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await.map_err(q)?;
        Ok(())
    }

    pub async fn chunks_for_document(
        &self,
        document_id: i64,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(q)?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn chunk_ids_for_document(&self, document_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT id FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(q)?;
        rows.iter().map(|r| r.try_get("id").map_err(q)).collect()
    }

    /// Remove a document's chunks (retry path). Returns their ids so the
    /// caller can tombstone the corresponding vector slots.
    pub async fn delete_chunks_for_document(
        &self,
        document_id: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = self.chunk_ids_for_document(document_id).await?;
        if ids.is_empty() {
            return Ok(ids);
        }
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;
        Ok(ids)
    }

    /// Resolve chunk ids to enriched hits, keeping only chunks owned by
    /// `owner_id`. Input order is preserved for the survivors.
    pub async fn owned_chunk_hits(
        &self,
        chunk_ids: &[i64],
        owner_id: i64,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = placeholders(chunk_ids.len());
        let sql = format!(
            "SELECT c.id AS chunk_id, c.document_id, c.content, c.chunk_index,
                    c.page_number, d.original_filename
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.id IN ({placeholders}) AND d.owner_id = ?"
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.bind(owner_id).fetch_all(&self.pool).await.map_err(q)?;

        let mut by_id = std::collections::HashMap::new();
        for row in &rows {
            let hit = chunk_hit_from_row(row)?;
            by_id.insert(hit.chunk_id, hit);
        }
        Ok(chunk_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    // ========================================================================
    // Lexical search
    // ========================================================================

    /// BM25-ranked full-text search over chunk content, owner-filtered in
    /// SQL. Scores are in `[0, inf)`, higher better, and are not comparable
    /// across queries.
    pub async fn lexical_search(
        &self,
        query_text: &str,
        k: usize,
        owner_id: i64,
    ) -> Result<Vec<LexicalHit>, StoreError> {
        let Some(match_expr) = fts_match_expr(query_text) else {
            return Ok(vec![]);
        };

        let rows = sqlx::query(
            "SELECT c.id AS chunk_id, c.document_id, c.content, c.chunk_index,
                    c.page_number, d.original_filename,
                    -bm25(chunks_fts) AS score
             FROM chunks_fts
             JOIN chunks c ON c.id = chunks_fts.rowid
             JOIN documents d ON d.id = c.document_id
             WHERE chunks_fts MATCH ? AND d.owner_id = ?
             ORDER BY bm25(chunks_fts)
             LIMIT ?",
        )
        .bind(&match_expr)
        .bind(owner_id)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(q)?;

        rows.iter()
            .map(|row| {
                let hit = chunk_hit_from_row(row)?;
                let score: f64 = row.try_get("score").map_err(q)?;
                Ok(LexicalHit {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    document_filename: hit.document_filename,
                    content: hit.content,
                    chunk_index: hit.chunk_index,
                    page_number: hit.page_number,
                    score: score.max(0.0),
                })
            })
            .collect()
    }

    // ========================================================================
    // Query log
    // ========================================================================

    /// Append one query log row. The log is never deleted by the core.
    pub async fn insert_query_log(&self, entry: &QueryLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO query_logs
                 (query_id, user_id, query_text, k, result_count, results,
                  response_time_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.query_id)
        .bind(entry.user_id)
        .bind(&entry.query_text)
        .bind(entry.k as i64)
        .bind(entry.result_count as i64)
        .bind(entry.results.to_string())
        .bind(entry.response_time_ms)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(ins)?;
        Ok(())
    }

    /// Query log rows recorded for a user.
    pub async fn query_log_count(&self, user_id: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM query_logs WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(q)?;
        row.try_get("n").map_err(q)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Build an FTS5 MATCH expression from raw user text.
///
/// Raw text must never be parsed as FTS5 query syntax, so terms are reduced
/// to alphanumeric runs, quoted, and OR-joined.
fn fts_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord, StoreError> {
    let status_str: String = row.try_get("status").map_err(q)?;
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Query(format!("unknown document status: {status_str}")))?;
    Ok(DocumentRecord {
        id: row.try_get("id").map_err(q)?,
        owner_id: row.try_get("owner_id").map_err(q)?,
        filename: row.try_get("filename").map_err(q)?,
        original_filename: row.try_get("original_filename").map_err(q)?,
        file_path: row.try_get("file_path").map_err(q)?,
        file_size: row.try_get("file_size").map_err(q)?,
        mime_type: row.try_get("mime_type").map_err(q)?,
        status,
        error_message: row.try_get("error_message").map_err(q)?,
        job_id: row.try_get("job_id").map_err(q)?,
        created_at: row.try_get("created_at").map_err(q)?,
        processed_at: row.try_get("processed_at").map_err(q)?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<ChunkRecord, StoreError> {
    Ok(ChunkRecord {
        id: row.try_get("id").map_err(q)?,
        document_id: row.try_get("document_id").map_err(q)?,
        chunk_index: row.try_get("chunk_index").map_err(q)?,
        page_number: row.try_get("page_number").map_err(q)?,
        content: row.try_get("content").map_err(q)?,
        token_count: row.try_get("token_count").map_err(q)?,
        has_embedding: row.try_get("has_embedding").map_err(q)?,
        embedding_model: row.try_get("embedding_model").map_err(q)?,
        created_at: row.try_get("created_at").map_err(q)?,
    })
}

fn chunk_hit_from_row(row: &SqliteRow) -> Result<ChunkHit, StoreError> {
    Ok(ChunkHit {
        chunk_id: row.try_get("chunk_id").map_err(q)?,
        document_id: row.try_get("document_id").map_err(q)?,
        document_filename: row.try_get("original_filename").map_err(q)?,
        content: row.try_get("content").map_err(q)?,
        chunk_index: row.try_get("chunk_index").map_err(q)?,
        page_number: row.try_get("page_number").map_err(q)?,
    })
}
