//! Per-job ingestion pipeline.
//!
//! `run_job` is the single place that converts pipeline errors into
//! document state transitions. `process_job` drives the pipeline itself
//! and rolls back persisted chunks and appended vector slots on failure,
//! so a failed document leaves no partial state behind: on success the
//! embedded count always equals the chunk count.

use chrono::{DateTime, Utc};
use docrag_cache::query_user_prefix;
use docrag_core::{ChunkError, DocumentRecord, Error, ExtractError, IngestError};
use docrag_embed::embed_in_batches;
use tracing::{debug, error, info, warn};

use crate::{IngestContext, IngestJob};

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Pipeline finished; document is `completed`
    Completed(IngestReport),
    /// Document was not pending or the job id did not match
    Skipped,
    /// Pipeline failed; document is `failed` with the message
    Failed(String),
}

/// Success counters for one ingested document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub document_id: i64,
    pub chunks_created: usize,
    pub vectors_indexed: usize,
}

/// Outer job loop body: drive the pipeline, convert the result into a
/// document state transition, and invalidate the owner's cached queries.
/// Never propagates an error.
pub async fn run_job(ctx: &IngestContext, job: &IngestJob, worker_id: usize) -> JobOutcome {
    debug!("worker {} picked up document {}", worker_id, job.document_id);

    let claimed = match ctx
        .store
        .try_begin_processing(job.document_id, &job.job_id)
        .await
    {
        Ok(Some(doc)) => doc,
        Ok(None) => {
            debug!(
                "document {} not pending or job id mismatch, skipping",
                job.document_id
            );
            return JobOutcome::Skipped;
        }
        Err(e) => {
            error!("failed to claim document {}: {e}", job.document_id);
            return JobOutcome::Failed(e.to_string());
        }
    };

    let owner_id = claimed.owner_id;
    match process_job(ctx, &claimed).await {
        Ok(report) => {
            // Invalidation happens-before the completed transition: a search
            // issued after the caller sees `completed` cannot be stale.
            ctx.cache.delete_prefix(&query_user_prefix(owner_id)).await;

            if let Err(e) = ctx.store.mark_completed(claimed.id).await {
                error!("document {} ingested but completion failed: {e}", claimed.id);
                return JobOutcome::Failed(e.to_string());
            }
            info!(
                "document {} completed: {} chunks, {} vectors",
                claimed.id, report.chunks_created, report.vectors_indexed
            );
            JobOutcome::Completed(report)
        }
        Err(e) => {
            let message = e.to_string();
            error!("document {} ingestion failed: {message}", claimed.id);
            ctx.cache.delete_prefix(&query_user_prefix(owner_id)).await;
            if let Err(mark_err) = ctx.store.mark_failed(claimed.id, &message).await {
                error!("failed to record failure for document {}: {mark_err}", claimed.id);
            }
            JobOutcome::Failed(message)
        }
    }
}

/// The pipeline proper, for a document already claimed as `processing`.
pub async fn process_job(
    ctx: &IngestContext,
    doc: &DocumentRecord,
) -> Result<IngestReport, IngestError> {
    // Retry path: a re-submitted document sheds its previous chunks and
    // their vector slots before processing restarts.
    let prior = ctx.store.delete_chunks_for_document(doc.id).await?;
    if !prior.is_empty() {
        info!(
            "document {} re-submitted, clearing {} prior chunks",
            doc.id,
            prior.len()
        );
        tombstone_and_save(ctx, &prior).await?;
    }

    // Extract.
    let segments = ctx
        .extractors
        .extract(std::path::Path::new(&doc.file_path), &doc.mime_type)
        .await
        .map_err(|e| match e {
            ExtractError::Empty => IngestError::ExtractionEmpty,
            other => IngestError::ExtractionFailed(other.to_string()),
        })?;
    if segments.is_empty() {
        return Err(IngestError::ExtractionEmpty);
    }

    // Chunk.
    let pieces = ctx.chunker.chunk_document(&segments).map_err(|e| match e {
        ChunkError::Empty => IngestError::ExtractionEmpty,
        other => IngestError::ExtractionFailed(other.to_string()),
    })?;

    // Persist chunks, not yet embedded.
    let chunk_ids = ctx.store.insert_chunks(doc.id, &pieces).await?;

    // Embed in configured batches.
    let texts: Vec<&str> = pieces.iter().map(|p| p.content.as_str()).collect();
    let vectors = match embed_in_batches(
        ctx.embedder.as_ref(),
        &texts,
        ctx.embedding_batch_size,
    )
    .await
    {
        Ok(vectors) => vectors,
        Err(e) => {
            rollback_chunks(ctx, doc.id).await;
            return Err(e.into());
        }
    };

    // Append to the index and persist atomically, serialized across
    // workers on this host.
    let appended = {
        let _guard = ctx.save_mutex.lock().await;
        let mut index = ctx.index.write().await;
        match index
            .append(&vectors, &chunk_ids)
            .and_then(|seqs| index.save().map(|()| seqs))
        {
            Ok(seqs) => seqs,
            Err(e) => {
                drop(index);
                rollback_chunks(ctx, doc.id).await;
                return Err(e.into());
            }
        }
    };

    // Flip embedding flags only after the vectors are durable.
    if let Err(e) = ctx
        .store
        .mark_chunks_embedded(&chunk_ids, ctx.embedder.model_name())
        .await
    {
        warn!("rolling back document {} after flag update failure", doc.id);
        if let Err(rb) = tombstone_and_save(ctx, &chunk_ids).await {
            error!("tombstone rollback for document {} failed: {rb}", doc.id);
        }
        rollback_chunks(ctx, doc.id).await;
        return Err(e.into());
    }

    debug_assert_eq!(appended.len(), chunk_ids.len());
    Ok(IngestReport {
        document_id: doc.id,
        chunks_created: chunk_ids.len(),
        vectors_indexed: appended.len(),
    })
}

/// Delete a failed document's chunk rows; best effort.
async fn rollback_chunks(ctx: &IngestContext, document_id: i64) {
    match ctx.store.delete_chunks_for_document(document_id).await {
        Ok(removed) if !removed.is_empty() => {
            debug!("rolled back {} chunks for document {}", removed.len(), document_id);
        }
        Ok(_) => {}
        Err(e) => error!("chunk rollback for document {} failed: {e}", document_id),
    }
}

/// Tombstone vector slots for the given chunk ids and persist, compacting
/// when the tombstone ratio crosses its threshold.
async fn tombstone_and_save(ctx: &IngestContext, chunk_ids: &[i64]) -> Result<(), IngestError> {
    let _guard = ctx.save_mutex.lock().await;
    let mut index = ctx.index.write().await;
    let marked = index.remove(chunk_ids);
    if marked == 0 {
        return Ok(());
    }
    if index.maybe_compact()?.is_none() {
        index.save()?;
    }
    Ok(())
}

/// Delete a document entirely: store row, chunks, and vector slots.
pub async fn delete_document(ctx: &IngestContext, document_id: i64) -> Result<usize, Error> {
    let doc = ctx
        .store
        .get_document(document_id)
        .await?
        .ok_or_else(|| docrag_core::StoreError::NotFound(format!("document {document_id}")))?;

    let chunk_ids = ctx.store.delete_document(document_id).await?;
    tombstone_and_save(ctx, &chunk_ids).await?;
    ctx.cache.delete_prefix(&query_user_prefix(doc.owner_id)).await;

    info!(
        "deleted document {} ({} chunks tombstoned)",
        document_id,
        chunk_ids.len()
    );
    Ok(chunk_ids.len())
}

/// Maintenance: remove failed documents created before `cutoff`.
pub async fn purge_stale_failed(
    ctx: &IngestContext,
    cutoff: DateTime<Utc>,
) -> Result<usize, Error> {
    let stale = ctx.store.stale_failed_documents(cutoff).await?;
    let mut purged = 0;
    for id in stale {
        match delete_document(ctx, id).await {
            Ok(_) => purged += 1,
            Err(e) => warn!("failed to purge document {id}: {e}"),
        }
    }
    if purged > 0 {
        info!("purged {} stale failed documents", purged);
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IngestWorkerPool, WorkerConfig};
    use async_trait::async_trait;
    use docrag_cache::{query_key, Cache};
    use docrag_chunker::{ChunkerConfig, TokenChunker};
    use docrag_core::{DocumentStatus, EmbedError, Embedder};
    use docrag_extract::{ExtractorRegistry, PdfExtractor, TextExtractor};
    use docrag_index::FlatIndex;
    use docrag_store::{MetadataStore, NewDocument};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::{Mutex, RwLock};

    const DIM: usize = 8;

    struct MockEmbedder {
        fail: AtomicBool,
    }

    impl MockEmbedder {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        fn model_name(&self) -> &str {
            "mock-embedder"
        }

        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbedError::Unavailable("mock outage".to_string()));
            }
            Ok(texts
                .iter()
                .map(|t| (0..DIM).map(|i| (t.len() + i) as f32).collect())
                .collect())
        }
    }

    struct Fixture {
        _dir: TempDir,
        ctx: Arc<IngestContext>,
        embedder: Arc<MockEmbedder>,
        user: i64,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).await.unwrap();
        let index = Arc::new(RwLock::new(
            FlatIndex::open(dir.path(), "main", DIM, 0.2).unwrap(),
        ));

        let mut registry = ExtractorRegistry::new();
        registry.register("text", TextExtractor::new());
        registry.register("pdf", PdfExtractor::new());

        let chunker = TokenChunker::new(ChunkerConfig {
            chunk_size: 64,
            chunk_overlap: 8,
            min_chunk_size: 2,
        })
        .unwrap();

        let embedder = Arc::new(MockEmbedder::new());
        let user_store = store.clone();
        let ctx = Arc::new(IngestContext {
            store,
            index,
            extractors: Arc::new(registry),
            chunker: Arc::new(chunker),
            embedder: Arc::clone(&embedder) as Arc<dyn Embedder>,
            cache: Arc::new(Cache::new()),
            save_mutex: Arc::new(Mutex::new(())),
            embedding_batch_size: 10,
        });
        let user = user_store.ensure_user("alice").await.unwrap();

        Fixture {
            _dir: dir,
            ctx,
            embedder,
            user,
        }
    }

    async fn upload(f: &Fixture, name: &str, mime: &str, content: &[u8]) -> DocumentRecord {
        let path = f._dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        f.ctx
            .store
            .create_document(&NewDocument {
                owner_id: f.user,
                filename: name.to_string(),
                original_filename: name.to_string(),
                file_path: path.to_string_lossy().into_owned(),
                file_size: content.len() as i64,
                mime_type: mime.to_string(),
                job_id: format!("job-{name}"),
            })
            .await
            .unwrap()
    }

    fn job_for(doc: &DocumentRecord) -> IngestJob {
        IngestJob {
            document_id: doc.id,
            job_id: doc.job_id.clone(),
        }
    }

    #[tokio::test]
    async fn test_ingest_text_document_completes() {
        let f = fixture().await;
        let doc = upload(
            &f,
            "notes.txt",
            "text/plain",
            b"First sentence of the document. Second sentence follows. Third one closes.",
        )
        .await;

        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        let JobOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };

        let done = f.ctx.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert!(done.processed_at.is_some());
        assert!(done.error_message.is_none());

        // Every chunk of a completed document has an embedding, and the
        // index holds exactly one live slot per chunk.
        let chunks = f.ctx.store.chunks_for_document(doc.id).await.unwrap();
        assert_eq!(chunks.len(), report.chunks_created);
        assert!(chunks.iter().all(|c| c.has_embedding));
        assert!(chunks
            .iter()
            .all(|c| c.embedding_model.as_deref() == Some("mock-embedder")));
        assert_eq!(f.ctx.index.read().await.live(), chunks.len());
        assert_eq!(report.vectors_indexed, report.chunks_created);
    }

    #[tokio::test]
    async fn test_unreadable_pdf_fails_cleanly() {
        let f = fixture().await;
        let doc = upload(&f, "broken.pdf", "application/pdf", b"not really a pdf").await;

        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        let failed = f.ctx.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert!(failed
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty()));

        // No partial chunks, no vector slots.
        assert!(f.ctx.store.chunks_for_document(doc.id).await.unwrap().is_empty());
        assert_eq!(f.ctx.index.read().await.total(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_mime_fails() {
        let f = fixture().await;
        let doc = upload(&f, "clip.mp4", "video/mp4", b"...").await;

        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        let failed = f.ctx.store.get_document(doc.id).await.unwrap().unwrap();
        assert!(failed
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("video/mp4")));
    }

    #[tokio::test]
    async fn test_empty_file_is_extraction_empty() {
        let f = fixture().await;
        let doc = upload(&f, "blank.txt", "text/plain", b"   \n  ").await;

        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        let JobOutcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("no indexable text"));
    }

    #[tokio::test]
    async fn test_job_id_mismatch_is_noop() {
        let f = fixture().await;
        let doc = upload(&f, "notes.txt", "text/plain", b"Some text.").await;

        let outcome = run_job(
            &f.ctx,
            &IngestJob {
                document_id: doc.id,
                job_id: "wrong-job".to_string(),
            },
            0,
        )
        .await;
        assert_eq!(outcome, JobOutcome::Skipped);

        let unchanged = f.ctx.store.get_document(doc.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn test_embedding_failure_rolls_back_chunks() {
        let f = fixture().await;
        let doc = upload(&f, "notes.txt", "text/plain", b"Alpha sentence. Beta sentence.").await;

        f.embedder.fail.store(true, Ordering::SeqCst);
        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        // Rolled back: no chunks survive a failed ingestion.
        assert!(f.ctx.store.chunks_for_document(doc.id).await.unwrap().is_empty());
        assert_eq!(f.ctx.index.read().await.total(), 0);

        // Operator retry: back to pending, then a clean run completes.
        f.embedder.fail.store(false, Ordering::SeqCst);
        assert!(f.ctx.store.reset_for_retry(doc.id).await.unwrap());
        let outcome = run_job(&f.ctx, &job_for(&doc), 0).await;
        assert!(matches!(outcome, JobOutcome::Completed(_)));

        let chunks = f.ctx.store.chunks_for_document(doc.id).await.unwrap();
        assert!(!chunks.is_empty());
        assert_eq!(f.ctx.index.read().await.live(), chunks.len());
    }

    #[tokio::test]
    async fn test_reingest_and_delete_leaves_counts_identical() {
        let f = fixture().await;
        let content: &[u8] = b"Repeatable sentence one. Repeatable sentence two.";

        let doc1 = upload(&f, "copy1.txt", "text/plain", content).await;
        let JobOutcome::Completed(report1) = run_job(&f.ctx, &job_for(&doc1), 0).await else {
            panic!("first ingest failed");
        };

        let doc2 = upload(&f, "copy2.txt", "text/plain", content).await;
        let JobOutcome::Completed(report2) = run_job(&f.ctx, &job_for(&doc2), 0).await else {
            panic!("second ingest failed");
        };
        assert_eq!(report1.chunks_created, report2.chunks_created);

        // Deleting the first document tombstones its slots; live count then
        // equals a single ingestion.
        delete_document(&f.ctx, doc1.id).await.unwrap();
        assert_eq!(f.ctx.index.read().await.live(), report2.chunks_created);
        assert!(f.ctx.store.get_document(doc1.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_invalidates_owner_query_cache() {
        let f = fixture().await;
        let key = query_key(f.user, "somehash");
        f.ctx
            .cache
            .set(&key, b"cached".to_vec(), std::time::Duration::from_secs(600))
            .await;

        let doc = upload(&f, "notes.txt", "text/plain", b"Fresh content arrives.").await;
        run_job(&f.ctx, &job_for(&doc), 0).await;

        assert!(f.ctx.cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_worker_pool_drains_queue() {
        let f = fixture().await;
        let doc = upload(&f, "pooled.txt", "text/plain", b"Pool processed sentence.").await;

        let pool = IngestWorkerPool::start(
            Arc::clone(&f.ctx),
            &WorkerConfig {
                pool_size: 2,
                queue_capacity: 8,
            },
        );
        assert!(pool.submit(job_for(&doc)).await);

        // Poll until the worker completes the document.
        let mut status = DocumentStatus::Pending;
        for _ in 0..100 {
            status = f
                .ctx
                .store
                .get_document(doc.id)
                .await
                .unwrap()
                .unwrap()
                .status;
            if status == DocumentStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, DocumentStatus::Completed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_recover_pending_enqueues_jobs() {
        let f = fixture().await;
        let doc = upload(&f, "left-over.txt", "text/plain", b"Survived a restart.").await;

        let pool = IngestWorkerPool::start(Arc::clone(&f.ctx), &WorkerConfig::default());
        let recovered = pool.recover_pending(&f.ctx.store).await.unwrap();
        assert_eq!(recovered, 1);

        let mut status = DocumentStatus::Pending;
        for _ in 0..100 {
            status = f
                .ctx
                .store
                .get_document(doc.id)
                .await
                .unwrap()
                .unwrap()
                .status;
            if status == DocumentStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(status, DocumentStatus::Completed);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_purge_stale_failed() {
        let f = fixture().await;
        let doc = upload(&f, "broken.pdf", "application/pdf", b"garbage").await;
        run_job(&f.ctx, &job_for(&doc), 0).await;

        let purged = purge_stale_failed(&f.ctx, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(f.ctx.store.get_document(doc.id).await.unwrap().is_none());
    }
}
