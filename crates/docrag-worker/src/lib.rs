//! # docrag-worker
//!
//! The ingestion side of docrag: a bounded job queue consumed by a pool of
//! workers, each driving extract -> chunk -> embed -> persist for one
//! document at a time and converting every failure into a document state
//! transition. No error escapes a job.
//!
//! Concurrency: documents ingest in parallel across workers; within one
//! document the pipeline is sequential. A host-local mutex serializes index
//! saves so concurrent workers cannot lose sidecar updates. Cache
//! invalidation for the owner happens before the document is marked
//! `completed`, so a search issued after the caller observes `completed`
//! never returns stale results.

mod worker;

use std::sync::Arc;

use docrag_cache::Cache;
use docrag_chunker::TokenChunker;
use docrag_core::{Embedder, Error};
use docrag_extract::ExtractorRegistry;
use docrag_index::FlatIndex;
use docrag_store::MetadataStore;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

pub use worker::{
    delete_document, process_job, purge_stale_failed, run_job, IngestReport, JobOutcome,
};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parallel ingestion workers
    pub pool_size: usize,
    /// Bounded queue depth; submits block when full
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            queue_capacity: 256,
        }
    }
}

/// One queued ingestion job.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document_id: i64,
    pub job_id: String,
}

/// Shared dependencies handed to every worker.
pub struct IngestContext {
    pub store: MetadataStore,
    pub index: Arc<RwLock<FlatIndex>>,
    pub extractors: Arc<ExtractorRegistry>,
    pub chunker: Arc<TokenChunker>,
    pub embedder: Arc<dyn Embedder>,
    pub cache: Arc<Cache>,
    /// Serializes save() across workers on this host
    pub save_mutex: Arc<Mutex<()>>,
    /// Texts per embedding request
    pub embedding_batch_size: usize,
}

/// Bounded ingestion queue with its worker pool.
pub struct IngestWorkerPool {
    tx: mpsc::Sender<IngestJob>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl IngestWorkerPool {
    /// Spawn `config.pool_size` workers draining a shared queue.
    pub fn start(ctx: Arc<IngestContext>, config: &WorkerConfig) -> Self {
        let (tx, rx) = mpsc::channel::<IngestJob>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(config.pool_size);
        for worker_id in 0..config.pool_size.max(1) {
            let ctx = Arc::clone(&ctx);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        break;
                    };
                    worker::run_job(&ctx, &job, worker_id).await;
                }
            }));
        }

        info!("started {} ingestion workers", config.pool_size.max(1));
        Self { tx, handles }
    }

    /// Enqueue a job, waiting when the queue is full. Returns false when
    /// the pool has shut down.
    pub async fn submit(&self, job: IngestJob) -> bool {
        self.tx.send(job).await.is_ok()
    }

    /// Re-enqueue every pending document found in the store. Called at
    /// startup so jobs survive a process restart (the pending rows are the
    /// durable queue).
    pub async fn recover_pending(&self, store: &MetadataStore) -> Result<usize, Error> {
        let pending = store
            .documents_with_status(docrag_core::DocumentStatus::Pending)
            .await?;
        let mut recovered = 0;
        for doc in pending {
            let job = IngestJob {
                document_id: doc.id,
                job_id: doc.job_id.clone(),
            };
            if self.submit(job).await {
                recovered += 1;
            } else {
                warn!("queue closed while recovering document {}", doc.id);
                break;
            }
        }
        if recovered > 0 {
            info!("recovered {} pending documents into the queue", recovered);
        }
        Ok(recovered)
    }

    /// Close the queue and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
