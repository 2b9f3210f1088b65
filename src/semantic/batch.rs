//! Batch embedding orchestrator.
//!
//! Backfills missing vectors for every document, one page at a time:
//! - documents that already have a vector for the model are skipped
//! - each page is sent to the embedding client as a single request
//! - vectors are reshaped to the canonical width and upserted
//!
//! At most one job runs at a time. A second start fails immediately.
//! Cancellation is cooperative and is checked before every page and every
//! document, never during a request. Any failure stops the run; re-running
//! only picks up documents that still have no vector.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::SemanticSearchConfig;
use crate::documents::DocumentStore;
use crate::eid::Eid;
use crate::semantic::embeddings::{EmbeddingClient, EmbeddingError, ModelConfig};
use crate::semantic::index::VectorIndex;
use crate::semantic::normalize::{l2_norm, to_canonical};
use crate::semantic::preprocess::document_text;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("An embedding batch is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] EmbeddingError),

    #[error("Failed to start batch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchOptions {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    /// 1-based index of the page just finished
    pub page: usize,
    pub total_pages: usize,
}

pub type ProgressObserver = Arc<dyn Fn(BatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub success: bool,
    pub total_words: usize,
    pub processed: usize,
    pub failed: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BatchReport {
    /// Documents neither processed nor failed.
    pub fn remaining(&self) -> usize {
        self.total_words
            .saturating_sub(self.processed)
            .saturating_sub(self.failed)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStatus {
    pub running: bool,
    pub progress: Option<BatchProgress>,
    pub last_report: Option<BatchReport>,
}

/// Cancellation flag of one run.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Shared {
    running: AtomicBool,
    cancel: Mutex<Option<CancelToken>>,
    progress: Mutex<Option<BatchProgress>>,
    last_report: Mutex<Option<BatchReport>>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut cancel) = self.0.cancel.lock() {
            *cancel = None;
        }
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// A started batch job.
pub struct BatchHandle {
    thread: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Block until the job finishes.
    pub fn wait(self) -> BatchReport {
        match self.thread.join() {
            Ok(report) => report,
            Err(_) => BatchReport {
                outcome: BatchOutcome::Failed,
                success: false,
                total_words: 0,
                processed: 0,
                failed: 0,
                error: Some("batch thread panicked".to_string()),
                duration_ms: 0,
            },
        }
    }
}

pub struct BatchOrchestrator {
    documents: Arc<dyn DocumentStore>,
    index: Arc<VectorIndex>,
    client: Arc<dyn EmbeddingClient>,
    config: SemanticSearchConfig,
    base_path: PathBuf,
    shared: Arc<Shared>,
}

impl BatchOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        index: Arc<VectorIndex>,
        client: Arc<dyn EmbeddingClient>,
        config: SemanticSearchConfig,
        base_path: PathBuf,
    ) -> Self {
        Self {
            documents,
            index,
            client,
            config,
            base_path,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start a job on its own thread.
    ///
    /// Fails with `AlreadyRunning` while another job is active and with
    /// `Config` when no usable model is configured.
    pub fn start_batch(
        &self,
        options: BatchOptions,
        observer: Option<ProgressObserver>,
    ) -> Result<BatchHandle, BatchError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BatchError::AlreadyRunning);
        }
        let guard = RunningGuard(self.shared.clone());

        let model = ModelConfig::resolve(&self.config, options.model.as_deref(), &self.base_path)?;
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);

        let token = CancelToken::default();
        if let Ok(mut cancel) = self.shared.cancel.lock() {
            *cancel = Some(token.clone());
        }
        if let Ok(mut progress) = self.shared.progress.lock() {
            *progress = None;
        }

        let job = Job {
            documents: self.documents.clone(),
            index: self.index.clone(),
            client: self.client.clone(),
            model,
            batch_size,
            token,
            observer,
            shared: self.shared.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("embed-batch".to_string())
            .spawn(move || {
                let report = job.run();
                if let Ok(mut last) = job.shared.last_report.lock() {
                    *last = Some(report.clone());
                }
                drop(guard);
                report
            })?;

        Ok(BatchHandle { thread })
    }

    /// Run a job and wait for it.
    pub fn run_batch(
        &self,
        options: BatchOptions,
        observer: Option<ProgressObserver>,
    ) -> Result<BatchReport, BatchError> {
        Ok(self.start_batch(options, observer)?.wait())
    }

    /// Ask the running job to stop at its next checkpoint.
    ///
    /// Returns `false` when nothing is running. Safe to call repeatedly.
    pub fn cancel_batch(&self) -> bool {
        match self.shared.cancel.lock() {
            Ok(cancel) => match cancel.as_ref() {
                Some(token) => {
                    if !token.is_cancelled() {
                        log::info!("cancelling embedding batch");
                    }
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn status(&self) -> BatchStatus {
        BatchStatus {
            running: self.is_running(),
            progress: self.shared.progress.lock().ok().and_then(|p| *p),
            last_report: self
                .shared
                .last_report
                .lock()
                .ok()
                .and_then(|r| r.clone()),
        }
    }
}

struct Job {
    documents: Arc<dyn DocumentStore>,
    index: Arc<VectorIndex>,
    client: Arc<dyn EmbeddingClient>,
    model: ModelConfig,
    batch_size: usize,
    token: CancelToken,
    observer: Option<ProgressObserver>,
    shared: Arc<Shared>,
}

/// Counters of a run in progress.
struct Tally {
    started: Instant,
    total: usize,
    processed: usize,
    failed: usize,
}

impl Tally {
    fn finish(&self, outcome: BatchOutcome, error: Option<String>) -> BatchReport {
        BatchReport {
            outcome,
            success: outcome == BatchOutcome::Completed && self.failed == 0,
            total_words: self.total,
            processed: self.processed,
            failed: self.failed,
            error,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

impl Job {
    fn run(&self) -> BatchReport {
        let mut tally = Tally {
            started: Instant::now(),
            total: 0,
            processed: 0,
            failed: 0,
        };
        let model = &self.model.name;

        tally.total = match self.documents.count() {
            Ok(total) => total,
            Err(err) => {
                log::error!("embedding batch with '{model}' could not count documents: {err}");
                return tally.finish(BatchOutcome::Failed, Some(err.to_string()));
            }
        };

        if tally.total == 0 {
            log::info!("no documents to embed");
            return tally.finish(BatchOutcome::Completed, None);
        }

        let total_pages = tally.total.div_ceil(self.batch_size);
        log::info!(
            "embedding {} documents with '{model}' in {total_pages} pages of {}",
            tally.total,
            self.batch_size
        );

        for page in 0..total_pages {
            if self.token.is_cancelled() {
                return self.cancelled(&tally, page);
            }

            let offset = page * self.batch_size;
            let docs = match self.documents.get_page(offset, self.batch_size) {
                Ok(docs) => docs,
                Err(err) => {
                    log::error!(
                        "page {}: failed to load documents for '{model}' at offset {offset}: {err}",
                        page + 1
                    );
                    tally.failed += self.batch_size.min(tally.total - offset);
                    return tally.finish(BatchOutcome::Failed, Some(err.to_string()));
                }
            };

            let mut pending = vec![];
            for doc in docs {
                if self.token.is_cancelled() {
                    return self.cancelled(&tally, page);
                }
                if self.index.exists(&doc.id, model) {
                    tally.processed += 1;
                    continue;
                }
                match document_text(&doc) {
                    Some(text) => pending.push((doc.id, text)),
                    None => {
                        log::debug!("document {} has no text, skipping", doc.id);
                        tally.processed += 1;
                    }
                }
            }

            if let Err(err) = self.embed_page(&pending, page, &mut tally) {
                self.report_progress(&tally, page, total_pages);
                return tally.finish(BatchOutcome::Failed, Some(err));
            }

            self.report_progress(&tally, page, total_pages);
        }

        log::info!(
            "embedding batch completed: {} processed in {}ms",
            tally.processed,
            tally.started.elapsed().as_millis()
        );
        tally.finish(BatchOutcome::Completed, None)
    }

    /// Embed and store one page. On error the unstored rest of the page is
    /// counted as failed.
    fn embed_page(
        &self,
        pending: &[(Eid, String)],
        page: usize,
        tally: &mut Tally,
    ) -> Result<(), String> {
        if pending.is_empty() {
            return Ok(());
        }
        let model = &self.model.name;
        let ids = pending
            .iter()
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        // exists() reads false on a closed store
        if !self.index.is_available() {
            log::error!(
                "page {}: vector index unavailable, not embedding [{ids}] with '{model}'",
                page + 1
            );
            tally.failed += pending.len();
            return Err(crate::store::StoreError::Unavailable.to_string());
        }

        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self
            .client
            .generate(&texts, &self.model)
            .and_then(|vectors| check_vectors(pending, vectors));

        let vectors = match vectors {
            Ok(vectors) => vectors,
            Err(err) => {
                log::error!(
                    "page {}: embedding [{ids}] with '{model}' failed: {err}",
                    page + 1
                );
                tally.failed += pending.len();
                return Err(err.to_string());
            }
        };

        for (stored, ((id, _), vector)) in pending.iter().zip(vectors).enumerate() {
            let canonical = to_canonical(&vector, self.index.dimensions());
            if let Err(err) = self.index.upsert(id, &canonical, model) {
                log::error!("page {}: failed to store vector for {id} ({model}): {err}", page + 1);
                tally.failed += pending.len() - stored;
                return Err(err.to_string());
            }
            tally.processed += 1;
        }

        Ok(())
    }

    fn cancelled(&self, tally: &Tally, page: usize) -> BatchReport {
        log::info!(
            "embedding batch cancelled at page {}: {} of {} processed",
            page + 1,
            tally.processed,
            tally.total
        );
        tally.finish(BatchOutcome::Cancelled, None)
    }

    fn report_progress(&self, tally: &Tally, page: usize, total_pages: usize) {
        let progress = BatchProgress {
            processed: tally.processed,
            total: tally.total,
            page: page + 1,
            total_pages,
        };
        if let Ok(mut current) = self.shared.progress.lock() {
            *current = Some(progress);
        }
        if let Some(observer) = &self.observer {
            observer(progress);
        }
    }
}

/// One usable vector per requested document, in request order.
fn check_vectors(
    pending: &[(Eid, String)],
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != pending.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: pending.len(),
            got: vectors.len(),
        });
    }
    for ((id, _), vector) in pending.iter().zip(&vectors) {
        if vector.is_empty() || l2_norm(vector) == 0.0 {
            return Err(EmbeddingError::Decode(format!("empty embedding for {id}")));
        }
    }
    Ok(vectors)
}
