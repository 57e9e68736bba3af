//! Throttled batch ingestion: records → embeddings → vector store.
//!
//! Dispatch obeys two gates at once:
//! - a pacing interval: at most one batch *starts* per tick
//! - a worker pool: at most `workers` batches in flight
//!
//! Inside a batch, valid records are embedded in small sequential
//! sub-batches with a pause in between, then upserted in one call. The whole
//! batch is the unit of retry; ids are `offset + row`, so a retried upsert
//! overwrites instead of duplicating. One batch failing never stops the rest.

use std::fmt;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{CollectionSchema, IngestConfig};
use crate::embed::EmbeddingsProvider;
use crate::errors::RagError;
use crate::progress::{NoopReporter, ProgressReporter};
use crate::record::{Batch, IndexedDocument, Record};
use crate::retry::RetryPolicy;
use crate::vector_store::VectorStore;

/// A batch that exhausted its retries.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchFailure {
    /// 1-based batch number.
    pub number: usize,
    /// Id range of the batch.
    pub range: Range<u64>,
    pub attempts: u32,
    /// Valid records in the batch that were not stored.
    pub records: usize,
    pub error: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} (ids {}..{}) after {} attempt(s): {}",
            self.number, self.range.start, self.range.end, self.attempts, self.error
        )
    }
}

/// Outcome of one `ingest` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestReport {
    pub total: usize,
    pub batches: usize,
    /// Records stored.
    pub succeeded: usize,
    /// Malformed records left out.
    pub skipped: usize,
    /// Sorted by batch number.
    pub failures: Vec<BatchFailure>,
}

impl IngestReport {
    /// `Ok(succeeded)` when every batch made it, otherwise
    /// [`RagError::PartialIngest`] naming the failed ranges.
    pub fn into_result(self) -> Result<usize, RagError> {
        if self.failures.is_empty() {
            return Ok(self.succeeded);
        }
        Err(RagError::PartialIngest {
            succeeded: self.succeeded,
            failed: self
                .failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

/// Per-batch result travelling back from a worker task.
struct BatchOutcome {
    number: usize,
    range: Range<u64>,
    valid: usize,
    skipped: usize,
    result: Result<(), (RagError, u32)>,
}

/// Everything a worker task needs, shared across tasks.
struct BatchRunner {
    embedder: Arc<dyn EmbeddingsProvider>,
    store: Arc<dyn VectorStore>,
    dim: usize,
    cfg: IngestConfig,
    policy: RetryPolicy,
}

impl BatchRunner {
    async fn run(&self, batch: &Batch) -> BatchOutcome {
        let mut valid: Vec<(u64, &Record)> = Vec::with_capacity(batch.records.len());
        let mut skipped = 0usize;
        for (row, rec) in batch.records.iter().enumerate() {
            match rec.problem() {
                Some(reason) => {
                    debug!(batch = batch.number, ordinal = rec.ordinal, %reason, "skipping record");
                    skipped += 1;
                }
                None => valid.push((batch.offset + row as u64, rec)),
            }
        }

        let result = if valid.is_empty() {
            Ok(())
        } else {
            let label = format!("batch {}", batch.number);
            let items = valid.as_slice();
            self.policy
                .run(&label, |_| self.embed_and_upsert(items))
                .await
        };

        BatchOutcome {
            number: batch.number,
            range: batch.range(),
            valid: valid.len(),
            skipped,
            result,
        }
    }

    async fn embed_and_upsert(&self, items: &[(u64, &Record)]) -> Result<(), RagError> {
        let mut docs = Vec::with_capacity(items.len());

        for (i, chunk) in items.chunks(self.cfg.sub_batch).enumerate() {
            if i > 0 {
                sleep(self.cfg.sub_batch_pause).await;
            }
            let vectors = try_join_all(chunk.iter().map(|(_, rec)| self.embed_one(rec))).await?;
            for ((id, rec), vector) in chunk.iter().zip(vectors) {
                docs.push(IndexedDocument {
                    id: *id,
                    vector,
                    payload: rec.payload_text(),
                });
            }
        }

        self.store.upsert(docs).await
    }

    async fn embed_one(&self, rec: &Record) -> Result<Vec<f32>, RagError> {
        let text = rec.embed_text();
        let deadline = self.cfg.attempt_timeout;
        let vector = timeout(deadline, self.embedder.embed(&text))
            .await
            .map_err(|_| RagError::Timeout(deadline))??;
        if vector.len() != self.dim {
            return Err(RagError::VectorSizeMismatch {
                got: vector.len(),
                want: self.dim,
            });
        }
        Ok(vector)
    }
}

/// Shared progress counter for one `ingest` call.
struct Progress {
    processed: AtomicUsize,
    total: usize,
    reporter: Arc<dyn ProgressReporter>,
}

impl Progress {
    fn advance(&self, n: usize) {
        let done = self.processed.fetch_add(n, Ordering::SeqCst) + n;
        self.reporter.on_progress(done, self.total);
    }
}

/// Throttled batch ingestor.
pub struct Ingestor {
    runner: Arc<BatchRunner>,
    schema: CollectionSchema,
    reporter: Arc<dyn ProgressReporter>,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingsProvider>,
        store: Arc<dyn VectorStore>,
        schema: CollectionSchema,
        cfg: IngestConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            runner: Arc::new(BatchRunner {
                embedder,
                store,
                dim: schema.dim,
                cfg,
                policy,
            }),
            schema,
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Ingests `records` in batches of `batch_size`.
    ///
    /// Returns once every batch either succeeded or exhausted its retries.
    /// Batch failures are reported in [`IngestReport::failures`], not as `Err`.
    ///
    /// # Errors
    /// - [`RagError::Config`] for a zero batch size
    /// - collection setup failures (e.g. dimension mismatch), before any dispatch
    /// - [`RagError::Worker`] if a worker task was lost
    pub async fn ingest(
        &self,
        records: Vec<Record>,
        batch_size: usize,
    ) -> Result<IngestReport, RagError> {
        if batch_size == 0 {
            return Err(RagError::Config("batch_size must be > 0".into()));
        }
        let total = records.len();
        if total == 0 {
            info!("Empty corpus, nothing to ingest");
            return Ok(IngestReport::default());
        }

        let runner = &self.runner;
        let schema = &self.schema;
        runner
            .policy
            .run("ensure_collection", |_| runner.store.ensure_collection(schema))
            .await
            .map_err(|(e, _)| e)?;

        let batches = Batch::split(records, batch_size);
        let batch_count = batches.len();
        info!(
            total,
            batches = batch_count,
            batch_size,
            workers = runner.cfg.workers,
            pacing_ms = runner.cfg.pacing.as_millis() as u64,
            "Starting ingestion"
        );

        let progress = Arc::new(Progress {
            processed: AtomicUsize::new(0),
            total,
            reporter: Arc::clone(&self.reporter),
        });
        let pool = Arc::new(Semaphore::new(runner.cfg.workers));
        let mut gate = interval(runner.cfg.pacing);
        gate.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut set = JoinSet::new();
        for batch in batches {
            gate.tick().await;
            let permit = Arc::clone(&pool)
                .acquire_owned()
                .await
                .map_err(|e| RagError::Worker(e.to_string()))?;

            let runner = Arc::clone(&self.runner);
            let progress = Arc::clone(&progress);
            debug!(batch = batch.number, range = ?batch.range(), "dispatching");

            set.spawn(async move {
                let _permit = permit;
                let size = batch.records.len();
                let outcome = match AssertUnwindSafe(runner.run(&batch)).catch_unwind().await {
                    Ok(o) => o,
                    Err(_) => BatchOutcome {
                        number: batch.number,
                        range: batch.range(),
                        valid: size,
                        skipped: 0,
                        result: Err((RagError::Worker("batch task panicked".into()), 1)),
                    },
                };
                progress.advance(size);
                outcome
            });
        }

        let mut report = IngestReport {
            total,
            batches: batch_count,
            ..IngestReport::default()
        };
        let mut lost = Vec::new();

        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(o) => o,
                Err(e) => {
                    error!(error = %e, "ingestion worker lost");
                    lost.push(e.to_string());
                    continue;
                }
            };
            report.skipped += outcome.skipped;
            match outcome.result {
                Ok(()) => report.succeeded += outcome.valid,
                Err((err, attempts)) => {
                    warn!(
                        batch = outcome.number,
                        range = ?outcome.range,
                        attempts,
                        error = %err,
                        "batch failed permanently"
                    );
                    report.failures.push(BatchFailure {
                        number: outcome.number,
                        range: outcome.range,
                        attempts,
                        records: outcome.valid,
                        error: err.to_string(),
                    });
                }
            }
        }

        report.failures.sort_by_key(|f| f.number);
        self.reporter
            .finish(report.failures.is_empty() && lost.is_empty());

        if !lost.is_empty() {
            return Err(RagError::Worker(lost.join("; ")));
        }

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed_batches = report.failures.len(),
            "Ingestion finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Metric, RetryConfig};
    use crate::memory_store::MemoryVectorStore;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Embeds `text` as `[len, 1, 0]`; texts starting with `bad` fail with
    /// a permanent error, the first `flaky` calls fail with a 503.
    #[derive(Default)]
    struct FakeEmbedder {
        flaky: AtomicUsize,
        delay: Duration,
        /// Never answers.
        hang: bool,
        calls: Mutex<Vec<(String, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeEmbedder {
        fn starts_of(&self, texts: &[&str]) -> Vec<Instant> {
            let calls = self.calls.lock().unwrap();
            texts
                .iter()
                .filter_map(|t| calls.iter().find(|(c, _)| c == t).map(|(_, at)| *at))
                .collect()
        }
    }

    impl EmbeddingsProvider for FakeEmbedder {
        fn embed<'a>(
            &'a self,
            text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RagError>> + Send + 'a>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push((text.to_string(), Instant::now()));
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                if self.hang {
                    std::future::pending::<()>().await;
                }
                if !self.delay.is_zero() {
                    sleep(self.delay).await;
                }
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                if self
                    .flaky
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(RagError::Qdrant("503 Service Unavailable".into()));
                }
                if text.starts_with("bad") {
                    return Err(RagError::Qdrant("invalid input".into()));
                }
                Ok(vec![text.len() as f32, 1.0, 0.0])
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<usize>>);

    impl ProgressReporter for Recorder {
        fn on_progress(&self, processed: usize, _total: usize) {
            self.0.lock().unwrap().push(processed);
        }
    }

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "kb".into(),
            dim: 3,
            metrics: vec![Metric::InnerProduct, Metric::L2],
            content_field: "content".into(),
        }
    }

    fn corpus(n: u64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i, vec![format!("q{i}")], vec![format!("q{i}"), format!("a{i}")]))
            .collect()
    }

    fn ingestor(
        embedder: Arc<FakeEmbedder>,
        store: Arc<MemoryVectorStore>,
        workers: usize,
    ) -> Ingestor {
        let cfg = IngestConfig {
            workers,
            ..IngestConfig::default()
        };
        Ingestor::new(
            embedder,
            store,
            schema(),
            cfg,
            RetryPolicy::new(&RetryConfig::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_in_one_batch_spares_the_others() {
        let mut records = corpus(25);
        for r in &mut records[10..20] {
            r.embed_fields = vec![format!("bad{}", r.ordinal)];
        }
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let report = ingestor(embedder, store.clone(), 6)
            .ingest(records, 10)
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        // batches 1 and 3 hold 10 + 5 records
        assert_eq!(report.succeeded, 15);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.number, 2);
        assert_eq!(failure.range, 10..20);
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.records, 10);
        assert_eq!(store.len().await, 15);

        let err = report.into_result().unwrap_err().to_string();
        assert!(err.contains("batch 2 (ids 10..20)"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_to_success() {
        let embedder = Arc::new(FakeEmbedder {
            flaky: AtomicUsize::new(3),
            ..FakeEmbedder::default()
        });
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let report = ingestor(embedder, store.clone(), 6)
            .ingest(corpus(25), 10)
            .await
            .unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.into_result().unwrap(), 25);
        assert_eq!(store.len().await, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_records_are_skipped_and_counted() {
        let mut records = corpus(7);
        records[2] = Record::malformed(2, "not an object");
        records[5].embed_fields = vec![String::new()];
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let report = ingestor(embedder, store.clone(), 6)
            .ingest(records, 3)
            .await
            .unwrap();
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.succeeded + report.skipped, report.total);
        assert_eq!(store.len().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_starts_are_paced() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        ingestor(embedder.clone(), store, 6)
            .ingest(corpus(8), 2)
            .await
            .unwrap();

        let starts = embedder.starts_of(&["q0", "q2", "q4", "q6"]);
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sub_batches_are_separated_by_the_pause() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let cfg = IngestConfig {
            sub_batch: 2,
            sub_batch_pause: Duration::from_millis(500),
            ..IngestConfig::default()
        };
        let ing = Ingestor::new(
            embedder.clone(),
            store.clone(),
            schema(),
            cfg,
            RetryPolicy::new(&RetryConfig::default()),
        );
        let report = ing.ingest(corpus(6), 6).await.unwrap();
        assert_eq!(report.succeeded, 6);

        let starts = embedder.starts_of(&["q0", "q1", "q2", "q3", "q4", "q5"]);
        assert_eq!(starts.len(), 6);
        // members of one sub-batch start together
        assert_eq!(starts[0], starts[1]);
        assert_eq!(starts[2], starts[3]);
        assert!(starts[2] - starts[0] >= Duration::from_millis(500));
        assert!(starts[4] - starts[2] >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_embed_call_times_out_and_is_retried() {
        let embedder = Arc::new(FakeEmbedder {
            hang: true,
            ..FakeEmbedder::default()
        });
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let cfg = IngestConfig {
            sub_batch: 1,
            attempt_timeout: Duration::from_secs(2),
            ..IngestConfig::default()
        };
        let ing = Ingestor::new(
            embedder.clone(),
            store.clone(),
            schema(),
            cfg,
            RetryPolicy::new(&RetryConfig::default()),
        );
        let report = ing.ingest(corpus(1), 1).await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.attempts, 5);
        assert!(failure.error.contains("deadline exceeded"), "{}", failure.error);
        // one call per attempt
        assert_eq!(embedder.calls.lock().unwrap().len(), 5);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_caps_in_flight_batches() {
        let embedder = Arc::new(FakeEmbedder {
            delay: Duration::from_secs(5),
            ..FakeEmbedder::default()
        });
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let cfg = IngestConfig {
            workers: 2,
            sub_batch: 1,
            ..IngestConfig::default()
        };
        let ing = Ingestor::new(
            embedder.clone(),
            store,
            schema(),
            cfg,
            RetryPolicy::new(&RetryConfig::default()),
        );
        let report = ing.ingest(corpus(10), 1).await.unwrap();
        assert_eq!(report.succeeded, 10);
        assert_eq!(embedder.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_complete() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let recorder = Arc::new(Recorder::default());
        ingestor(embedder, store, 6)
            .with_reporter(recorder.clone())
            .ingest(corpus(25), 10)
            .await
            .unwrap();
        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&25));
    }

    #[tokio::test(start_paused = true)]
    async fn reingesting_does_not_duplicate() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let ing = ingestor(embedder, store.clone(), 6);
        ing.ingest(corpus(25), 10).await.unwrap();
        ing.ingest(corpus(25), 10).await.unwrap();
        assert_eq!(store.len().await, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_corpus_dispatches_nothing() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let report = ingestor(embedder.clone(), store.clone(), 6)
            .ingest(Vec::new(), 10)
            .await
            .unwrap();
        assert_eq!(report.into_result().unwrap(), 0);
        assert!(!store.has_collection().await.unwrap());
        assert!(embedder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn collection_dimension_mismatch_aborts_before_dispatch() {
        let embedder = Arc::new(FakeEmbedder::default());
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        let mut wide = schema();
        wide.dim = 8;
        store.ensure_collection(&wide).await.unwrap();

        let err = ingestor(embedder.clone(), store, 6)
            .ingest(corpus(4), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::VectorSizeMismatch { .. }));
        assert!(embedder.calls.lock().unwrap().is_empty());
    }
}
