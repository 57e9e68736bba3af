//! Bounded write-back queue for cache refreshes.
//!
//! `enqueue` never waits: when the channel is full the job is dropped and
//! counted. A fixed set of workers drains the channel; job errors and
//! panics are logged and counted, never propagated.

use std::panic::AssertUnwindSafe;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::Result;

pub type JobFuture = BoxFuture<'static, Result<()>>;

struct Job {
    label: String,
    work: JobFuture,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Accepted but not yet finished.
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn settle(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WriteBackQueue {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WriteBackQueue {
    /// Spawns `workers` consumers on the current runtime.
    pub fn new(capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|n| {
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                tokio::spawn(worker_loop(n, rx, counters))
            })
            .collect();

        info!(capacity, workers, "write-back queue started");
        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            counters,
        }
    }

    /// Hands a job to the workers. Returns `false` if it was dropped
    /// (queue full or shut down).
    pub fn enqueue(&self, label: impl Into<String>, work: JobFuture) -> bool {
        let label = label.into();
        let guard = match self.tx.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(%label, "write-back queue closed; job dropped");
            return false;
        };

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match tx.try_send(Job {
            label: label.clone(),
            work,
        }) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(%label, "write-back job queued");
                true
            }
            Err(e) => {
                self.counters.settle();
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let why = match e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(%label, why, "write-back job dropped");
                false
            }
        }
    }

    /// Waits until every accepted job has finished.
    pub async fn flush(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Closes the queue, lets workers drain what is left, and joins them.
    pub async fn shutdown(&self) {
        let tx = match self.tx.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let handles = match self.workers.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for h in handles {
            if let Err(e) = h.await {
                error!(error = %e, "write-back worker ended abnormally");
            }
        }
        let stats = self.stats();
        info!(
            accepted = stats.accepted,
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            "write-back queue stopped"
        );
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        QueueStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            pending: c.pending.load(Ordering::Acquire),
        }
    }
}

async fn worker_loop(n: usize, rx: Arc<AsyncMutex<mpsc::Receiver<Job>>>, counters: Arc<Counters>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            debug!(worker = n, "write-back worker exiting");
            return;
        };

        match AssertUnwindSafe(job.work).catch_unwind().await {
            Ok(Ok(())) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = n, label = %job.label, "write-back job done");
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = n, label = %job.label, error = %e, "write-back job failed");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(worker = n, label = %job.label, "write-back job panicked");
            }
        }
        counters.settle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SessionError;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn flush_waits_for_accepted_jobs() {
        let queue = WriteBackQueue::new(16, 2);
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..5 {
            let done = Arc::clone(&done);
            let accepted = queue.enqueue(
                format!("job {i}"),
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            );
            assert!(accepted);
        }
        queue.flush().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        let stats = queue.stats();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let queue = WriteBackQueue::new(1, 1);
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        queue.enqueue(
            "blocker",
            async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok(())
            }
            .boxed(),
        );
        started_rx.await.unwrap();

        assert!(queue.enqueue("fills", async { Ok(()) }.boxed()));
        assert!(!queue.enqueue("overflow", async { Ok(()) }.boxed()));

        release_tx.send(()).unwrap();
        queue.flush().await;
        let stats = queue.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn failures_and_panics_are_contained() {
        let queue = WriteBackQueue::new(8, 1);
        queue.enqueue(
            "fails",
            async { Err(SessionError::Invalid("boom".into())) }.boxed(),
        );
        queue.enqueue(
            "panics",
            async {
                if true {
                    panic!("worker must survive");
                }
                Ok(())
            }
            .boxed(),
        );
        queue.enqueue("fine", async { Ok(()) }.boxed());

        queue.flush().await;
        let stats = queue.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_then_rejects() {
        let queue = WriteBackQueue::new(8, 2);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            queue.enqueue(
                "drain",
                async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            );
        }
        queue.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(!queue.enqueue("late", async { Ok(()) }.boxed()));
        assert_eq!(queue.stats().dropped, 1);
    }
}
