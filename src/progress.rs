//! Progress reporting for ingestion jobs.
//!
//! Two integration points are offered:
//!
//! * [`IngestProgressCallback`]: a `Send + Sync` trait injected through
//!   [`crate::config::IngestConfigBuilder::progress_callback`]. The runner
//!   calls it after every durable state change.
//! * [`JobEvent`]: a serialisable event that [`crate::service::IngestService`]
//!   publishes on a broadcast channel; see [`crate::service::IngestService::subscribe`].
//!
//! Events are emitted only *after* the matching store write succeeded, so an
//! observer never sees progress that a later `get_status` would contradict.
//!
//! # Example
//!
//! ```rust
//! use statement2txn::{IngestConfig, IngestProgressCallback, JobId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     chunks: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_chunk_complete(
//!         &self,
//!         job: JobId,
//!         _chunk: &statement2txn::Chunk,
//!         committed: usize,
//!         progress: f64,
//!     ) {
//!         let n = self.chunks.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{job}: chunk {n} committed {committed} rows ({progress:.1}%)");
//!     }
//! }
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { chunks: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::job::{Chunk, JobId};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Called by the job runner as a job moves through its lifecycle.
///
/// Several jobs may run at once, so implementations must protect shared
/// mutable state (`Mutex`, atomics). All methods default to no-ops.
pub trait IngestProgressCallback: Send + Sync {
    /// The job is PROCESSING and its page count is known.
    fn on_job_start(&self, job: JobId, total_pages: usize) {
        let _ = (job, total_pages);
    }

    /// A chunk's transactions and the new progress value were persisted.
    ///
    /// # Arguments
    /// * `committed`: transactions written for this chunk
    /// * `progress`: job progress after the commit, in `[0, 100]`
    fn on_chunk_complete(&self, job: JobId, chunk: &Chunk, committed: usize, progress: f64) {
        let _ = (job, chunk, committed, progress);
    }

    /// The job reached COMPLETED.
    fn on_job_complete(&self, job: JobId, transactions: usize) {
        let _ = (job, transactions);
    }

    /// The job reached FAILED.
    fn on_job_failed(&self, job: JobId, reason: &str) {
        let _ = (job, reason);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

/// A lifecycle event for one job, as broadcast by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job: JobId,
        total_pages: usize,
    },
    ChunkCommitted {
        job: JobId,
        chunk: usize,
        pages: (usize, usize),
        committed: usize,
        progress: f64,
    },
    Completed {
        job: JobId,
        transactions: usize,
    },
    Failed {
        job: JobId,
        reason: String,
    },
}

impl JobEvent {
    pub fn job(&self) -> JobId {
        match self {
            JobEvent::Started { job, .. }
            | JobEvent::ChunkCommitted { job, .. }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. } => *job,
        }
    }

    /// True for the last event a job ever produces.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

/// A boxed stream of job events. Lagging subscribers skip missed events.
pub type JobEventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Wrap a broadcast receiver. Events missed by a lagging receiver are skipped.
pub(crate) fn event_stream(rx: broadcast::Receiver<JobEvent>) -> JobEventStream {
    Box::pin(BroadcastStream::new(rx).filter_map(|event| event.ok()))
}

/// Forwards callback invocations to a broadcast channel, then to an optional
/// inner callback.
pub(crate) struct BroadcastProgress {
    tx: broadcast::Sender<JobEvent>,
    inner: Option<ProgressCallback>,
}

impl BroadcastProgress {
    pub(crate) fn new(tx: broadcast::Sender<JobEvent>, inner: Option<ProgressCallback>) -> Self {
        Self { tx, inner }
    }

    fn publish(&self, event: JobEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl IngestProgressCallback for BroadcastProgress {
    fn on_job_start(&self, job: JobId, total_pages: usize) {
        self.publish(JobEvent::Started { job, total_pages });
        if let Some(cb) = &self.inner {
            cb.on_job_start(job, total_pages);
        }
    }

    fn on_chunk_complete(&self, job: JobId, chunk: &Chunk, committed: usize, progress: f64) {
        self.publish(JobEvent::ChunkCommitted {
            job,
            chunk: chunk.index,
            pages: (chunk.start, chunk.end),
            committed,
            progress,
        });
        if let Some(cb) = &self.inner {
            cb.on_chunk_complete(job, chunk, committed, progress);
        }
    }

    fn on_job_complete(&self, job: JobId, transactions: usize) {
        self.publish(JobEvent::Completed { job, transactions });
        if let Some(cb) = &self.inner {
            cb.on_job_complete(job, transactions);
        }
    }

    fn on_job_failed(&self, job: JobId, reason: &str) {
        self.publish(JobEvent::Failed {
            job,
            reason: reason.to_string(),
        });
        if let Some(cb) = &self.inner {
            cb.on_job_failed(job, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        chunks: AtomicUsize,
        completes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl IngestProgressCallback for TrackingCallback {
        fn on_job_start(&self, _job: JobId, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chunk_complete(&self, _job: JobId, _chunk: &Chunk, _committed: usize, _p: f64) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _job: JobId, _transactions: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_failed(&self, _job: JobId, _reason: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn chunk() -> Chunk {
        Chunk {
            index: 0,
            start: 0,
            end: 50,
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let job = JobId::new();
        cb.on_job_start(job, 5);
        cb.on_chunk_complete(job, &chunk(), 3, 100.0);
        cb.on_job_complete(job, 3);
        cb.on_job_failed(job, "boom");
    }

    #[test]
    fn broadcast_progress_publishes_and_forwards() {
        let (tx, mut rx) = broadcast::channel(16);
        let tracker = Arc::new(TrackingCallback::default());
        let fwd = BroadcastProgress::new(tx, Some(tracker.clone() as ProgressCallback));
        let job = JobId::new();

        fwd.on_job_start(job, 120);
        fwd.on_chunk_complete(job, &chunk(), 7, 41.7);
        fwd.on_job_complete(job, 7);

        assert_eq!(
            rx.try_recv().unwrap(),
            JobEvent::Started {
                job,
                total_pages: 120
            }
        );
        match rx.try_recv().unwrap() {
            JobEvent::ChunkCommitted {
                pages, committed, ..
            } => {
                assert_eq!(pages, (0, 50));
                assert_eq!(committed, 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let last = rx.try_recv().unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.job(), job);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.chunks.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        let fwd = BroadcastProgress::new(tx, None);
        fwd.on_job_failed(JobId::new(), "no pages");
    }

    #[tokio::test]
    async fn event_stream_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(4);
        let mut events = event_stream(rx);
        let job = JobId::new();
        tx.send(JobEvent::Completed {
            job,
            transactions: 0,
        })
        .unwrap();
        drop(tx);
        assert_eq!(events.next().await.map(|e| e.job()), Some(job));
        assert!(events.next().await.is_none());
    }

    #[test]
    fn events_serialize_with_tag() {
        let job = JobId::new();
        let json = serde_json::to_value(JobEvent::Failed {
            job,
            reason: "x".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "failed");
        assert_eq!(json["job"], job.to_string());
    }
}
