//! Background ingestion service: a bounded queue feeding a fixed-size pool of
//! job workers.
//!
//! ```text
//! submit ──▶ create PENDING ──▶ mpsc (queue_capacity) ──▶ dispatcher
//!                                                         │ for_each_concurrent(max_concurrent_jobs)
//!                                                         ▼
//!                                               tokio::spawn(runner.run)
//! ```
//!
//! `submit` returns as soon as the job is queued. A worker task that panics
//! takes only its own job down: the dispatcher marks that job FAILED and
//! keeps serving the queue. [`IngestService::shutdown`] stops intake, drains
//! what is already queued and waits for running jobs.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::job::{JobId, JobRecord};
use crate::model::StoredTransaction;
use crate::pipeline::input::DocumentInput;
use crate::progress::{event_stream, BroadcastProgress, JobEvent, JobEventStream};
use crate::runner::IngestionJobRunner;
use crate::store::IngestStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Worker-pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    /// Events buffered per subscriber before it starts skipping.
    pub event_capacity: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_capacity: 64,
            event_capacity: 256,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..Self::default()
        }
    }
}

struct Submission {
    id: JobId,
    input: DocumentInput,
}

/// Accepts statements and processes them in the background.
pub struct IngestService {
    runner: Arc<IngestionJobRunner>,
    queue: RwLock<Option<mpsc::Sender<Submission>>>,
    events: broadcast::Sender<JobEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl IngestService {
    /// Start the dispatcher. Must be called inside a Tokio runtime.
    ///
    /// The runner's own progress callback keeps firing; service events are
    /// published alongside it.
    pub fn start(runner: IngestionJobRunner, settings: ServiceSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let inner = runner.progress();
        let runner = Arc::new(
            runner.with_progress(Arc::new(BroadcastProgress::new(events.clone(), Some(inner)))),
        );

        let (tx, rx) = mpsc::channel::<Submission>(settings.queue_capacity.max(1));
        let workers = settings.max_concurrent_jobs.max(1);
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&runner), rx, workers));
        info!(workers, queue = settings.queue_capacity, "Ingestion service started");

        Self {
            runner,
            queue: RwLock::new(Some(tx)),
            events,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Build the runner from `config` and start the service over `store`.
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn IngestStore>,
    ) -> Result<Self, IngestError> {
        let runner = IngestionJobRunner::from_config(config, store)?;
        Ok(Self::start(runner, ServiceSettings::from_config(config)))
    }

    /// Create a PENDING job for `document` and queue it.
    ///
    /// Returns without waiting for processing. Waits only while the queue is
    /// full.
    pub async fn submit(
        &self,
        document: impl Into<DocumentInput>,
        owner: &str,
    ) -> Result<JobId, IngestError> {
        let tx = self
            .queue
            .read()
            .await
            .clone()
            .ok_or(IngestError::ServiceClosed)?;

        let input = document.into();
        let job = self.runner.create_job(owner).await?;
        debug!(job = %job.id, input = %input.describe(), "Queueing job");

        if tx.send(Submission { id: job.id, input }).await.is_err() {
            if let Err(e) = self.runner.abandon(job.id, "service shut down before the job ran").await {
                warn!(job = %job.id, "Could not mark unqueued job failed: {}", e);
            }
            return Err(IngestError::ServiceClosed);
        }
        Ok(job.id)
    }

    /// Current record of a job.
    pub async fn get_status(&self, id: JobId) -> Result<JobRecord, IngestError> {
        self.runner
            .store()
            .load_job(id)
            .await?
            .ok_or(IngestError::JobNotFound(id))
    }

    /// Transactions committed so far for a job.
    pub async fn transactions(&self, id: JobId) -> Result<Vec<StoredTransaction>, IngestError> {
        let store = self.runner.store();
        if store.load_job(id).await?.is_none() {
            return Err(IngestError::JobNotFound(id));
        }
        Ok(store.transactions_for_job(id).await?)
    }

    /// Stream of lifecycle events for every job, starting now.
    pub fn subscribe(&self) -> JobEventStream {
        event_stream(self.events.subscribe())
    }

    /// Stop accepting jobs, finish every queued and running job, then return.
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) -> Result<(), IngestError> {
        drop(self.queue.write().await.take());
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| IngestError::Internal(format!("Dispatcher failed: {e}")))?;
            info!("Ingestion service drained");
        }
        Ok(())
    }
}

async fn dispatch(
    runner: Arc<IngestionJobRunner>,
    rx: mpsc::Receiver<Submission>,
    workers: usize,
) {
    ReceiverStream::new(rx)
        .for_each_concurrent(workers, |submission| {
            let runner = Arc::clone(&runner);
            async move {
                let id = submission.id;
                let worker = Arc::clone(&runner);
                let task = tokio::spawn(async move {
                    worker.run(submission.id, &submission.input).await
                });

                match task.await {
                    Ok(Ok(summary)) => debug!(
                        job = %id,
                        transactions = summary.transactions,
                        "Worker finished"
                    ),
                    // Already recorded on the job and logged by the runner.
                    Ok(Err(e)) => debug!(job = %id, "Worker finished with error: {}", e),
                    Err(join_err) => {
                        error!(job = %id, "Worker task panicked: {}", join_err);
                        if let Err(e) = runner.abandon(id, "worker task panicked").await {
                            error!(job = %id, "Could not mark job failed: {}", e);
                        }
                    }
                }
            }
        })
        .await;
}
