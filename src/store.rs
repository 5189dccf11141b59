//! Persistence for job records and transactions.
//!
//! The runner talks to an [`IngestStore`]; two backends ship with the crate:
//!
//! * [`MemoryStore`]: process-local maps, used by [`crate::ingest`] and tests.
//! * [`JsonStore`]: a directory on disk:
//!
//! ```text
//! <root>/jobs/<job-id>.json            one JobRecord, replaced atomically
//! <root>/transactions/<job-id>.jsonl   StoredTransaction rows, append-only
//! ```
//!
//! Transactions are never rewritten once appended, which is what lets a FAILED
//! job keep the chunks it committed before the failure.

use crate::error::StoreError;
use crate::job::{JobId, JobRecord};
use crate::model::StoredTransaction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

/// Durable storage used by the job runner and the service.
#[async_trait]
pub trait IngestStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::DuplicateJob`] if the id exists.
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    async fn load_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Replace an existing job. Fails with [`StoreError::MissingJob`] if absent.
    async fn save_job(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Append rows. Rows already stored are never modified.
    async fn append_transactions(&self, rows: &[StoredTransaction]) -> Result<(), StoreError>;

    /// All rows of a job, in insertion order.
    async fn transactions_for_job(&self, id: JobId) -> Result<Vec<StoredTransaction>, StoreError>;
}

// ── MemoryStore ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    transactions: RwLock<HashMap<JobId, Vec<StoredTransaction>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::DuplicateJob(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn save_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        match self.jobs.write().await.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(StoreError::MissingJob(job.id)),
        }
    }

    async fn append_transactions(&self, rows: &[StoredTransaction]) -> Result<(), StoreError> {
        let mut txns = self.transactions.write().await;
        for row in rows {
            txns.entry(row.job_id).or_default().push(row.clone());
        }
        Ok(())
    }

    async fn transactions_for_job(&self, id: JobId) -> Result<Vec<StoredTransaction>, StoreError> {
        Ok(self
            .transactions
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

// ── JsonStore ────────────────────────────────────────────────────────────────

/// A directory of JSON files.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl JsonStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { root: root.into() };
        for dir in [store.jobs_dir(), store.transactions_dir()] {
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    fn transactions_dir(&self) -> PathBuf {
        self.root.join("transactions")
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.jobs_dir().join(format!("{id}.json"))
    }

    fn transactions_path(&self, id: JobId) -> PathBuf {
        self.transactions_dir().join(format!("{id}.jsonl"))
    }

    /// Write via a sibling temp file and rename, so readers never see a
    /// half-written record.
    async fn write_job_file(&self, job: &JobRecord) -> Result<(), StoreError> {
        let path = self.job_path(job.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, &body).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(())
    }
}

#[async_trait]
impl IngestStore for JsonStore {
    async fn create_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let path = self.job_path(job.id);
        if tokio::fs::try_exists(&path).await.map_err(io_err(&path))? {
            return Err(StoreError::DuplicateJob(job.id));
        }
        self.write_job_file(job).await?;
        debug!(job = %job.id, "Created {}", path.display());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let path = self.job_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn save_job(&self, job: &JobRecord) -> Result<(), StoreError> {
        let path = self.job_path(job.id);
        if !tokio::fs::try_exists(&path).await.map_err(io_err(&path))? {
            return Err(StoreError::MissingJob(job.id));
        }
        self.write_job_file(job).await
    }

    async fn append_transactions(&self, rows: &[StoredTransaction]) -> Result<(), StoreError> {
        let mut by_job: HashMap<JobId, String> = HashMap::new();
        for row in rows {
            let buf = by_job.entry(row.job_id).or_default();
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }

        for (job, lines) in by_job {
            let path = self.transactions_path(job);
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(io_err(&path))?;
            file.write_all(lines.as_bytes())
                .await
                .map_err(io_err(&path))?;
            file.flush().await.map_err(io_err(&path))?;
        }
        Ok(())
    }

    async fn transactions_for_job(&self, id: JobId) -> Result<Vec<StoredTransaction>, StoreError> {
        let path = self.transactions_path(id);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };

        body.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}
