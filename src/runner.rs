//! Execution of one ingestion job.
//!
//! ```text
//! load job ─▶ start ─▶ resolve input ─▶ open ─▶ set total_pages
//!                                                  │
//!            ┌─────────────── per chunk ───────────┘
//!            ▼
//!   load pages ─▶ extract text ─▶ parse ─▶ categorize ─▶ append rows ─▶ save progress
//!            │
//!            └─▶ all chunks done ─▶ COMPLETED (progress = 100)
//!
//! any error after start ─▶ FAILED (committed chunks stay)
//! ```
//!
//! Every change to the [`JobRecord`] goes through [`IngestionJobRunner::commit`]:
//! the transition is applied to a copy, the copy is saved, and only then does
//! the in-memory record move. Progress callbacks fire after the save.

use crate::config::{IngestConfig, OcrBackendKind};
use crate::error::IngestError;
use crate::job::{plan_chunks, JobId, JobRecord, JobStatus};
use crate::model::{Category, StoredTransaction};
use crate::pipeline::categorize::{
    CategoryAssigner, CategoryBackend, DisabledCategoryBackend, LlmCategoryBackend,
};
use crate::pipeline::extract::{PageTextExtractor, TextSource};
use crate::pipeline::input::{resolve_input, DocumentInput};
use crate::pipeline::ocr::{DisabledOcr, OcrEngine, TesseractOcr, VisionOcr};
use crate::pipeline::parse::parse_with_report;
use crate::pipeline::render::{DocumentOpener, PdfiumOpener, RenderPlan};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::provider::resolve_provider;
use crate::store::IngestStore;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info};

/// Knobs the runner needs beyond its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub plan: RenderPlan,
    pub chunk_size: usize,
    pub download_timeout_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            plan: RenderPlan::default(),
            chunk_size: 50,
            download_timeout_secs: 120,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            plan: RenderPlan {
                dpi: config.dpi,
                max_rendered_pixels: config.max_rendered_pixels,
                min_text_chars: config.min_text_chars,
            },
            chunk_size: config.chunk_size.max(1),
            download_timeout_secs: config.download_timeout_secs,
        }
    }
}

/// Outcome of a job that reached COMPLETED.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job: JobRecord,
    /// Rows persisted across all chunks.
    pub transactions: usize,
    pub pages_recognized: usize,
    /// Scanned pages that yielded no text.
    pub pages_blank: usize,
    pub rejected_blocks: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct RunStats {
    transactions: usize,
    pages_recognized: usize,
    pages_blank: usize,
    rejected_blocks: usize,
}

/// Drives jobs through the pipeline and records their progress.
pub struct IngestionJobRunner {
    opener: Arc<dyn DocumentOpener>,
    extractor: PageTextExtractor,
    assigner: CategoryAssigner,
    store: Arc<dyn IngestStore>,
    settings: RunnerSettings,
    progress: ProgressCallback,
    /// Jobs currently inside [`Self::run`].
    active: Mutex<HashSet<JobId>>,
}

/// Releases a job's slot in `active` when dropped.
struct ActiveClaim<'a> {
    active: &'a Mutex<HashSet<JobId>>,
    id: JobId,
}

impl Drop for ActiveClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.active.lock() {
            set.remove(&self.id);
        }
    }
}

impl IngestionJobRunner {
    pub fn new(
        opener: Arc<dyn DocumentOpener>,
        extractor: PageTextExtractor,
        assigner: CategoryAssigner,
        store: Arc<dyn IngestStore>,
        mut settings: RunnerSettings,
    ) -> Self {
        // Pages the extractor will send to OCR must arrive with a raster.
        settings.plan.min_text_chars = extractor.min_text_chars();
        Self {
            opener,
            extractor,
            assigner,
            store,
            settings,
            progress: Arc::new(NoopProgressCallback),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Wire pdfium, the configured OCR engine and categorizer, and `store`.
    ///
    /// Resolves an LLM provider only when categorization or vision OCR needs one.
    pub fn from_config(
        config: &IngestConfig,
        store: Arc<dyn IngestStore>,
    ) -> Result<Self, IngestError> {
        let provider = if config.needs_llm() {
            Some(resolve_provider(config)?)
        } else {
            None
        };

        let ocr: Arc<dyn OcrEngine> = match (config.ocr, &provider) {
            (OcrBackendKind::Tesseract, _) => Arc::new(TesseractOcr::new(
                config.ocr_language.clone(),
                config.ocr_timeout_secs,
            )),
            (OcrBackendKind::Vision, Some(p)) => Arc::new(VisionOcr::new(
                Arc::clone(p),
                config.temperature,
                config.max_tokens,
                config.ocr_timeout_secs,
            )),
            _ => Arc::new(DisabledOcr),
        };

        let backend: Arc<dyn CategoryBackend> = match (&provider, config.categorize) {
            (Some(p), true) => Arc::new(LlmCategoryBackend::new(
                Arc::clone(p),
                config.temperature,
                config.max_tokens,
                config.api_timeout_secs,
            )),
            _ => Arc::new(DisabledCategoryBackend),
        };

        let extractor = PageTextExtractor::new(ocr, config.min_text_chars)
            .with_concurrency(config.ocr_concurrency);
        let assigner = CategoryAssigner::new(backend, config.batch_size, config.taxonomy.clone());

        let runner = Self::new(
            Arc::new(PdfiumOpener::new(config.password.clone())),
            extractor,
            assigner,
            store,
            RunnerSettings::from_config(config),
        );
        Ok(match &config.progress_callback {
            Some(cb) => runner.with_progress(Arc::clone(cb)),
            None => runner,
        })
    }

    pub fn store(&self) -> &Arc<dyn IngestStore> {
        &self.store
    }

    pub(crate) fn progress(&self) -> ProgressCallback {
        Arc::clone(&self.progress)
    }

    /// Mark a job FAILED from outside [`Self::run`], e.g. after its task
    /// panicked or it could not be queued. Terminal jobs are left alone.
    pub(crate) async fn abandon(&self, id: JobId, reason: &str) -> Result<(), IngestError> {
        let Some(mut job) = self.store.load_job(id).await? else {
            return Err(IngestError::JobNotFound(id));
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        self.commit(&mut job, |j| j.fail(reason)).await?;
        self.progress.on_job_failed(id, reason);
        Ok(())
    }

    /// Persist a fresh PENDING job for `owner`.
    pub async fn create_job(&self, owner: &str) -> Result<JobRecord, IngestError> {
        let job = JobRecord::new(owner);
        self.store.create_job(&job).await?;
        debug!(job = %job.id, owner, "Job created");
        Ok(job)
    }

    /// Run job `id` over `input` to COMPLETED or FAILED.
    ///
    /// Unknown ids fail with [`IngestError::JobNotFound`]; a job that is not
    /// PENDING, or is already being run by this runner, is refused with
    /// [`IngestError::InvalidTransition`] and left untouched. Any later error
    /// marks the job FAILED and is returned.
    pub async fn run(&self, id: JobId, input: &DocumentInput) -> Result<RunSummary, IngestError> {
        let started = Instant::now();
        let _claim = self.claim(id)?;
        let mut job = self
            .store
            .load_job(id)
            .await?
            .ok_or(IngestError::JobNotFound(id))?;

        self.commit(&mut job, JobRecord::start).await?;
        info!(job = %id, input = %input.describe(), "Job started");

        let mut stats = RunStats::default();
        match self.process(&mut job, input, &mut stats).await {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    job = %id,
                    pages = job.total_pages,
                    transactions = stats.transactions,
                    recognized = stats.pages_recognized,
                    rejected = stats.rejected_blocks,
                    "Job completed in {}ms",
                    duration_ms
                );
                self.progress.on_job_complete(id, stats.transactions);
                Ok(RunSummary {
                    job,
                    transactions: stats.transactions,
                    pages_recognized: stats.pages_recognized,
                    pages_blank: stats.pages_blank,
                    rejected_blocks: stats.rejected_blocks,
                    duration_ms,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(job = %id, progress = job.progress, "Job failed: {}", reason);
                if let Err(save_err) = self.commit(&mut job, |j| j.fail(reason.as_str())).await {
                    error!(job = %id, "Could not record failure: {}", save_err);
                }
                self.progress.on_job_failed(id, &reason);
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        job: &mut JobRecord,
        input: &DocumentInput,
        stats: &mut RunStats,
    ) -> Result<(), IngestError> {
        // Keeps downloaded or buffered temp files alive until the job ends.
        let resolved = resolve_input(input, self.settings.download_timeout_secs).await?;
        let source = self.opener.open(resolved.path()).await?;

        let total_pages = source.page_count();
        self.commit(job, |j| j.set_total_pages(total_pages)).await?;
        self.progress.on_job_start(job.id, total_pages);

        let chunks = plan_chunks(total_pages, self.settings.chunk_size);
        debug!(job = %job.id, total_pages, chunks = chunks.len(), "Chunk plan ready");

        for chunk in &chunks {
            let pages = source.load_pages(chunk.pages(), &self.settings.plan).await?;
            let texts = self.extractor.extract_all(pages).await;

            let mut text = String::new();
            for page in &texts {
                match page.source {
                    TextSource::Recognized => stats.pages_recognized += 1,
                    TextSource::Blank => stats.pages_blank += 1,
                    TextSource::TextLayer => {}
                }
                text.push_str(&page.text);
                text.push('\n');
            }

            let report = parse_with_report(&text);
            stats.rejected_blocks += report.rejected.len();

            let merchants: BTreeSet<String> =
                report.records.iter().map(|r| r.merchant.clone()).collect();
            let categories = self.assigner.assign(&merchants).await;

            let rows: Vec<StoredTransaction> = report
                .records
                .into_iter()
                .map(|record| {
                    let category = categories
                        .get(&record.merchant)
                        .copied()
                        .unwrap_or(Category::Other);
                    StoredTransaction::new(job.id, job.owner.as_str(), record, category)
                })
                .collect();

            self.store.append_transactions(&rows).await?;
            stats.transactions += rows.len();

            let progress = chunk.progress_after(total_pages);
            self.commit(job, |j| j.advance(progress)).await?;
            self.progress
                .on_chunk_complete(job.id, chunk, rows.len(), job.progress);
            info!(
                job = %job.id,
                chunk = chunk.index,
                pages = ?chunk.pages(),
                committed = rows.len(),
                "Progress {:.1}%",
                job.progress
            );
        }

        self.commit(job, JobRecord::complete).await
    }

    fn claim(&self, id: JobId) -> Result<ActiveClaim<'_>, IngestError> {
        let mut set = self
            .active
            .lock()
            .map_err(|_| IngestError::Internal("active job set poisoned".into()))?;
        if !set.insert(id) {
            return Err(IngestError::InvalidTransition {
                job: id,
                status: JobStatus::Processing,
                action: "start",
            });
        }
        Ok(ActiveClaim {
            active: &self.active,
            id,
        })
    }

    /// Apply `change` to a copy of `job`, persist it, then adopt it.
    async fn commit<F>(&self, job: &mut JobRecord, change: F) -> Result<(), IngestError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), IngestError>,
    {
        let mut next = job.clone();
        change(&mut next)?;
        self.store.save_job(&next).await?;
        *job = next;
        Ok(())
    }
}
