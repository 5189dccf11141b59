//! Runner and service integration tests.
//!
//! Every external capability is faked: documents are generated in memory, OCR
//! and categorization answer from scripts. No pdfium, tesseract or network is
//! needed.
//!
//! Run with:
//!   cargo test --test ingest

use async_trait::async_trait;
use futures::StreamExt;
use image::DynamicImage;
use statement2txn::pipeline::extract::needs_recognition;
use statement2txn::{
    CategorizeError, Category, CategoryAssigner, CategoryBackend, Chunk, DocumentInput,
    DocumentOpener, DocumentSource, IngestError, IngestProgressCallback, IngestService,
    IngestStore, IngestionJobRunner, JobEvent, JobId, JobStatus, JsonStore, MemoryStore,
    OcrEngine, OcrError, PageTextExtractor, RawPage, RenderPlan, RunnerSettings, ServiceSettings,
};
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

const MERCHANTS: [&str; 3] = ["Coffee House", "Metro Rail", "City Pharmacy"];

/// One transaction block per page; the merchant cycles through [`MERCHANTS`].
fn page_text(page: usize) -> String {
    format!(
        "Feb {day}, 2026\nUPI\nDEBIT\n₹{amount}.00\nPaid to\n{merchant}\nTransaction ID T{page:05}\n",
        day = page % 28 + 1,
        amount = 100 + page,
        merchant = MERCHANTS[page % MERCHANTS.len()],
    )
}

#[derive(Clone, Copy, PartialEq)]
enum PageKind {
    /// Text layer carries the statement.
    Text,
    /// Empty text layer plus a raster; text only via OCR.
    Scanned,
    /// Text layer carries the statement; rasterised only when the plan
    /// considers that text too short, like the pdfium source does.
    Sparse,
}

struct FakeDocument {
    pages: usize,
    kind: PageKind,
    /// Loading any range that starts here fails.
    fail_at: Option<usize>,
}

#[async_trait]
impl DocumentSource for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn load_pages(
        &self,
        range: Range<usize>,
        plan: &RenderPlan,
    ) -> Result<Vec<RawPage>, IngestError> {
        if self.fail_at == Some(range.start) {
            return Err(IngestError::CorruptPdf {
                path: "fake.pdf".into(),
                detail: format!("page {} is unreadable", range.start + 1),
            });
        }
        Ok(range
            .map(|index| match self.kind {
                PageKind::Text => RawPage {
                    index,
                    text_layer: page_text(index),
                    raster: None,
                },
                PageKind::Scanned => RawPage {
                    index,
                    text_layer: String::new(),
                    raster: Some(DynamicImage::new_rgb8(4, 4)),
                },
                PageKind::Sparse => {
                    let text_layer = page_text(index);
                    let raster = needs_recognition(&text_layer, plan.min_text_chars)
                        .then(|| DynamicImage::new_rgb8(4, 4));
                    RawPage {
                        index,
                        text_layer,
                        raster,
                    }
                }
            })
            .collect())
    }
}

struct FakeOpener {
    pages: usize,
    kind: PageKind,
    fail_at: Option<usize>,
}

impl FakeOpener {
    fn text(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            kind: PageKind::Text,
            fail_at: None,
        })
    }
}

#[async_trait]
impl DocumentOpener for FakeOpener {
    async fn open(&self, _path: &Path) -> Result<Arc<dyn DocumentSource>, IngestError> {
        Ok(Arc::new(FakeDocument {
            pages: self.pages,
            kind: self.kind,
            fail_at: self.fail_at,
        }))
    }
}

/// Recognises page `n` as [`page_text`]`(n - 1)`, except pages listed as unreadable.
#[derive(Default)]
struct ScriptedOcr {
    unreadable: HashSet<usize>,
    calls: AtomicUsize,
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, page: usize, _image: &DynamicImage) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreadable.contains(&page) {
            return Err(OcrError::Failed {
                page,
                detail: "smudged".into(),
            });
        }
        Ok(page_text(page - 1))
    }
}

/// Answers `Merchant|Category` from a fixed table; can be told to fail.
struct TableBackend {
    fail: bool,
    fail_first_call: bool,
    calls: AtomicUsize,
    /// Merchants of every call, in call order.
    seen: Mutex<Vec<Vec<String>>>,
}

impl TableBackend {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            fail_first_call: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Fails the first call only; later calls answer from the table.
    fn flaky() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            fail_first_call: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CategoryBackend for TableBackend {
    async fn classify(
        &self,
        merchants: &[String],
        _taxonomy: &[Category],
    ) -> Result<String, CategorizeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(merchants.to_vec());
        if self.fail || (self.fail_first_call && call == 0) {
            return Err(CategorizeError::Backend("rate limited".into()));
        }
        Ok(merchants
            .iter()
            .map(|m| {
                let category = match m.as_str() {
                    "Coffee House" => "Food",
                    "Metro Rail" => "Travel",
                    "City Pharmacy" => "Health",
                    _ => "Other",
                };
                format!("{m}|{category}")
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Records every callback in order.
#[derive(Default)]
struct Recorder {
    starts: Mutex<Vec<usize>>,
    progress: Mutex<Vec<f64>>,
    chunks: Mutex<Vec<(usize, usize)>>,
    completed: AtomicUsize,
    failed: Mutex<Vec<String>>,
}

impl IngestProgressCallback for Recorder {
    fn on_job_start(&self, _job: JobId, total_pages: usize) {
        self.starts.lock().unwrap().push(total_pages);
    }

    fn on_chunk_complete(&self, _job: JobId, chunk: &Chunk, _committed: usize, progress: f64) {
        self.chunks.lock().unwrap().push((chunk.start, chunk.end));
        self.progress.lock().unwrap().push(progress);
    }

    fn on_job_complete(&self, _job: JobId, _transactions: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_job_failed(&self, _job: JobId, reason: &str) {
        self.failed.lock().unwrap().push(reason.to_string());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pdf_bytes() -> DocumentInput {
    DocumentInput::Bytes(b"%PDF-1.7\n% fake statement\n".to_vec())
}

fn runner_with(
    opener: Arc<dyn DocumentOpener>,
    ocr: Arc<dyn OcrEngine>,
    backend: Arc<dyn CategoryBackend>,
    store: Arc<dyn IngestStore>,
) -> IngestionJobRunner {
    IngestionJobRunner::new(
        opener,
        PageTextExtractor::new(ocr, 50).with_concurrency(4),
        CategoryAssigner::new(backend, 50, Category::ALL.to_vec()),
        store,
        RunnerSettings {
            chunk_size: 50,
            ..RunnerSettings::default()
        },
    )
}

fn text_runner(pages: usize, store: Arc<dyn IngestStore>) -> IngestionJobRunner {
    runner_with(
        FakeOpener::text(pages),
        Arc::new(ScriptedOcr::default()),
        TableBackend::new(false),
        store,
    )
}

// ── Runner ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn runner_commits_every_chunk_then_completes() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(Recorder::default());
    let runner = text_runner(120, store.clone()).with_progress(recorder.clone());

    let job = runner.create_job("alice").await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();
    assert_eq!(summary.transactions, 120);
    assert_eq!(summary.rejected_blocks, 0);
    assert_eq!(summary.job.status, JobStatus::Completed);

    assert_eq!(*recorder.starts.lock().unwrap(), vec![120]);
    assert_eq!(
        *recorder.chunks.lock().unwrap(),
        vec![(0, 50), (50, 100), (100, 120)]
    );
    let progress = recorder.progress.lock().unwrap().clone();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert!((progress[0] - 41.666).abs() < 0.01);
    assert_eq!(*progress.last().unwrap(), 100.0);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);

    let stored = store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100.0);
    assert_eq!(stored.total_pages, 120);
    assert!(stored.failure.is_none());

    let rows = store.transactions_for_job(job.id).await.unwrap();
    assert_eq!(rows.len(), 120);
    assert!(rows.iter().all(|t| t.owner == "alice" && t.job_id == job.id));
    let first = &rows[0];
    assert_eq!(first.merchant, "Coffee House");
    assert_eq!(first.category, Category::Food);
    assert_eq!(first.amount, 100.0);
    assert_eq!(first.raw_date, "Feb 1, 2026");
    assert!(first.txn_date.is_some());
    assert_eq!(rows[1].category, Category::Travel);
    assert_eq!(rows[2].category, Category::Health);
}

#[tokio::test]
async fn failure_on_second_chunk_keeps_first_chunk() {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(Recorder::default());
    let runner = runner_with(
        Arc::new(FakeOpener {
            pages: 120,
            kind: PageKind::Text,
            fail_at: Some(50),
        }),
        Arc::new(ScriptedOcr::default()),
        TableBackend::new(false),
        store.clone(),
    )
    .with_progress(recorder.clone());

    let job = runner.create_job("bob").await.unwrap();
    let err = runner.run(job.id, &pdf_bytes()).await.unwrap_err();
    assert!(matches!(err, IngestError::CorruptPdf { .. }), "got {err:?}");

    let stored = store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!((stored.progress - 41.666).abs() < 0.01);
    assert!(stored.failure.as_deref().unwrap().contains("page 51"));

    assert_eq!(store.transactions_for_job(job.id).await.unwrap().len(), 50);
    assert_eq!(recorder.chunks.lock().unwrap().len(), 1);
    assert_eq!(recorder.failed.lock().unwrap().len(), 1);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn finished_job_cannot_run_again() {
    let store = Arc::new(MemoryStore::new());
    let runner = text_runner(3, store.clone());
    let job = runner.create_job("carol").await.unwrap();
    runner.run(job.id, &pdf_bytes()).await.unwrap();

    let err = runner.run(job.id, &pdf_bytes()).await.unwrap_err();
    assert!(
        matches!(
            err,
            IngestError::InvalidTransition {
                status: JobStatus::Completed,
                ..
            }
        ),
        "got {err:?}"
    );

    // The refused run left the job and its rows alone.
    let stored = store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(store.transactions_for_job(job.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_runs_of_one_job_execute_once() {
    let store = Arc::new(MemoryStore::new());
    let runner = text_runner(60, store.clone());
    let job = runner.create_job("judy").await.unwrap();
    let input = pdf_bytes();

    let (a, b) = tokio::join!(runner.run(job.id, &input), runner.run(job.id, &input));
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(IngestError::InvalidTransition { .. }))));
    assert_eq!(store.transactions_for_job(job.id).await.unwrap().len(), 60);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let runner = text_runner(1, Arc::new(MemoryStore::new()));
    let ghost = JobId::new();
    let err = runner.run(ghost, &pdf_bytes()).await.unwrap_err();
    assert!(matches!(err, IngestError::JobNotFound(id) if id == ghost));
}

#[tokio::test]
async fn non_pdf_input_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let runner = text_runner(5, store.clone());
    let job = runner.create_job("dave").await.unwrap();

    let err = runner
        .run(job.id, &DocumentInput::Bytes(b"PK\x03\x04zip".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotAPdf { .. }), "got {err:?}");

    let stored = store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.progress, 0.0);
}

#[tokio::test]
async fn empty_document_completes_at_full_progress() {
    let store = Arc::new(MemoryStore::new());
    let runner = text_runner(0, store.clone());
    let job = runner.create_job("erin").await.unwrap();

    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();
    assert_eq!(summary.transactions, 0);
    assert_eq!(summary.job.status, JobStatus::Completed);
    assert_eq!(summary.job.progress, 100.0);
}

#[tokio::test]
async fn scanned_pages_are_recognised_once() {
    let store = Arc::new(MemoryStore::new());
    let ocr = Arc::new(ScriptedOcr {
        unreadable: HashSet::from([2]),
        calls: AtomicUsize::new(0),
    });
    let runner = runner_with(
        Arc::new(FakeOpener {
            pages: 4,
            kind: PageKind::Scanned,
            fail_at: None,
        }),
        ocr.clone(),
        TableBackend::new(false),
        store.clone(),
    );

    let job = runner.create_job("frank").await.unwrap();
    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();

    assert_eq!(ocr.calls.load(Ordering::SeqCst), 4);
    assert_eq!(summary.pages_recognized, 3);
    assert_eq!(summary.pages_blank, 1);
    assert_eq!(summary.transactions, 3);

    // Page 2 (index 1) is the unreadable one; its merchant never appears.
    let merchants: Vec<String> = store
        .transactions_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.merchant)
        .collect();
    assert_eq!(merchants, vec!["Coffee House", "City Pharmacy", "Coffee House"]);
}

#[tokio::test]
async fn categorizer_outage_falls_back_to_other() {
    let store = Arc::new(MemoryStore::new());
    let backend = TableBackend::new(true);
    let runner = runner_with(
        FakeOpener::text(10),
        Arc::new(ScriptedOcr::default()),
        backend.clone(),
        store.clone(),
    );

    let job = runner.create_job("grace").await.unwrap();
    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();
    assert_eq!(summary.job.status, JobStatus::Completed);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

    let rows = store.transactions_for_job(job.id).await.unwrap();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|t| t.category == Category::Other));
}

#[tokio::test]
async fn categorizer_runs_per_chunk_and_outage_stays_in_its_chunk() {
    let store = Arc::new(MemoryStore::new());
    let backend = TableBackend::flaky();
    let runner = IngestionJobRunner::new(
        FakeOpener::text(6),
        PageTextExtractor::new(Arc::new(ScriptedOcr::default()), 50),
        CategoryAssigner::new(backend.clone(), 50, Category::ALL.to_vec()),
        store.clone(),
        RunnerSettings {
            chunk_size: 2,
            ..RunnerSettings::default()
        },
    );

    let job = runner.create_job("kate").await.unwrap();
    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();
    assert_eq!(summary.job.status, JobStatus::Completed);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

    // Each call carries exactly the unique merchants of its own chunk.
    let seen: Vec<HashSet<String>> = backend
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|call| call.iter().cloned().collect())
        .collect();
    let chunk_merchants = |pages: Range<usize>| -> HashSet<String> {
        pages
            .map(|p| MERCHANTS[p % MERCHANTS.len()].to_string())
            .collect()
    };
    assert_eq!(
        seen,
        vec![chunk_merchants(0..2), chunk_merchants(2..4), chunk_merchants(4..6)]
    );

    let categories: Vec<(String, Category)> = store
        .transactions_for_job(job.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.merchant, t.category))
        .collect();
    let expected = [
        ("Coffee House", Category::Other),
        ("Metro Rail", Category::Other),
        ("City Pharmacy", Category::Health),
        ("Coffee House", Category::Food),
        ("Metro Rail", Category::Travel),
        ("City Pharmacy", Category::Health),
    ]
    .map(|(m, c)| (m.to_string(), c))
    .to_vec();
    assert_eq!(categories, expected);
}

#[tokio::test]
async fn pages_the_extractor_recognises_are_rasterised() {
    let store = Arc::new(MemoryStore::new());
    let ocr = Arc::new(ScriptedOcr::default());
    // The text layer is a complete block but shorter than 100 characters.
    assert!(needs_recognition(&page_text(0), 100));
    assert!(!needs_recognition(&page_text(0), RenderPlan::default().min_text_chars));

    let runner = IngestionJobRunner::new(
        Arc::new(FakeOpener {
            pages: 1,
            kind: PageKind::Sparse,
            fail_at: None,
        }),
        PageTextExtractor::new(ocr.clone(), 100),
        CategoryAssigner::new(TableBackend::new(false), 50, Category::ALL.to_vec()),
        store.clone(),
        RunnerSettings::default(),
    );

    let job = runner.create_job("leo").await.unwrap();
    let summary = runner.run(job.id, &pdf_bytes()).await.unwrap();
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.pages_recognized, 1);
    assert_eq!(summary.pages_blank, 0);
    assert_eq!(summary.transactions, 1);

    let rows = store.transactions_for_job(job.id).await.unwrap();
    assert_eq!(rows[0].merchant, "Coffee House");
}

#[tokio::test]
async fn runner_persists_to_json_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn IngestStore> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
    let runner = text_runner(60, Arc::clone(&store));
    let job = runner.create_job("heidi").await.unwrap();
    runner.run(job.id, &pdf_bytes()).await.unwrap();

    let reopened = JsonStore::open(dir.path()).await.unwrap();
    let stored = reopened.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(reopened.transactions_for_job(job.id).await.unwrap().len(), 60);
}

// ── Service ──────────────────────────────────────────────────────────────────

fn service(pages: usize, store: Arc<dyn IngestStore>) -> IngestService {
    IngestService::start(
        text_runner(pages, store),
        ServiceSettings {
            max_concurrent_jobs: 2,
            queue_capacity: 8,
            event_capacity: 256,
        },
    )
}

#[tokio::test]
async fn submit_returns_pending_job_and_shutdown_drains() {
    let store = Arc::new(MemoryStore::new());
    let service = service(75, store.clone());

    let mut ids = Vec::new();
    for owner in ["u1", "u2", "u3", "u4"] {
        let id = service.submit(pdf_bytes(), owner).await.unwrap();
        let status = service.get_status(id).await.unwrap();
        assert_eq!(status.owner, owner);
        // submit hands the job to the queue without waiting for it to run.
        assert!(
            matches!(status.status, JobStatus::Pending | JobStatus::Processing),
            "{:?}",
            status.status
        );
        ids.push(id);
    }

    service.shutdown().await.unwrap();
    // Second call is a no-op.
    service.shutdown().await.unwrap();

    for id in ids {
        let job = service.get_status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(service.transactions(id).await.unwrap().len(), 75);
    }
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let service = service(1, Arc::new(MemoryStore::new()));
    let ghost = JobId::new();
    assert!(matches!(
        service.get_status(ghost).await,
        Err(IngestError::JobNotFound(_))
    ));
    assert!(matches!(
        service.transactions(ghost).await,
        Err(IngestError::JobNotFound(_))
    ));
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn submit_after_shutdown_is_refused() {
    let service = service(1, Arc::new(MemoryStore::new()));
    service.shutdown().await.unwrap();
    let err = service.submit(pdf_bytes(), "late").await.unwrap_err();
    assert!(matches!(err, IngestError::ServiceClosed));
}

#[tokio::test]
async fn subscribers_see_ordered_events_per_job() {
    let store = Arc::new(MemoryStore::new());
    let service = service(120, store);
    let mut events = service.subscribe();

    let id = service.submit(pdf_bytes(), "ivan").await.unwrap();

    let mut seen = Vec::new();
    let collect = async {
        while let Some(event) = events.next().await {
            if event.job() != id {
                continue;
            }
            let done = event.is_terminal();
            seen.push(event);
            if done {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("job did not finish in time");

    assert!(matches!(
        seen.first(),
        Some(JobEvent::Started {
            total_pages: 120,
            ..
        })
    ));
    let progress: Vec<f64> = seen
        .iter()
        .filter_map(|e| match e {
            JobEvent::ChunkCommitted { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(matches!(
        seen.last(),
        Some(JobEvent::Completed {
            transactions: 120,
            ..
        })
    ));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn a_failing_job_does_not_stop_the_others() {
    let store: Arc<dyn IngestStore> = Arc::new(MemoryStore::new());
    let runner = runner_with(
        FakeOpener::text(5),
        Arc::new(ScriptedOcr::default()),
        TableBackend::new(false),
        Arc::clone(&store),
    );
    let service = IngestService::start(runner, ServiceSettings::default());

    let bad = service
        .submit(DocumentInput::Bytes(b"not a pdf".to_vec()), "x")
        .await
        .unwrap();
    let good = service.submit(pdf_bytes(), "x").await.unwrap();
    service.shutdown().await.unwrap();

    let bad = service.get_status(bad).await.unwrap();
    assert_eq!(bad.status, JobStatus::Failed);
    assert!(bad.failure.is_some());
    assert_eq!(
        service.get_status(good).await.unwrap().status,
        JobStatus::Completed
    );
}
