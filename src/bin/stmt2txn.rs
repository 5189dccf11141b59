//! CLI binary for statement2txn.
//!
//! A thin shim over the library crate: maps CLI flags to `IngestConfig`,
//! submits every input to an `IngestService`, and prints the transactions.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use statement2txn::{
    inspect_with_password, write_json, Category, Chunk, IngestConfig, IngestProgressCallback,
    IngestService, IngestStore, JobId, JobRecord, JobStatus, JsonStore, MemoryStore,
    OcrBackendKind, ProgressCallback, StoredTransaction,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per job, stacked in a [`MultiProgress`]. Jobs run concurrently, so
/// a bar may be asked for before or after its label is registered.
struct CliProgressCallback {
    multi: MultiProgress,
    bars: Mutex<HashMap<JobId, ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn bar(&self, job: JobId) -> ProgressBar {
        self.bars
            .lock()
            .unwrap()
            .entry(job)
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_strings(TICKS),
                );
                bar.set_message("queued…");
                bar.enable_steady_tick(Duration::from_millis(80));
                bar
            })
            .clone()
    }

    /// Attach the input name to a job's bar.
    fn register(&self, job: JobId, label: &str) {
        self.bar(job).set_prefix(label.to_string());
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_job_start(&self, job: JobId, total_pages: usize) {
        let bar = self.bar(job);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_message(format!("{total_pages} pages"));
        bar.reset_eta();
    }

    fn on_chunk_complete(&self, job: JobId, chunk: &Chunk, committed: usize, progress: f64) {
        let bar = self.bar(job);
        bar.set_position(progress.round() as u64);
        bar.set_message(format!(
            "pages {}-{}  {}",
            chunk.start + 1,
            chunk.end,
            dim(&format!("+{committed} txns"))
        ));
    }

    fn on_job_complete(&self, job: JobId, transactions: usize) {
        let bar = self.bar(job);
        bar.set_position(100);
        bar.finish_with_message(format!("{} {transactions} transactions", green("✔")));
    }

    fn on_job_failed(&self, job: JobId, reason: &str) {
        let first_line = reason.lines().next().unwrap_or(reason);
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(['…']).collect()
        } else {
            first_line.to_string()
        };
        self.bar(job).abandon_with_message(format!("{} {}", red("✘"), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract and categorize (table on stdout)
  stmt2txn statement.pdf

  # Several statements at once, JSON to a file
  stmt2txn jan.pdf feb.pdf mar.pdf --json -o transactions.json

  # Scanned statement, recognised with a vision model instead of tesseract
  stmt2txn --ocr vision --model gpt-4.1-mini scan.pdf

  # No LLM at all: every transaction is categorized "Other"
  stmt2txn --no-categorize statement.pdf

  # Persist jobs and transactions on disk
  stmt2txn --store ./ingest-store statement.pdf

  # Restrict the category set
  stmt2txn --categories food,travel,other statement.pdf

  # Inspect PDF metadata (no API key needed)
  stmt2txn --inspect-only statement.pdf

CATEGORIES:
  Food, Shopping, Travel, Bills, Entertainment, Transfer, Health, Other

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter, overrides -v / -q

SETUP:
  1. Install pdfium (or set PDFIUM_LIB_PATH) and tesseract for scanned pages.
  2. Set an API key:  export OPENAI_API_KEY=sk-...
  3. Run:             stmt2txn statement.pdf
"#;

/// Extract categorized transactions from financial-statement PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "stmt2txn",
    version,
    about = "Extract categorized transactions from financial-statement PDFs",
    long_about = "Extract transactions from text-based or scanned statement PDFs (local files, \
URLs) and assign each merchant a spending category with an LLM. Scanned pages are recognised with \
tesseract or a vision model.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write JSON results to this file (atomically) instead of stdout.
    #[arg(short, long, env = "STMT2TXN_OUTPUT")]
    output: Option<PathBuf>,

    /// Output structured JSON instead of a table.
    #[arg(long, env = "STMT2TXN_JSON")]
    json: bool,

    /// Persist jobs and transactions in this directory.
    #[arg(long, env = "STMT2TXN_STORE")]
    store: Option<PathBuf>,

    /// Owner recorded on every job and transaction.
    #[arg(long, env = "STMT2TXN_OWNER", default_value = "default_user")]
    owner: String,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Skip categorization; no LLM provider is needed.
    #[arg(long, env = "STMT2TXN_NO_CATEGORIZE")]
    no_categorize: bool,

    /// Comma-separated category set offered to the model.
    #[arg(long, env = "STMT2TXN_CATEGORIES", value_delimiter = ',',
          value_parser = |s: &str| s.parse::<Category>())]
    categories: Vec<Category>,

    /// OCR backend for pages without a usable text layer.
    #[arg(long, env = "STMT2TXN_OCR", value_enum, default_value = "tesseract")]
    ocr: OcrArg,

    /// Tesseract language code(s), e.g. eng or eng+hin.
    #[arg(long, env = "STMT2TXN_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Rendering DPI for OCR (72–400).
    #[arg(long, env = "STMT2TXN_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Pages processed and committed per chunk.
    #[arg(long, env = "STMT2TXN_CHUNK_SIZE", default_value_t = 50)]
    chunk_size: usize,

    /// Merchants per categorization request.
    #[arg(long, env = "STMT2TXN_BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Statements processed at the same time.
    #[arg(short = 'j', long, env = "STMT2TXN_JOBS", default_value_t = 2)]
    jobs: usize,

    /// PDF user password for encrypted statements.
    #[arg(long, env = "STMT2TXN_PASSWORD")]
    password: Option<String>,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "STMT2TXN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "STMT2TXN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bars.
    #[arg(long, env = "STMT2TXN_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STMT2TXN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STMT2TXN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrArg {
    Tesseract,
    Vision,
    None,
}

impl From<OcrArg> for OcrBackendKind {
    fn from(v: OcrArg) -> Self {
        match v {
            OcrArg::Tesseract => OcrBackendKind::Tesseract,
            OcrArg::Vision => OcrBackendKind::Vision,
            OcrArg::None => OcrBackendKind::Disabled,
        }
    }
}

/// One input's outcome, as printed or written with `--json`.
#[derive(Serialize)]
struct JobReport {
    input: String,
    job: JobRecord,
    transactions: Vec<StoredTransaction>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would interleave with the bars; keep them quiet then.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let meta = inspect_with_password(input.as_str(), cli.password.as_deref())
                .await
                .with_context(|| format!("Failed to inspect {input}"))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
                );
                continue;
            }
            println!("File:         {}", input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = meta.author {
                println!("Author:       {}", a);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref d) = meta.creation_date {
                println!("Created:      {}", d);
            }
            println!();
        }
        return Ok(());
    }

    // ── Build config and service ─────────────────────────────────────────
    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;

    let store: Arc<dyn IngestStore> = match &cli.store {
        Some(dir) => Arc::new(
            JsonStore::open(dir)
                .await
                .with_context(|| format!("Failed to open store at {}", dir.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let service = IngestService::from_config(&config, Arc::clone(&store))
        .context("Failed to start ingestion service")?;

    // ── Submit, then drain ───────────────────────────────────────────────
    let mut submitted = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let id = service
            .submit(input.as_str(), &cli.owner)
            .await
            .with_context(|| format!("Failed to submit {input}"))?;
        if let Some(ref p) = progress {
            p.register(id, &short_label(input));
        }
        submitted.push((input.clone(), id));
    }

    service.shutdown().await.context("Ingestion service failed")?;

    let mut reports = Vec::with_capacity(submitted.len());
    for (input, id) in submitted {
        reports.push(JobReport {
            job: service.get_status(id).await?,
            transactions: service.transactions(id).await?,
            input,
        });
    }

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref path) = cli.output {
        write_json(&reports, path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            let total: usize = reports.iter().map(|r| r.transactions.len()).sum();
            eprintln!(
                "{}  {} transactions  →  {}",
                green("✔"),
                total,
                bold(&path.display().to_string())
            );
        }
    } else if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise output")?
        );
    } else {
        for report in &reports {
            print_table(report);
        }
    }

    let failed: Vec<&JobReport> = reports
        .iter()
        .filter(|r| r.job.status == JobStatus::Failed)
        .collect();
    if !failed.is_empty() {
        for r in &failed {
            eprintln!(
                "{} {}: {}",
                red("✘"),
                r.input,
                r.job.failure.as_deref().unwrap_or("unknown failure")
            );
        }
        anyhow::bail!("{} of {} job(s) failed", failed.len(), reports.len());
    }

    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .dpi(cli.dpi)
        .chunk_size(cli.chunk_size)
        .batch_size(cli.batch_size)
        .ocr(cli.ocr.into())
        .ocr_language(cli.ocr_lang.clone())
        .categorize(!cli.no_categorize)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .owner(cli.owner.clone())
        .max_concurrent_jobs(cli.jobs);

    if !cli.categories.is_empty() {
        builder = builder.taxonomy(cli.categories.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// File name for local paths, the full string for URLs, capped for the bar.
fn short_label(input: &str) -> String {
    let name = if input.starts_with("http://") || input.starts_with("https://") {
        input
    } else {
        std::path::Path::new(input)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(input)
    };
    let len = name.chars().count();
    if len > 32 {
        let tail: String = name.chars().skip(len - 31).collect();
        format!("…{tail}")
    } else {
        name.to_string()
    }
}

fn print_table(report: &JobReport) {
    let status = match report.job.status {
        JobStatus::Completed => green(report.job.status.as_str()),
        JobStatus::Failed => red(report.job.status.as_str()),
        _ => cyan(report.job.status.as_str()),
    };
    println!(
        "{} {}  {}  {}",
        cyan("◆"),
        bold(&report.input),
        status,
        dim(&format!(
            "{} pages, {} transactions, job {}",
            report.job.total_pages,
            report.transactions.len(),
            report.job.id
        ))
    );
    if report.transactions.is_empty() {
        println!();
        return;
    }

    let merchant_w = report
        .transactions
        .iter()
        .map(|t| t.merchant.chars().count())
        .max()
        .unwrap_or(8)
        .clamp(8, 40);

    println!(
        "  {:<12}  {:<merchant_w$}  {:>12}  {:<6}  {}",
        "DATE", "MERCHANT", "AMOUNT", "TYPE", "CATEGORY"
    );
    for t in &report.transactions {
        let merchant: String = t.merchant.chars().take(merchant_w).collect();
        println!(
            "  {:<12}  {:<merchant_w$}  {:>12.2}  {:<6}  {}",
            t.raw_date,
            merchant,
            t.amount,
            t.direction.as_str(),
            t.category
        );
    }
    println!();
}
