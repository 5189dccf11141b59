//! # statement2txn
//!
//! Turn financial-statement PDFs, text-based or scanned, into categorized
//! transaction records, tracked as durable jobs.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (path, URL or bytes)
//!  │
//!  ├─ 1. Input     resolve local file, download URL, or spill bytes; check %PDF
//!  ├─ 2. Load      per chunk of pages: text layer + raster via pdfium (spawn_blocking)
//!  ├─ 3. Extract   text layer, or OCR (tesseract / vision LLM) when it is too short
//!  ├─ 4. Parse     date-anchored blocks → TransactionRecord (line state machine)
//!  ├─ 5. Classify  unique merchants, batched LLM calls → Category
//!  └─ 6. Commit    append rows, save job progress, notify observers
//! ```
//!
//! Each chunk is committed before the next one starts: a job that fails on a
//! later chunk keeps the rows of the chunks before it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statement2txn::{ingest, IngestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Categorization provider auto-detected from OPENAI_API_KEY etc.
//!     let config = IngestConfig::default();
//!     let output = ingest("statement.pdf", &config).await?;
//!     for t in &output.transactions {
//!         println!("{} {:>10.2} {:<8} {}", t.raw_date, t.amount, t.category, t.merchant);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Background Jobs
//!
//! ```rust,no_run
//! use statement2txn::{IngestConfig, IngestService, JsonStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::builder().max_concurrent_jobs(4).build()?;
//! let store = Arc::new(JsonStore::open("./ingest-store").await?);
//! let service = IngestService::from_config(&config, store)?;
//!
//! let id = service.submit("statement.pdf", "alice").await?;
//! service.shutdown().await?;
//! println!("{:?}", service.get_status(id).await?.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stmt2txn` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! statement2txn = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime Requirements
//!
//! * A pdfium shared library (`PDFIUM_LIB_PATH`, the working directory, or the
//!   system library path).
//! * `tesseract` on `PATH` for scanned pages with the default OCR backend.
//! * An LLM provider key when categorization or vision OCR is enabled.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod runner;
pub mod service;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, OcrBackendKind};
pub use error::{CategorizeError, IngestError, OcrError, StoreError};
pub use ingest::{
    ingest, ingest_bytes, ingest_sync, inspect, inspect_with_password, write_json, IngestOutput,
    IngestStats,
};
pub use job::{plan_chunks, Chunk, JobId, JobRecord, JobStatus};
pub use model::{Category, Direction, StoredTransaction, TransactionRecord};
pub use pipeline::categorize::{CategoryAssigner, CategoryBackend};
pub use pipeline::extract::{PageText, PageTextExtractor, TextSource};
pub use pipeline::input::DocumentInput;
pub use pipeline::ocr::OcrEngine;
pub use pipeline::parse::{parse_transactions, parse_with_report, ParseReport};
pub use pipeline::render::{DocumentMetadata, DocumentOpener, DocumentSource, RawPage, RenderPlan};
pub use progress::{
    IngestProgressCallback, JobEvent, JobEventStream, NoopProgressCallback, ProgressCallback,
};
pub use runner::{IngestionJobRunner, RunSummary, RunnerSettings};
pub use service::{IngestService, ServiceSettings};
pub use store::{IngestStore, JsonStore, MemoryStore};
