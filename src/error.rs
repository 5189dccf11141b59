//! Error types for the statement2txn library.
//!
//! Two families of errors reflect two distinct failure modes:
//!
//! * [`IngestError`]: **Fatal for a job** (or a caller mistake): the document
//!   cannot be opened, the store rejected a write, the job id is unknown. A
//!   running job that hits one of these is marked FAILED; chunks it already
//!   committed stay committed.
//!
//! * [`OcrError`], [`CategorizeError`]: **Non-fatal, per unit**: one page
//!   could not be recognised, one categorization batch failed. The pipeline
//!   maps these to documented defaults (empty page text, `Other` category)
//!   and keeps going.
//!
//! [`StoreError`] is what an [`crate::store::IngestStore`] backend reports; it
//! becomes fatal once it reaches the runner.

use crate::job::{JobId, JobStatus};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the statement2txn library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Statement file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// No job with this id exists in the store.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// A job state change that the lifecycle does not allow.
    #[error("Job {job}: cannot {action} while {status}")]
    InvalidTransition {
        job: JobId,
        status: JobStatus,
        action: &'static str,
    },

    /// The persistence backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The service is shutting down and no longer accepts jobs.
    #[error("Ingestion service is shut down")]
    ServiceClosed,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A recognition failure for a single page.
///
/// Never propagated out of [`crate::pipeline::extract::PageTextExtractor`];
/// the page degrades to empty text instead.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine cannot run at all (binary missing, OCR disabled).
    #[error("OCR backend '{backend}' unavailable: {detail}")]
    Unavailable { backend: String, detail: String },

    /// The engine ran but failed on this page.
    #[error("Page {page}: OCR failed: {detail}")]
    Failed { page: usize, detail: String },

    /// The engine did not answer within the configured bound.
    #[error("Page {page}: OCR timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A failure of one categorization batch.
///
/// Every merchant in the failed batch falls back to
/// [`crate::model::Category::Other`].
#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("Categorization backend error: {0}")]
    Backend(String),

    #[error("Categorization timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Categorization disabled")]
    Disabled,
}

/// Errors reported by an [`crate::store::IngestStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store record is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    #[error("Job {0} not found in store")]
    MissingJob(JobId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let job = JobId::new();
        let e = IngestError::InvalidTransition {
            job,
            status: JobStatus::Completed,
            action: "start",
        };
        let msg = e.to_string();
        assert!(msg.contains("cannot start"), "got: {msg}");
        assert!(msg.contains("COMPLETED"), "got: {msg}");
    }

    #[test]
    fn store_error_is_transparent() {
        let job = JobId::new();
        let e: IngestError = StoreError::MissingJob(job).into();
        assert_eq!(e.to_string(), format!("Job {job} not found in store"));
    }

    #[test]
    fn ocr_timeout_display() {
        let e = OcrError::Timeout { page: 7, secs: 120 };
        assert!(e.to_string().contains("Page 7"));
        assert!(e.to_string().contains("120s"));
    }
}
