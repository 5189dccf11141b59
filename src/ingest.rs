//! One-shot ingestion entry points.
//!
//! These run a single job to completion in-process against a fresh
//! [`MemoryStore`] and hand back everything it produced. Use
//! [`crate::service::IngestService`] instead when jobs should run in the
//! background, outlive the call, or be persisted with a [`crate::store::JsonStore`].

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::job::JobRecord;
use crate::model::StoredTransaction;
use crate::pipeline::input::{resolve_input, DocumentInput};
use crate::pipeline::render::{extract_metadata, DocumentMetadata};
use crate::runner::IngestionJobRunner;
use crate::store::{IngestStore, MemoryStore};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything one completed ingestion produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutput {
    /// Final record; always COMPLETED.
    pub job: JobRecord,
    pub transactions: Vec<StoredTransaction>,
    pub stats: IngestStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub total_pages: usize,
    /// Pages whose text came from OCR.
    pub pages_recognized: usize,
    /// Pages with neither a text layer nor recognised text.
    pub pages_blank: usize,
    /// Date-anchored blocks that failed validation.
    pub rejected_blocks: usize,
    pub duration_ms: u64,
}

/// Ingest a statement and return its categorized transactions.
///
/// `input` is a local path, an HTTP(S) URL, or raw bytes. The job is owned by
/// `config.owner`.
///
/// # Errors
/// Whatever failed the job: unreadable or non-PDF input, pdfium problems,
/// a missing LLM provider when categorization is on.
///
/// # Example
/// ```rust,no_run
/// use statement2txn::{ingest, IngestConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IngestConfig::builder().categorize(false).build()?;
/// let output = ingest("statement.pdf", &config).await?;
/// for t in &output.transactions {
///     println!("{} {:>10.2} {}", t.raw_date, t.amount, t.merchant);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn ingest(
    input: impl Into<DocumentInput>,
    config: &IngestConfig,
) -> Result<IngestOutput, IngestError> {
    let input = input.into();
    let store = Arc::new(MemoryStore::new());
    let runner = IngestionJobRunner::from_config(config, store.clone())?;

    let job = runner.create_job(&config.owner).await?;
    let summary = runner.run(job.id, &input).await?;
    let transactions = store.transactions_for_job(job.id).await?;

    info!(
        job = %job.id,
        transactions = transactions.len(),
        "Ingested {}",
        input.describe()
    );

    Ok(IngestOutput {
        stats: IngestStats {
            total_pages: summary.job.total_pages,
            pages_recognized: summary.pages_recognized,
            pages_blank: summary.pages_blank,
            rejected_blocks: summary.rejected_blocks,
            duration_ms: summary.duration_ms,
        },
        job: summary.job,
        transactions,
    })
}

/// [`ingest`] over an in-memory PDF. The bytes are spilled to a temp file that
/// is removed when the call returns.
pub async fn ingest_bytes(
    bytes: impl Into<Vec<u8>>,
    config: &IngestConfig,
) -> Result<IngestOutput, IngestError> {
    ingest(DocumentInput::Bytes(bytes.into()), config).await
}

/// Blocking wrapper around [`ingest`] with its own Tokio runtime.
///
/// Must not be called from inside a runtime.
pub fn ingest_sync(
    input: impl Into<DocumentInput>,
    config: &IngestConfig,
) -> Result<IngestOutput, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest(input, config))
}

/// Read document metadata without OCR or an LLM provider.
pub async fn inspect(input: impl Into<DocumentInput>) -> Result<DocumentMetadata, IngestError> {
    inspect_with_password(input, None).await
}

pub async fn inspect_with_password(
    input: impl Into<DocumentInput>,
    password: Option<&str>,
) -> Result<DocumentMetadata, IngestError> {
    let resolved = resolve_input(&input.into(), 120).await?;
    extract_metadata(resolved.path(), password).await
}

/// Serialize `value` as pretty JSON to `path`, via a temp file and rename.
pub async fn write_json<T: Serialize + ?Sized>(
    value: &T,
    path: impl AsRef<Path>,
) -> Result<(), IngestError> {
    let path = path.as_ref();
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| IngestError::Internal(format!("JSON encoding failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_failure(parent, e))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| io_failure(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_failure(path, e))?;
    Ok(())
}

fn io_failure(path: &Path, source: std::io::Error) -> IngestError {
    IngestError::Store(crate::error::StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_json_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("txns.json");

        write_json(&vec![1, 2, 3], &path).await.unwrap();
        write_json(&vec![4], &path).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<i32> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, vec![4]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn ingest_rejects_non_pdf_bytes() {
        let config = IngestConfig::builder()
            .categorize(false)
            .ocr(crate::config::OcrBackendKind::Disabled)
            .build()
            .unwrap();
        let err = ingest_bytes(b"hello world".to_vec(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotAPdf { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn inspect_missing_file_is_not_found() {
        let err = inspect("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, IngestError::FileNotFound { .. }), "got {err:?}");
    }
}
