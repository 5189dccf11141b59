//! Input resolution: turn a submitted document into a local PDF path.
//!
//! pdfium needs a file-system path, so URLs are downloaded into a `TempDir`
//! and in-memory uploads are spilled into a `NamedTempFile`. Either is removed
//! when the [`ResolvedInput`] is dropped. The `%PDF` magic bytes are checked
//! before anything reaches pdfium so callers get [`IngestError::NotAPdf`]
//! rather than a parser error.

use crate::error::IngestError;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A statement document as submitted by a caller.
#[derive(Clone)]
pub enum DocumentInput {
    /// Local path or HTTP(S) URL.
    Location(String),
    /// Raw PDF bytes, e.g. an upload body.
    Bytes(Vec<u8>),
}

impl DocumentInput {
    /// Short human-readable label for logs and progress bars.
    pub fn describe(&self) -> String {
        match self {
            DocumentInput::Location(s) => s.clone(),
            DocumentInput::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl fmt::Debug for DocumentInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentInput::Location(s) => f.debug_tuple("Location").field(s).finish(),
            DocumentInput::Bytes(b) => write!(f, "Bytes(<{} bytes>)", b.len()),
        }
    }
}

impl From<&str> for DocumentInput {
    fn from(s: &str) -> Self {
        DocumentInput::Location(s.to_string())
    }
}

impl From<String> for DocumentInput {
    fn from(s: String) -> Self {
        DocumentInput::Location(s)
    }
}

impl From<&Path> for DocumentInput {
    fn from(p: &Path) -> Self {
        DocumentInput::Location(p.to_string_lossy().into_owned())
    }
}

impl From<Vec<u8>> for DocumentInput {
    fn from(b: Vec<u8>) -> Self {
        DocumentInput::Bytes(b)
    }
}

/// A document available on the local file system for the lifetime of this value.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the PDF lives in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
    /// Input was a byte buffer spilled to a temp file.
    Buffered(NamedTempFile),
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Buffered(file) => file.path(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a submitted document to a local, magic-checked PDF.
pub async fn resolve_input(
    input: &DocumentInput,
    timeout_secs: u64,
) -> Result<ResolvedInput, IngestError> {
    match input {
        DocumentInput::Location(s) if is_url(s) => download_url(s, timeout_secs).await,
        DocumentInput::Location(s) => resolve_local(s),
        DocumentInput::Bytes(bytes) => spill_bytes(bytes),
    }
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), IngestError> {
    if head.len() >= 4 && &head[..4] == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(IngestError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, IngestError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(IngestError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(f) => {
            let mut head = Vec::with_capacity(4);
            f.take(4)
                .read_to_end(&mut head)
                .map_err(|e| IngestError::Internal(format!("read {}: {e}", path.display())))?;
            check_magic(&path, &head)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IngestError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(IngestError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write an uploaded buffer to a temp file pdfium can open.
fn spill_bytes(bytes: &[u8]) -> Result<ResolvedInput, IngestError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("statement-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| IngestError::Internal(format!("tempfile: {e}")))?;
    check_magic(tmp.path(), bytes)?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| IngestError::Internal(format!("tempfile write: {e}")))?;
    debug!("Spilled {} bytes to {}", bytes.len(), tmp.path().display());
    Ok(ResolvedInput::Buffered(tmp))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, IngestError> {
    info!("Downloading statement from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IngestError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_err = |e: reqwest::Error| {
        if e.is_timeout() {
            IngestError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            IngestError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_err)?;

    if !response.status().is_success() {
        return Err(IngestError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| IngestError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(to_err)?;
    check_magic(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| IngestError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "statement.pdf".to_string()
}
