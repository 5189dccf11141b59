//! Page loading via pdfium: text layer for every page, raster for the pages
//! that need recognition.
//!
//! pdfium is a blocking C++ library with thread-local state, so every call
//! runs inside `tokio::task::spawn_blocking`. A chunk of pages is loaded in a
//! single blocking call; the document is reopened per chunk so no pdfium
//! handle ever crosses an `.await`.
//!
//! The [`DocumentOpener`] / [`DocumentSource`] traits are the seam between
//! the job runner and pdfium; tests substitute in-memory documents.

use crate::error::IngestError;
use crate::pipeline::extract::needs_recognition;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How pages are turned into [`RawPage`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPlan {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    /// Pages whose text layer is shorter than this get a raster.
    pub min_text_chars: usize,
}

impl Default for RenderPlan {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            min_text_chars: 50,
        }
    }
}

/// One loaded page, before text extraction.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// 0-based page index.
    pub index: usize,
    /// Embedded text layer, possibly empty.
    pub text_layer: String,
    /// Present only when the text layer was too short and rendering succeeded.
    pub raster: Option<DynamicImage>,
}

/// An opened statement document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Load pages `range` in order. Out-of-range indices are skipped.
    async fn load_pages(
        &self,
        range: Range<usize>,
        plan: &RenderPlan,
    ) -> Result<Vec<RawPage>, IngestError>;
}

/// Opens a local PDF as a [`DocumentSource`].
#[async_trait]
pub trait DocumentOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentSource>, IngestError>;
}

/// Document metadata, available without OCR or LLM calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` may name the library file or its directory; otherwise the
/// working directory is tried, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.trim().is_empty() => {
            let path = PathBuf::from(p.trim());
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(lib)
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

fn load_error(path: &Path, password: Option<&str>, e: PdfiumError) -> IngestError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            IngestError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            IngestError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        IngestError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

/// Opens PDFs with pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumOpener {
    password: Option<String>,
}

impl PdfiumOpener {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl DocumentOpener for PdfiumOpener {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentSource>, IngestError> {
        let metadata = extract_metadata(path, self.password.as_deref()).await?;
        info!(
            pages = metadata.page_count,
            version = %metadata.pdf_version,
            "Opened {}",
            path.display()
        );
        Ok(Arc::new(PdfiumSource {
            path: path.to_path_buf(),
            password: self.password.clone(),
            page_count: metadata.page_count,
        }))
    }
}

/// A PDF on disk, read chunk by chunk.
#[derive(Debug, Clone)]
pub struct PdfiumSource {
    path: PathBuf,
    password: Option<String>,
    page_count: usize,
}

#[async_trait]
impl DocumentSource for PdfiumSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn load_pages(
        &self,
        range: Range<usize>,
        plan: &RenderPlan,
    ) -> Result<Vec<RawPage>, IngestError> {
        let path = self.path.clone();
        let password = self.password.clone();
        let plan = *plan;

        tokio::task::spawn_blocking(move || {
            load_pages_blocking(&path, password.as_deref(), range, &plan)
        })
        .await
        .map_err(|e| IngestError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// pdfium addresses pages with a `u16`.
fn pdfium_page_index(pdf_path: &Path, idx: usize) -> Result<u16, IngestError> {
    u16::try_from(idx).map_err(|_| IngestError::CorruptPdf {
        path: pdf_path.to_path_buf(),
        detail: format!("page {} is beyond the addressable page range", idx + 1),
    })
}

fn load_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    range: Range<usize>,
    plan: &RenderPlan,
) -> Result<Vec<RawPage>, IngestError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(plan.dpi as f32 / 72.0)
        .set_maximum_width(plan.max_rendered_pixels as i32)
        .set_maximum_height(plan.max_rendered_pixels as i32);

    let mut results = Vec::with_capacity(range.len());

    for idx in range {
        if idx >= total_pages {
            warn!(page = idx + 1, total_pages, "Skipping page out of range");
            continue;
        }

        let page_index = pdfium_page_index(pdf_path, idx)?;
        let page = pages
            .get(page_index)
            .map_err(|e| IngestError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {:?}", idx + 1, e),
            })?;

        let text_layer = match page.text() {
            Ok(text) => text.all(),
            Err(e) => {
                debug!(page = idx + 1, "No text layer: {:?}", e);
                String::new()
            }
        };

        let raster = if needs_recognition(&text_layer, plan.min_text_chars) {
            match page.render_with_config(&render_config) {
                Ok(bitmap) => {
                    let image = bitmap.as_image();
                    debug!(
                        page = idx + 1,
                        "Rendered {}x{} px for recognition",
                        image.width(),
                        image.height()
                    );
                    Some(image)
                }
                Err(e) => {
                    warn!(page = idx + 1, "Render failed: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        results.push(RawPage {
            index: idx,
            text_layer,
            raster,
        });
    }

    Ok(results)
}

/// Extract document metadata from a PDF without rendering pages.
pub async fn extract_metadata(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, IngestError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, pwd.as_deref()))
        .await
        .map_err(|e| IngestError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, IngestError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| load_error(pdf_path, password, e))?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: pages.len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
