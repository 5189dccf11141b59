//! Configuration types for statement ingestion.
//!
//! All ingestion behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. The OCR threshold, chunk size, categorization
//! batch size and taxonomy all live here.

use crate::error::IngestError;
use crate::model::Category;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for statement ingestion.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use statement2txn::{IngestConfig, OcrBackendKind};
///
/// let config = IngestConfig::builder()
///     .chunk_size(25)
///     .batch_size(40)
///     .ocr(OcrBackendKind::Tesseract)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Rendering DPI for pages sent to OCR. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps memory for oversized pages independently of DPI.
    pub max_rendered_pixels: u32,

    /// A page whose trimmed text layer has fewer characters than this is
    /// treated as scanned and sent to OCR. Default: 50.
    pub min_text_chars: usize,

    /// Pages per chunk; progress is committed after every chunk. Default: 50.
    pub chunk_size: usize,

    /// Maximum merchants per categorization call. Default: 50.
    pub batch_size: usize,

    /// Categories the classifier may answer with. Default: all eight.
    /// Labels outside this list resolve to [`Category::Other`].
    pub taxonomy: Vec<Category>,

    /// Recognition engine for image-only pages. Default: Tesseract.
    pub ocr: OcrBackendKind,

    /// Tesseract language code. Default: "eng".
    pub ocr_language: String,

    /// Pages of one chunk recognised concurrently. Default: 4.
    pub ocr_concurrency: usize,

    /// Per-page OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Call the categorization backend at all. Default: true.
    ///
    /// When false every transaction is stored as [`Category::Other`] and no
    /// LLM provider is needed.
    pub categorize: bool,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for LLM calls. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens per LLM answer. Default: 2048.
    pub max_tokens: usize,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted statements.
    pub password: Option<String>,

    /// Owner identity stamped on jobs and transactions. Default: "default_user".
    pub owner: String,

    /// Jobs executed at the same time by the service. Default: 2.
    pub max_concurrent_jobs: usize,

    /// Submissions buffered before `submit` waits. Default: 64.
    pub queue_capacity: usize,

    /// Optional observer for job and chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            min_text_chars: 50,
            chunk_size: 50,
            batch_size: 50,
            taxonomy: Category::ALL.to_vec(),
            ocr: OcrBackendKind::default(),
            ocr_language: "eng".to_string(),
            ocr_concurrency: 4,
            ocr_timeout_secs: 120,
            categorize: true,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 2048,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            owner: "default_user".to_string(),
            max_concurrent_jobs: 2,
            queue_capacity: 64,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("min_text_chars", &self.min_text_chars)
            .field("chunk_size", &self.chunk_size)
            .field("batch_size", &self.batch_size)
            .field("taxonomy", &self.taxonomy)
            .field("ocr", &self.ocr)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_concurrency", &self.ocr_concurrency)
            .field("categorize", &self.categorize)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("owner", &self.owner)
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("queue_capacity", &self.queue_capacity)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when the configured OCR engine or categorizer needs an LLM provider.
    pub fn needs_llm(&self) -> bool {
        self.categorize || self.ocr == OcrBackendKind::Vision
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages;
        self
    }

    pub fn batch_size(mut self, merchants: usize) -> Self {
        self.config.batch_size = merchants;
        self
    }

    pub fn taxonomy(mut self, categories: Vec<Category>) -> Self {
        self.config.taxonomy = categories;
        self
    }

    pub fn ocr(mut self, kind: OcrBackendKind) -> Self {
        self.config.ocr = kind;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_concurrency(mut self, n: usize) -> Self {
        self.config.ocr_concurrency = n.max(1);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn categorize(mut self, v: bool) -> Self {
        self.config.categorize = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.owner = owner.into();
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(IngestError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.chunk_size == 0 {
            return Err(IngestError::InvalidConfig("Chunk size must be ≥ 1".into()));
        }
        if c.batch_size == 0 {
            return Err(IngestError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.taxonomy.is_empty() {
            return Err(IngestError::InvalidConfig(
                "Taxonomy must name at least one category".into(),
            ));
        }
        if c.max_concurrent_jobs == 0 || c.queue_capacity == 0 {
            return Err(IngestError::InvalidConfig(
                "Job concurrency and queue capacity must be ≥ 1".into(),
            ));
        }
        if c.owner.trim().is_empty() {
            return Err(IngestError::InvalidConfig("Owner must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which recognition engine reads image-only pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrBackendKind {
    /// The `tesseract` binary on `PATH`. (default)
    #[default]
    Tesseract,
    /// A vision LLM through the configured provider.
    Vision,
    /// No recognition: scanned pages yield empty text.
    Disabled,
}
