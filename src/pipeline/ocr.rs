//! Recognition engines for image-only pages.
//!
//! An [`OcrEngine`] turns one page raster into text. The extractor calls it at
//! most once per page and treats every error as "no text", so engines report
//! failures precisely and leave the fallback to the caller.

use crate::error::OcrError;
use crate::pipeline::encode::{encode_page, png_bytes};
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use image::DynamicImage;
use std::io::{ErrorKind, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Reads text from a rendered page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Recognise the text of `page` (1-based, for diagnostics).
    async fn recognize(&self, page: usize, image: &DynamicImage) -> Result<String, OcrError>;
}

/// Runs the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: String,
    timeout_secs: u64,
}

impl TesseractOcr {
    pub fn new(language: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: language.into(),
            timeout_secs,
        }
    }

    /// Use a specific executable instead of `tesseract` on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, page: usize, image: &DynamicImage) -> Result<String, OcrError> {
        let png = png_bytes(image)?;
        let mut tmp = tempfile::Builder::new()
            .prefix("page-")
            .suffix(".png")
            .tempfile()?;
        tmp.write_all(&png)?;
        tmp.flush()?;

        let run = Command::new(&self.binary)
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), run)
            .await
            .map_err(|_| OcrError::Timeout {
                page,
                secs: self.timeout_secs,
            })?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrError::Unavailable {
                    backend: "tesseract".into(),
                    detail: format!("'{}' not found on PATH", self.binary),
                },
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed {
                page,
                detail: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(page, chars = text.len(), "tesseract finished");
        Ok(text)
    }
}

/// Transcribes pages with a vision-capable LLM.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl VisionOcr {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        temperature: f32,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            timeout_secs,
        }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(&self, page: usize, image: &DynamicImage) -> Result<String, OcrError> {
        let image_data = encode_page(image)?;
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image_data]),
        ];

        let response = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| OcrError::Timeout {
            page,
            secs: self.timeout_secs,
        })?
        .map_err(|e| OcrError::Failed {
            page,
            detail: e.to_string(),
        })?;

        debug!(
            page,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "vision OCR finished"
        );
        Ok(response.content)
    }
}

/// Recognition switched off: scanned pages stay blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _page: usize, _image: &DynamicImage) -> Result<String, OcrError> {
        Err(OcrError::Unavailable {
            backend: "disabled".into(),
            detail: "OCR is turned off".into(),
        })
    }
}
