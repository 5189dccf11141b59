//! Page text extraction with OCR fallback.
//!
//! A page whose embedded text layer is (nearly) empty is a scan. Its raster
//! goes to the configured [`OcrEngine`] exactly once; whatever comes back,
//! including nothing, is the page's text. No error leaves this module: a page
//! that cannot be read is an empty page.

use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::postprocess::normalize_page_text;
use crate::pipeline::render::RawPage;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    TextLayer,
    Recognized,
    /// Scanned page with no recoverable text.
    Blank,
}

/// Text of one page, ready for the block parser.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 0-based page index.
    pub index: usize,
    pub text: String,
    pub source: TextSource,
}

/// True when a text layer is too short to be the real page content.
///
/// Counts characters of the trimmed text, not bytes.
pub fn needs_recognition(text_layer: &str, min_text_chars: usize) -> bool {
    text_layer.trim().chars().count() < min_text_chars
}

pub struct PageTextExtractor {
    ocr: Arc<dyn OcrEngine>,
    min_text_chars: usize,
    concurrency: usize,
}

impl PageTextExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, min_text_chars: usize) -> Self {
        Self {
            ocr,
            min_text_chars,
            concurrency: 4,
        }
    }

    /// Pages recognised at the same time by [`Self::extract_all`].
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn min_text_chars(&self) -> usize {
        self.min_text_chars
    }

    pub fn engine_name(&self) -> &str {
        self.ocr.name()
    }

    /// Extract the text of one page.
    pub async fn extract(&self, page: RawPage) -> PageText {
        let page_num = page.index + 1;

        if !needs_recognition(&page.text_layer, self.min_text_chars) {
            return PageText {
                index: page.index,
                text: normalize_page_text(&page.text_layer),
                source: TextSource::TextLayer,
            };
        }

        let Some(raster) = page.raster else {
            debug!(page = page_num, "Short text layer and no raster; page is blank");
            return blank(page.index);
        };

        match self.ocr.recognize(page_num, &raster).await {
            Ok(text) => {
                let text = normalize_page_text(&text);
                let source = if text.trim().is_empty() {
                    TextSource::Blank
                } else {
                    TextSource::Recognized
                };
                debug!(page = page_num, engine = self.ocr.name(), chars = text.len(), "Recognised");
                PageText {
                    index: page.index,
                    text,
                    source,
                }
            }
            Err(e) => {
                warn!(page = page_num, engine = self.ocr.name(), "OCR failed: {}", e);
                blank(page.index)
            }
        }
    }

    /// Extract a chunk of pages with bounded concurrency. Output order matches
    /// input order.
    pub async fn extract_all(&self, pages: Vec<RawPage>) -> Vec<PageText> {
        stream::iter(pages)
            .map(|page| self.extract(page))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

fn blank(index: usize) -> PageText {
    PageText {
        index,
        text: String::new(),
        source: TextSource::Blank,
    }
}
