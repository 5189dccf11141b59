//! Pipeline stages for statement-to-transaction ingestion.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested alone and the external capabilities (pdfium, OCR, LLM) can be
//! swapped behind their traits.
//!
//! ## Data Flow (per chunk of pages)
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ parse ──▶ categorize
//! (path/URL) (pdfium)  (text/OCR)  (FSM)    (batched LLM)
//! ```
//!
//! 1. [`input`]: canonicalise a path, URL or byte buffer to a local PDF
//! 2. [`render`]: load text layers, rasterise only pages that need OCR;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`extract`]: choose text layer or [`ocr`] output per page, then
//!    [`postprocess`] it
//! 4. [`parse`]: recover transaction blocks with a line state machine
//! 5. [`categorize`]: assign one category per unique merchant
//!
//! [`encode`] is shared by the OCR engines.

pub mod categorize;
pub mod encode;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod parse;
pub mod postprocess;
pub mod render;
