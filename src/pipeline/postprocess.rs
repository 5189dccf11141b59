//! Post-processing: deterministic cleanup of extracted page text.
//!
//! Text reaches the parser from three places (the pdfium text layer,
//! Tesseract, a vision model) and each has its own quirks: CRLF line endings,
//! zero-width and non-breaking spaces inside labels such as `Paid to`, and a
//! vision model that wraps its answer in a code fence despite being told not
//! to. The block grammar compares lines literally, so these are normalised
//! first.
//!
//! ## Rule Order
//!
//! Fences are stripped on the raw answer, before line endings change, so the
//! fence pattern only has to match `\n`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one page of extracted text.
///
/// Rules (applied in order):
/// 1. Strip outer code fences (vision models sometimes disobey the prompt)
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Map non-breaking and other fixed-width spaces to a plain space
/// 5. Trim trailing whitespace per line
pub fn normalize_page_text(input: &str) -> String {
    let s = strip_code_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = normalise_spaces(&s);
    trim_trailing_whitespace(&s)
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:text|plaintext|markdown|txt)?\r?\n(.*?)\r?\n```\s*$").unwrap()
});

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FFFE}',
        ],
        "",
    )
}

// ── Rule 4: Fixed-width spaces ───────────────────────────────────────────────

fn normalise_spaces(input: &str) -> String {
    input.replace(['\u{00A0}', '\u{2007}', '\u{202F}'], " ")
}

// ── Rule 5: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}
