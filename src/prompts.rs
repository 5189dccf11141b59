//! Prompts for the two LLM-backed capabilities: merchant categorization and
//! vision OCR.
//!
//! Kept together so the wire contract with the model (`merchant|category`
//! lines, plain-text transcription) can be read and tested in one place.

use crate::model::Category;

/// System prompt for merchant categorization.
pub const CATEGORIZE_SYSTEM_PROMPT: &str = r#"You classify merchants from bank and UPI statements into spending categories.

Respond STRICTLY with one line per merchant in the format:
Merchant|Category

Rules:
- Copy each merchant name exactly as given.
- Use only the categories listed by the user.
- Do NOT add markdown, numbering, headers or explanations."#;

/// System prompt for transcribing a scanned statement page.
pub const OCR_SYSTEM_PROMPT: &str = r#"You transcribe scanned financial statement pages to plain text.

Rules:
- Output every line of text exactly as printed, top to bottom.
- Keep each table cell, date, amount and label on its own line.
- Keep currency symbols, commas and decimal points as printed.
- Do NOT summarise, translate, reformat as markdown or add commentary.
- If the page has no readable text, output nothing."#;

/// Build the user message for one categorization batch.
///
/// Merchants are listed one per line so names containing commas stay intact.
pub fn categorize_request(merchants: &[String], taxonomy: &[Category]) -> String {
    let categories = taxonomy
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Categorize each merchant into exactly one of these categories:\n{categories}\n\nMerchants:\n{}",
        merchants.join("\n")
    )
}
