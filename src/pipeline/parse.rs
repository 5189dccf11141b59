//! Transaction block parser.
//!
//! Statement exports (UPI apps in particular) lay every transaction out as a
//! fixed run of lines:
//!
//! ```text
//! Feb 21, 2026          ← date anchor
//! UPI                   ← channel, not interpreted
//! DEBIT                 ← type
//! ₹250.00               ← amount
//! Paid to               ← direction phrase
//! Coffee House          ← merchant tail, one or more lines …
//! Transaction ID 123    ← … until a stop line or the next date anchor
//! ```
//!
//! The grammar is driven by an explicit state machine. Every state that can
//! reject a candidate does so by returning to [`State::AwaitDate`] with the
//! cursor one line past the rejected anchor, so a malformed block costs
//! exactly one line of progress and nothing else.
//!
//! Amounts may be written in Indic, Arabic-Indic or fullwidth digits; those
//! are read as their ASCII equivalents.

use crate::model::{truncate_field, Direction, TransactionRecord, UNKNOWN_MERCHANT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

static DATE_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][a-z]{2}\s\d{1,2},\s\d{4}$").unwrap());

static AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9.,]+").unwrap());

/// Lines that end a merchant tail.
const STOP_PREFIXES: [&str; 3] = ["Transaction ID", "Bank Reference", "UTR No"];

/// Direction phrases whose tail is the merchant verbatim.
const CANONICAL_PHRASES: [&str; 4] = ["Paid to", "Received from", "Sent to", "Added to"];

/// Why a date-anchored candidate produced no record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "line", rename_all = "snake_case")]
pub enum RejectReason {
    /// The type line was neither DEBIT nor CREDIT.
    InvalidType(String),
    /// The amount line held a numeric run that is not a number.
    MalformedAmount(String),
    /// Input ended before the direction line.
    Truncated,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidType(l) => write!(f, "invalid type line '{l}'"),
            RejectReason::MalformedAmount(l) => write!(f, "malformed amount '{l}'"),
            RejectReason::Truncated => f.write_str("block truncated"),
        }
    }
}

/// A candidate block that was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRejection {
    /// Position of the anchor among the non-empty lines.
    pub anchor_line: usize,
    pub date: String,
    pub reason: RejectReason,
}

/// Records plus the candidates that were rejected along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub records: Vec<TransactionRecord>,
    pub rejected: Vec<BlockRejection>,
}

#[derive(Debug)]
struct Candidate<'a> {
    anchor: usize,
    date: &'a str,
    direction: Direction,
    amount: f64,
    phrase: &'a str,
    tail: Vec<&'a str>,
}

impl<'a> Candidate<'a> {
    fn new(anchor: usize, date: &'a str) -> Self {
        Self {
            anchor,
            date,
            direction: Direction::Debit,
            amount: 0.0,
            phrase: "",
            tail: Vec::new(),
        }
    }

    fn into_record(self) -> TransactionRecord {
        let tail = self.tail.join(" ");
        let tail = tail.trim();
        let (description, merchant) = derive_merchant(self.phrase, tail);
        let merchant = if merchant.is_empty() {
            UNKNOWN_MERCHANT.to_string()
        } else {
            merchant
        };
        TransactionRecord {
            date: self.date.to_string(),
            description: truncate_field(&description),
            merchant: truncate_field(&merchant),
            amount: self.amount,
            direction: self.direction,
            category: None,
        }
    }
}

#[derive(Debug)]
enum State<'a> {
    AwaitDate,
    AwaitChannel(Candidate<'a>),
    AwaitType(Candidate<'a>),
    AwaitAmount(Candidate<'a>),
    AwaitDirection(Candidate<'a>),
    AccumulateMerchant(Candidate<'a>),
}

/// Parse statement text into transaction records, in order of appearance.
///
/// Never fails: unparseable candidates are skipped. Categories are left unset.
pub fn parse_transactions(text: &str) -> Vec<TransactionRecord> {
    parse_with_report(text).records
}

/// Like [`parse_transactions`], also reporting every rejected candidate.
pub fn parse_with_report(text: &str) -> ParseReport {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut report = ParseReport::default();
    let mut state = State::AwaitDate;
    let mut cursor = 0usize;

    loop {
        let line = lines.get(cursor).copied();
        state = match (state, line) {
            (State::AwaitDate, None) => break,
            (State::AwaitDate, Some(l)) => {
                cursor += 1;
                if is_date_anchor(l) {
                    State::AwaitChannel(Candidate::new(cursor - 1, l))
                } else {
                    State::AwaitDate
                }
            }
            (State::AwaitChannel(c), Some(_)) => {
                cursor += 1;
                State::AwaitType(c)
            }
            (State::AwaitType(mut c), Some(l)) => match Direction::from_type_line(l) {
                Some(direction) => {
                    c.direction = direction;
                    cursor += 1;
                    State::AwaitAmount(c)
                }
                None => {
                    cursor = reject(&mut report, c, RejectReason::InvalidType(l.to_string()));
                    State::AwaitDate
                }
            },
            (State::AwaitAmount(mut c), Some(l)) => match parse_amount(l) {
                Some(amount) => {
                    c.amount = amount;
                    cursor += 1;
                    State::AwaitDirection(c)
                }
                None => {
                    cursor = reject(&mut report, c, RejectReason::MalformedAmount(l.to_string()));
                    State::AwaitDate
                }
            },
            (State::AwaitDirection(mut c), Some(l)) => {
                c.phrase = l;
                cursor += 1;
                State::AccumulateMerchant(c)
            }
            (State::AccumulateMerchant(mut c), Some(l)) if !is_stop_line(l) => {
                c.tail.push(l);
                cursor += 1;
                State::AccumulateMerchant(c)
            }
            // Stop line or end of input: emit, resume at the stop line.
            (State::AccumulateMerchant(c), _) => {
                report.records.push(c.into_record());
                State::AwaitDate
            }
            (
                State::AwaitChannel(c)
                | State::AwaitType(c)
                | State::AwaitAmount(c)
                | State::AwaitDirection(c),
                None,
            ) => {
                cursor = reject(&mut report, c, RejectReason::Truncated);
                State::AwaitDate
            }
        };
    }

    report
}

/// Record a rejection and return the cursor to resume from.
fn reject(report: &mut ParseReport, c: Candidate<'_>, reason: RejectReason) -> usize {
    debug!(anchor = c.anchor, date = c.date, "Rejected block: {}", reason);
    report.rejected.push(BlockRejection {
        anchor_line: c.anchor,
        date: c.date.to_string(),
        reason,
    });
    c.anchor + 1
}

fn is_date_anchor(line: &str) -> bool {
    DATE_ANCHOR.is_match(line)
}

fn is_stop_line(line: &str) -> bool {
    STOP_PREFIXES.iter().any(|p| line.starts_with(p)) || is_date_anchor(line)
}

/// Zero code points of the decimal digit blocks OCR emits for Indic and
/// Arabic statements, plus fullwidth digits.
const DIGIT_ZEROS: [u32; 12] = [
    0x0660, 0x06F0, 0x0966, 0x09E6, 0x0A66, 0x0AE6, 0x0B66, 0x0BE6, 0x0C66, 0x0CE6, 0x0D66,
    0xFF10,
];

fn ascii_digit(c: char) -> char {
    let cp = c as u32;
    DIGIT_ZEROS
        .iter()
        .find(|&&zero| (zero..zero + 10).contains(&cp))
        .and_then(|&zero| char::from_digit(cp - zero, 10))
        .unwrap_or(c)
}

/// First numeric run with commas removed. No run at all is `0.0`; a run that
/// is not a finite number (`,`, `1.2.3`, hundreds of digits) is `None`.
fn parse_amount(line: &str) -> Option<f64> {
    let line: String = line.chars().map(ascii_digit).collect();
    match AMOUNT.find(&line) {
        None => Some(0.0),
        Some(m) => m
            .as_str()
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite()),
    }
}

/// Returns `(description, merchant)`; merchant may be empty.
///
/// For a non-canonical phrase the merchant is a heuristic: the description
/// with every canonical phrase removed.
fn derive_merchant(phrase: &str, tail: &str) -> (String, String) {
    if CANONICAL_PHRASES.contains(&phrase) {
        return (format!("{phrase} {tail}"), tail.to_string());
    }

    let description = if tail.is_empty() {
        phrase.to_string()
    } else {
        format!("{phrase} {tail}")
    };
    let merchant = CANONICAL_PHRASES
        .iter()
        .fold(description.clone(), |acc, p| acc.replace(p, ""));
    (description, merchant.trim().to_string())
}
