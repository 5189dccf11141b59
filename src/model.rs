//! Transaction types produced by the parser and persisted by the runner.

use crate::job::JobId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Merchant used when a block carries no recoverable counterparty.
pub const UNKNOWN_MERCHANT: &str = "Unknown";

/// Maximum length (in characters) of `description` and `merchant`.
pub const MAX_FIELD_CHARS: usize = 255;

/// Whether money left or entered the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    /// Parse a statement type line. Case-insensitive; anything other than
    /// `DEBIT` / `CREDIT` is `None`.
    pub fn from_type_line(line: &str) -> Option<Self> {
        match line.to_uppercase().as_str() {
            "DEBIT" => Some(Direction::Debit),
            "CREDIT" => Some(Direction::Credit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spend category. The taxonomy is closed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Category {
    Food,
    Travel,
    Bills,
    Shopping,
    Transfer,
    Entertainment,
    Health,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Food,
        Category::Travel,
        Category::Bills,
        Category::Shopping,
        Category::Transfer,
        Category::Entertainment,
        Category::Health,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Travel => "Travel",
            Category::Bills => "Bills",
            Category::Shopping => "Shopping",
            Category::Transfer => "Transfer",
            Category::Entertainment => "Entertainment",
            Category::Health => "Health",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown category '{wanted}'"))
    }
}

/// One transaction recovered from statement text.
///
/// Emitted by [`crate::pipeline::parse`] with `category: None`; only the
/// category is filled in afterwards, via [`TransactionRecord::with_category`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Date line exactly as it appeared, e.g. `Feb 21, 2026`.
    pub date: String,
    pub description: String,
    pub merchant: String,
    /// Non-negative magnitude; the sign lives in `direction`.
    pub amount: f64,
    pub direction: Direction,
    pub category: Option<Category>,
}

impl TransactionRecord {
    /// Best-effort conversion of the raw date line.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.date.trim(), "%b %d, %Y").ok()
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

/// A transaction row as persisted for an owner and a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: Uuid,
    pub job_id: JobId,
    pub owner: String,
    pub txn_date: Option<NaiveDate>,
    pub raw_date: String,
    pub description: String,
    pub merchant: String,
    pub amount: f64,
    pub direction: Direction,
    pub category: Category,
    pub upi_id: Option<String>,
    pub is_recurring: bool,
}

impl StoredTransaction {
    /// Build the persisted row for a parsed record and its resolved category.
    pub fn new(
        job_id: JobId,
        owner: impl Into<String>,
        record: TransactionRecord,
        category: Category,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            owner: owner.into(),
            txn_date: record.parsed_date(),
            raw_date: record.date,
            description: record.description,
            merchant: record.merchant,
            amount: record.amount,
            direction: record.direction,
            category,
            upi_id: None,
            is_recurring: false,
        }
    }
}

/// Truncate to at most [`MAX_FIELD_CHARS`] characters (not bytes).
pub(crate) fn truncate_field(s: &str) -> String {
    match s.char_indices().nth(MAX_FIELD_CHARS) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str) -> TransactionRecord {
        TransactionRecord {
            date: date.to_string(),
            description: "Paid to Coffee House".into(),
            merchant: "Coffee House".into(),
            amount: 250.0,
            direction: Direction::Debit,
            category: None,
        }
    }

    #[test]
    fn direction_is_case_insensitive() {
        assert_eq!(Direction::from_type_line("debit"), Some(Direction::Debit));
        assert_eq!(Direction::from_type_line("Credit"), Some(Direction::Credit));
        assert_eq!(Direction::from_type_line("UPI"), None);
    }

    #[test]
    fn category_from_str_trims_and_ignores_case() {
        assert_eq!(" food ".parse::<Category>(), Ok(Category::Food));
        assert_eq!("ENTERTAINMENT".parse::<Category>(), Ok(Category::Entertainment));
        assert!("Groceries".parse::<Category>().is_err());
    }

    #[test]
    fn direction_serializes_uppercase() {
        let json = serde_json::to_string(&Direction::Credit).unwrap();
        assert_eq!(json, "\"CREDIT\"");
    }

    #[test]
    fn parsed_date_converts_statement_format() {
        assert_eq!(
            record("Feb 21, 2026").parsed_date(),
            NaiveDate::from_ymd_opt(2026, 2, 21)
        );
        assert_eq!(
            record("Mar 3, 2025").parsed_date(),
            NaiveDate::from_ymd_opt(2025, 3, 3)
        );
        assert_eq!(record("Feb 31, 2026").parsed_date(), None);
    }

    #[test]
    fn truncate_counts_characters() {
        let long = "₹".repeat(300);
        let cut = truncate_field(&long);
        assert_eq!(cut.chars().count(), MAX_FIELD_CHARS);
        assert_eq!(truncate_field("short"), "short");
    }

    #[test]
    fn stored_transaction_carries_resolved_category() {
        let job = JobId::new();
        let row = StoredTransaction::new(job, "alice", record("Feb 21, 2026"), Category::Food);
        assert_eq!(row.job_id, job);
        assert_eq!(row.category, Category::Food);
        assert_eq!(row.txn_date, NaiveDate::from_ymd_opt(2026, 2, 21));
        assert_eq!(row.raw_date, "Feb 21, 2026");
        assert!(!row.is_recurring);
    }
}
