//! Job lifecycle: identity, status, progress and the chunk plan.
//!
//! A [`JobRecord`] is the durable view of one ingestion run. Its transition
//! methods are the only way the runner mutates it, so the lifecycle
//!
//! ```text
//! PENDING ──start──▶ PROCESSING ──complete──▶ COMPLETED
//!                        │
//!                        └──────fail────────▶ FAILED
//! ```
//!
//! is enforced in one place: terminal states refuse every further change and
//! `advance` never lets progress go backwards.

use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner: String,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    /// Page count, set once the document is opened.
    pub total_pages: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// One-line reason, set only when the job FAILED.
    pub failure: Option<String>,
}

impl JobRecord {
    /// A fresh PENDING job.
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner: owner.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            total_pages: 0,
            created_at: now,
            updated_at: now,
            failure: None,
        }
    }

    /// PENDING → PROCESSING.
    pub fn start(&mut self) -> Result<(), IngestError> {
        if self.status != JobStatus::Pending {
            return Err(self.refuse("start"));
        }
        self.status = JobStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Record the page count. Only while PROCESSING, and only once.
    pub fn set_total_pages(&mut self, total_pages: usize) -> Result<(), IngestError> {
        if self.status != JobStatus::Processing || self.total_pages != 0 {
            return Err(self.refuse("set page count"));
        }
        self.total_pages = total_pages;
        self.touch();
        Ok(())
    }

    /// Raise progress to `percent` (clamped to `[0, 100]`). Lower values are
    /// ignored so progress never decreases.
    pub fn advance(&mut self, percent: f64) -> Result<(), IngestError> {
        if self.status != JobStatus::Processing {
            return Err(self.refuse("advance"));
        }
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        if percent > self.progress {
            self.progress = percent;
        }
        self.touch();
        Ok(())
    }

    /// PROCESSING → COMPLETED, progress forced to exactly 100.
    pub fn complete(&mut self) -> Result<(), IngestError> {
        if self.status != JobStatus::Processing {
            return Err(self.refuse("complete"));
        }
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.touch();
        Ok(())
    }

    /// PENDING/PROCESSING → FAILED. Progress is left where the last committed
    /// chunk put it.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), IngestError> {
        if self.status.is_terminal() {
            return Err(self.refuse("fail"));
        }
        self.status = JobStatus::Failed;
        self.failure = Some(first_line(&reason.into()));
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn refuse(&self, action: &'static str) -> IngestError {
        IngestError::InvalidTransition {
            job: self.id,
            status: self.status,
            action,
        }
    }
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or_default().trim().to_string()
}

/// A contiguous page range `[start, end)` processed and committed as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 0-based position in the plan.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn pages(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Progress reached once this chunk is committed.
    pub fn progress_after(&self, total_pages: usize) -> f64 {
        if total_pages == 0 {
            100.0
        } else {
            100.0 * self.end as f64 / total_pages as f64
        }
    }
}

/// Split `total_pages` into consecutive chunks of at most `chunk_size` pages.
pub fn plan_chunks(total_pages: usize, chunk_size: usize) -> Vec<Chunk> {
    let size = chunk_size.max(1);
    (0..total_pages)
        .step_by(size)
        .enumerate()
        .map(|(index, start)| Chunk {
            index,
            start,
            end: (start + size).min(total_pages),
        })
        .collect()
}
