use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{BackupOutcome, JobHistory, JobResult, UploadResult};

/// A finished backup, as listed in the history view.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryBackupJob {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: HistoryOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum HistoryOutcome {
    Error { message: String },
    Success(UploadResult),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("date range ends ({end}) before it starts ({start})")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Closed range of calendar days, both ends included.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if end < start {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// Backup entries only, optionally restricted to `range` (by start day in `tz`), newest first.
pub fn assemble_history<Tz: TimeZone>(
    history: &JobHistory,
    range: Option<&DateRange>,
    tz: &Tz,
) -> Vec<HistoryBackupJob> {
    let mut jobs: Vec<HistoryBackupJob> = history
        .entries
        .iter()
        .filter_map(|entry| match entry {
            JobResult::Restore(_) => None,
            JobResult::IncrementalBackup(b) => Some(HistoryBackupJob {
                started_at: b.started_at,
                finished_at: b.finished_at,
                result: match &b.state {
                    BackupOutcome::Error(message) => HistoryOutcome::Error { message: message.clone() },
                    BackupOutcome::Success(upload) => HistoryOutcome::Success(upload.clone()),
                },
            }),
        })
        .filter(|job| match range {
            Some(r) => r.contains(job.started_at.with_timezone(tz).date_naive()),
            None => true,
        })
        .collect();

    jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    jobs
}
