//! Wire types for the backup service's `/api/jobs` endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionLevel {
    None,
    Fast,
    Balanced,
    Best,
}

/// Body of `GET /api/jobs/status`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobStates {
    #[serde(default)]
    pub restore: Option<serde_json::Value>,
    #[serde(default)]
    pub backup: Option<BackupJobState>,
}

impl JobStates {
    /// The running incremental backup, if any. This is the snapshot fed to the session.
    pub fn into_snapshot(self) -> Option<JobSnapshot> {
        self.backup.map(|b| match b {
            BackupJobState::Incremental(state) => state,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BackupJobState {
    Incremental(JobSnapshot),
}

/// One poll's view of the active incremental backup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub started_at: DateTime<Utc>,
    pub stage: Stage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    FetchingMetadata,
    Uploading(UploadState),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadState {
    /// Produced by the service, not the time we received it.
    pub timestamp: DateTime<Utc>,
    pub parent: Option<u32>,
    pub remote_filename: String,
    pub local_snapshot: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub compression_level: CompressionLevel,
    pub encrypted: bool,
    pub finishing: bool,
}

/// Body of `GET /api/jobs/history`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobHistory {
    pub entries: Vec<JobResult>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum JobResult {
    IncrementalBackup(IncrementalBackupResult),
    Restore(RestoreResult),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncrementalBackupResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: BackupOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BackupOutcome {
    Error(String),
    Success(UploadResult),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    #[serde(default)]
    pub id: Option<u32>,
    pub parent: Option<u32>,
    pub remote_filename: String,
    pub local_snapshot: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub compression_level: CompressionLevel,
    pub encrypted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RestoreOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RestoreOutcome {
    Error(String),
    Success { target_backup_id: u32 },
}
