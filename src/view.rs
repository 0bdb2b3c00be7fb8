use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CompressionLevel, JobSnapshot, Stage};

/// What the dashboard shows for the running backup on one tick.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CurrentJobView {
    pub started_at: DateTime<Utc>,
    pub stage: StageView,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "tag")]
pub enum StageView {
    FetchingMetadata,
    Uploading(UploadingView),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadingView {
    pub timestamp: DateTime<Utc>,
    pub parent: Option<u32>,
    pub remote_filename: String,
    pub local_snapshot: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_written_per_second: f64,
    pub compression_level: CompressionLevel,
    pub encrypted: bool,
    pub finishing: bool,
}

impl UploadingView {
    /// Written/read as a percentage; `None` without compression or before anything was read.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.compression_level == CompressionLevel::None || self.bytes_read == 0 {
            return None;
        }
        Some(self.bytes_written as f64 / self.bytes_read as f64 * 100.0)
    }
}

// Pure: no I/O, the rate comes in from the estimator.
pub fn build_view(snapshot: Option<&JobSnapshot>, bytes_per_second: f64) -> Option<CurrentJobView> {
    let snapshot = snapshot?;
    let stage = match &snapshot.stage {
        Stage::FetchingMetadata => StageView::FetchingMetadata,
        Stage::Uploading(up) => StageView::Uploading(UploadingView {
            timestamp: up.timestamp,
            parent: up.parent,
            remote_filename: up.remote_filename.clone(),
            local_snapshot: up.local_snapshot.clone(),
            bytes_read: up.bytes_read,
            bytes_written: up.bytes_written,
            bytes_written_per_second: bytes_per_second,
            compression_level: up.compression_level,
            encrypted: up.encrypted,
            finishing: up.finishing,
        }),
    };
    Some(CurrentJobView {
        started_at: snapshot.started_at,
        stage,
    })
}
