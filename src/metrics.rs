use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::model::{JobSnapshot, Stage};

pub const WINDOW_CAPACITY: usize = 5;

/// `(timestamp, cumulative bytes written)` from one uploading snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub bytes_written: u64,
}

/// Recent samples of a single job run, oldest first.
///
/// Every entry belongs to the same run and `bytes_written` never decreases
/// from one entry to the next. Anything that would break that empties the
/// window before the new sample goes in.
#[derive(Debug, Default)]
pub struct SampleWindow {
    run: Option<DateTime<Utc>>,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self {
            run: None,
            samples: VecDeque::with_capacity(WINDOW_CAPACITY + 1),
        }
    }

    pub fn ingest(&mut self, snapshot: Option<&JobSnapshot>) {
        let (started_at, upload) = match snapshot {
            Some(JobSnapshot { started_at, stage: Stage::Uploading(up) }) => (*started_at, up),
            Some(JobSnapshot { stage: Stage::FetchingMetadata, .. }) | None => {
                self.clear();
                return;
            }
        };

        let candidate = Sample {
            timestamp: upload.timestamp,
            bytes_written: upload.bytes_written,
        };
        if self.is_reset(started_at, &candidate) {
            self.clear();
        }
        self.run = Some(started_at);
        self.samples.push_back(candidate);
        if self.samples.len() > WINDOW_CAPACITY {
            self.samples.pop_front();
        }
    }

    fn is_reset(&self, started_at: DateTime<Utc>, candidate: &Sample) -> bool {
        let Some(last) = self.samples.back() else {
            return false;
        };
        candidate.bytes_written < last.bytes_written
            || candidate.timestamp < last.timestamp
            || self.run != Some(started_at)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.run = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

/// Sliding-window average over the samples currently held by a [`SampleWindow`].
///
/// Holds its last value whenever the window can't produce a rate, so the
/// displayed speed goes stale instead of dropping to zero.
#[derive(Debug, Default)]
pub struct RateEstimator {
    bytes_per_second: f64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self { bytes_per_second: 0.0 }
    }

    pub fn estimate(&mut self, window: &SampleWindow) -> f64 {
        if let (Some(oldest), Some(newest)) = (window.oldest(), window.newest()) {
            let elapsed_ms = (newest.timestamp - oldest.timestamp).num_milliseconds();
            if window.len() >= 2 && elapsed_ms > 0 {
                let delta_bytes = newest.bytes_written.saturating_sub(oldest.bytes_written);
                self.bytes_per_second = delta_bytes as f64 / (elapsed_ms as f64 / 1000.0);
            }
        }
        self.bytes_per_second
    }

    pub fn current(&self) -> f64 {
        self.bytes_per_second
    }
}
