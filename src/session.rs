use tracing::{debug, warn};

use crate::client::ApiError;
use crate::metrics::{RateEstimator, SampleWindow};
use crate::model::{JobHistory, JobSnapshot, JobStates};
use crate::poller::PollEvent;
use crate::view::{build_view, CurrentJobView};

/// What happened to a poll result handed to [`JobSession::apply`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// Older than a result already applied.
    OutOfOrder,
    /// Transport or decode failure; previous state kept.
    Failed,
    /// Arrived after the session was closed.
    Discarded,
}

/// State of one dashboard session: the sample window, the rate, and the last good views.
///
/// Fed by a single consumer loop, so nothing here needs locking.
#[derive(Debug, Default)]
pub struct JobSession {
    window: SampleWindow,
    rate: RateEstimator,
    view: Option<CurrentJobView>,
    history: Option<JobHistory>,
    last_status_seq: u64,
    last_history_seq: u64,
    status_error: Option<String>,
    history_error: Option<String>,
    closed: bool,
}

impl JobSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: PollEvent) -> Applied {
        match event {
            PollEvent::Status { seq, result } => self.apply_status(seq, result),
            PollEvent::History { seq, result } => self.apply_history(seq, result),
        }
    }

    pub fn apply_status(&mut self, seq: u64, result: Result<JobStates, ApiError>) -> Applied {
        if self.closed {
            return Applied::Discarded;
        }
        if seq <= self.last_status_seq {
            debug!(seq, last = self.last_status_seq, "Dropping out-of-order status");
            return Applied::OutOfOrder;
        }
        self.last_status_seq = seq;
        match result {
            Ok(states) => {
                self.status_error = None;
                self.ingest(states.into_snapshot().as_ref());
                Applied::Updated
            }
            Err(err) => {
                warn!(seq, error = %err, "Status poll failed");
                self.status_error = Some(err.to_string());
                Applied::Failed
            }
        }
    }

    pub fn apply_history(&mut self, seq: u64, result: Result<JobHistory, ApiError>) -> Applied {
        if self.closed {
            return Applied::Discarded;
        }
        if seq <= self.last_history_seq {
            debug!(seq, last = self.last_history_seq, "Dropping out-of-order history");
            return Applied::OutOfOrder;
        }
        self.last_history_seq = seq;
        match result {
            Ok(history) => {
                self.history_error = None;
                self.history = Some(history);
                Applied::Updated
            }
            Err(err) => {
                warn!(seq, error = %err, "History poll failed");
                self.history_error = Some(err.to_string());
                Applied::Failed
            }
        }
    }

    /// Runs one snapshot through window, estimator and view builder.
    pub fn ingest(&mut self, snapshot: Option<&JobSnapshot>) -> Option<&CurrentJobView> {
        if self.closed {
            return self.view.as_ref();
        }
        self.window.ingest(snapshot);
        let bytes_per_second = self.rate.estimate(&self.window);
        self.view = build_view(snapshot, bytes_per_second);
        self.view.as_ref()
    }

    /// Stops accepting results. Anything applied afterwards is discarded.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn view(&self) -> Option<&CurrentJobView> {
        self.view.as_ref()
    }

    pub fn job_active(&self) -> bool {
        self.view.is_some()
    }

    pub fn history(&self) -> Option<&JobHistory> {
        self.history.as_ref()
    }

    pub fn status_error(&self) -> Option<&str> {
        self.status_error.as_deref()
    }

    pub fn history_error(&self) -> Option<&str> {
        self.history_error.as_deref()
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.rate.current()
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::{fetching, uploading};
    use crate::model::BackupJobState;
    use crate::view::StageView;

    fn rate_of(view: Option<&CurrentJobView>) -> Option<f64> {
        match &view?.stage {
            StageView::Uploading(up) => Some(up.bytes_written_per_second),
            StageView::FetchingMetadata => None,
        }
    }

    fn states(snapshot: Option<JobSnapshot>) -> JobStates {
        JobStates {
            restore: None,
            backup: snapshot.map(BackupJobState::Incremental),
        }
    }

    fn window_bytes(session: &JobSession) -> Vec<u64> {
        session.window().samples().map(|s| s.bytes_written).collect()
    }

    #[test]
    fn steady_upload_averages_over_last_five_samples() {
        let mut session = JobSession::new();
        let series = [0u64, 1000, 3000, 6000, 10000, 15000];
        let mut last = None;
        for (t, b) in series.into_iter().enumerate() {
            last = rate_of(session.ingest(Some(&uploading(0, t as i64, b))));
        }
        assert_eq!(window_bytes(&session), vec![1000, 3000, 6000, 10000, 15000]);
        assert_eq!(last, Some(3500.0));
    }

    #[test]
    fn counter_reset_holds_rate_until_second_sample() {
        let mut session = JobSession::new();
        session.ingest(Some(&uploading(0, 0, 5000)));
        let before = rate_of(session.ingest(Some(&uploading(0, 1, 8000))));
        assert_eq!(before, Some(3000.0));

        let after = rate_of(session.ingest(Some(&uploading(0, 2, 3000))));
        assert_eq!(window_bytes(&session), vec![3000]);
        assert_eq!(after, Some(3000.0));

        let rebuilt = rate_of(session.ingest(Some(&uploading(0, 4, 4000))));
        assert_eq!(rebuilt, Some(500.0));
    }

    #[test]
    fn metadata_phase_clears_window_and_holds_rate() {
        let mut session = JobSession::new();
        session.ingest(Some(&uploading(0, 0, 0)));
        session.ingest(Some(&uploading(0, 2, 4000)));
        assert_eq!(session.bytes_per_second(), 2000.0);

        let view = session.ingest(Some(&fetching(10))).cloned().unwrap();
        assert_eq!(view.stage, StageView::FetchingMetadata);
        assert!(session.window().is_empty());
        assert_eq!(session.bytes_per_second(), 2000.0);

        let first = rate_of(session.ingest(Some(&uploading(10, 11, 100))));
        assert_eq!(first, Some(2000.0));
        assert_eq!(window_bytes(&session), vec![100]);

        let second = rate_of(session.ingest(Some(&uploading(10, 12, 600))));
        assert_eq!(second, Some(500.0));
    }

    #[test]
    fn no_job_clears_view_and_window() {
        let mut session = JobSession::new();
        session.ingest(Some(&uploading(0, 0, 0)));
        assert!(session.job_active());
        assert_eq!(session.apply_status(1, Ok(states(None))), Applied::Updated);
        assert!(!session.job_active());
        assert!(session.window().is_empty());
    }

    #[test]
    fn late_status_is_dropped() {
        let mut session = JobSession::new();
        assert_eq!(session.apply_status(2, Ok(states(Some(uploading(0, 2, 2000))))), Applied::Updated);
        assert_eq!(session.apply_status(1, Ok(states(None))), Applied::OutOfOrder);
        assert!(session.job_active());
        assert_eq!(session.apply_status(2, Ok(states(None))), Applied::OutOfOrder);
        assert_eq!(window_bytes(&session), vec![2000]);
    }

    #[test]
    fn transport_failure_keeps_last_view() {
        let mut session = JobSession::new();
        session.apply_status(1, Ok(states(Some(uploading(0, 1, 100)))));
        let before = session.view().cloned();

        let err = crate::client::decode::<JobStates>("http://x/api/jobs/status", b"{").unwrap_err();
        assert_eq!(session.apply_status(2, Err(err)), Applied::Failed);
        assert_eq!(session.view().cloned(), before);
        assert!(session.status_error().unwrap().contains("could not decode"));

        session.apply_status(3, Ok(states(Some(uploading(0, 2, 300)))));
        assert!(session.status_error().is_none());
        assert_eq!(window_bytes(&session), vec![100, 300]);
    }

    #[test]
    fn history_feed_has_its_own_sequence() {
        let mut session = JobSession::new();
        session.apply_status(5, Ok(states(None)));
        assert_eq!(session.apply_history(1, Ok(JobHistory::default())), Applied::Updated);
        assert_eq!(session.apply_history(1, Ok(JobHistory::default())), Applied::OutOfOrder);
        assert!(session.history().is_some());
    }

    #[test]
    fn closed_session_ignores_results() {
        let mut session = JobSession::new();
        session.apply_status(1, Ok(states(Some(uploading(0, 1, 100)))));
        session.close();
        assert!(session.closed);
        assert_eq!(session.apply_status(2, Ok(states(None))), Applied::Discarded);
        assert_eq!(session.apply_history(1, Ok(JobHistory::default())), Applied::Discarded);
        assert!(session.job_active());
        assert!(session.history().is_none());
        assert_eq!(window_bytes(&session), vec![100]);
    }
}
