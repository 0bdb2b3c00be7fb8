use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, Receiver, Sender};
use tracing::{debug, info};

use crate::client::{ApiError, SnapshotSource};
use crate::model::{JobHistory, JobStates};

// Requests allowed to overlap per feed before ticks are skipped.
const MAX_IN_FLIGHT: usize = 4;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// One completed poll. `seq` counts ticks of its own feed, starting at 1.
#[derive(Debug)]
pub enum PollEvent {
    Status { seq: u64, result: Result<JobStates, ApiError> },
    History { seq: u64, result: Result<JobHistory, ApiError> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Feed {
    Status,
    History,
}

impl Feed {
    fn fetch(self, source: &dyn SnapshotSource, seq: u64) -> PollEvent {
        match self {
            Feed::Status => PollEvent::Status { seq, result: source.job_states() },
            Feed::History => PollEvent::History { seq, result: source.history() },
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PollIntervals {
    pub status: Duration,
    /// `None` leaves history unpolled.
    pub history: Option<Duration>,
}

/// Timer threads that fire one request per tick and push results into a channel.
///
/// Results that complete after [`Poller::shutdown`] are dropped, never sent.
pub struct Poller {
    stop: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    tickers: Vec<JoinHandle<()>>,
    in_flight: Vec<Arc<AtomicUsize>>,
}

impl Poller {
    pub fn spawn(source: Arc<dyn SnapshotSource>, intervals: PollIntervals) -> (Self, Receiver<PollEvent>) {
        let (events_tx, events_rx) = channel::unbounded::<PollEvent>();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));

        let mut feeds = vec![(Feed::Status, intervals.status)];
        if let Some(history) = intervals.history {
            feeds.push((Feed::History, history));
        }

        let mut tickers = Vec::new();
        let mut in_flight = Vec::new();
        for (feed, interval) in feeds {
            let counter = Arc::new(AtomicUsize::new(0));
            let ctx = Ticker {
                feed,
                interval,
                source: Arc::clone(&source),
                events: events_tx.clone(),
                stop: Arc::clone(&stop),
                stop_rx: stop_rx.clone(),
                in_flight: Arc::clone(&counter),
            };
            tickers.push(thread::spawn(move || ctx.run()));
            in_flight.push(counter);
        }
        info!(status_ms = intervals.status.as_millis() as u64, history = intervals.history.is_some(), "Polling started");

        (
            Self {
                stop,
                stop_tx: Some(stop_tx),
                tickers,
                in_flight,
            },
            events_rx,
        )
    }

    pub fn shutdown(&mut self) {
        if self.stop_tx.is_none() {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);
        // Disconnecting wakes tickers blocked in select!
        self.stop_tx.take();
        for handle in self.tickers.drain(..) {
            let _ = handle.join();
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.in_flight.iter().any(|c| c.load(Ordering::SeqCst) > 0) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        info!("Polling stopped");
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Ticker {
    feed: Feed,
    interval: Duration,
    source: Arc<dyn SnapshotSource>,
    events: Sender<PollEvent>,
    stop: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    in_flight: Arc<AtomicUsize>,
}

impl Ticker {
    fn run(self) {
        let ticker = channel::tick(self.interval);
        let mut seq = 0u64;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.in_flight.load(Ordering::SeqCst) >= MAX_IN_FLIGHT {
                debug!(feed = ?self.feed, "Skipping tick, too many requests in flight");
            } else {
                seq += 1;
                self.fire(seq);
            }
            channel::select! {
                recv(self.stop_rx) -> _ => break,
                recv(ticker) -> _ => {}
            }
        }
    }

    fn fire(&self, seq: u64) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let feed = self.feed;
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let stop = Arc::clone(&self.stop);
        let in_flight = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            let event = feed.fetch(source.as_ref(), seq);
            if stop.load(Ordering::SeqCst) {
                debug!(?feed, seq, "Discarding poll result after shutdown");
            } else {
                let _ = events.send(event);
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::AtomicU64;

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub status_calls: AtomicU64,
        pub history_calls: AtomicU64,
        pub starts: AtomicU64,
    }

    impl SnapshotSource for FakeSource {
        fn job_states(&self) -> Result<JobStates, ApiError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobStates::default())
        }

        fn history(&self) -> Result<JobHistory, ApiError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobHistory::default())
        }

        fn start_backup(&self) -> Result<StatusCode, ApiError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(StatusCode::ACCEPTED)
        }
    }

    fn intervals(history: Option<u64>) -> PollIntervals {
        PollIntervals {
            status: Duration::from_millis(10),
            history: history.map(Duration::from_millis),
        }
    }

    #[test]
    fn status_ticks_carry_distinct_sequence_numbers() {
        let source = Arc::new(FakeSource::default());
        let (mut poller, rx) = Poller::spawn(source.clone(), intervals(None));
        let mut seqs = Vec::new();
        while seqs.len() < 3 {
            match rx.recv_timeout(Duration::from_secs(2)).expect("poll event") {
                PollEvent::Status { seq, result } => {
                    assert!(result.is_ok());
                    seqs.push(seq);
                }
                PollEvent::History { .. } => panic!("history was not enabled"),
            }
        }
        poller.shutdown();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 3);
        assert!(seqs[0] >= 1);
        assert_eq!(source.history_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn history_feed_runs_when_enabled() {
        let source = Arc::new(FakeSource::default());
        let (_poller, rx) = Poller::spawn(source, intervals(Some(10)));
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut saw_history = false;
        while !saw_history && Instant::now() < deadline {
            if let Ok(PollEvent::History { seq, .. }) = rx.recv_timeout(Duration::from_millis(200)) {
                assert!(seq >= 1);
                saw_history = true;
            }
        }
        assert!(saw_history);
    }

    #[test]
    fn nothing_arrives_after_shutdown() {
        let source = Arc::new(FakeSource::default());
        let (mut poller, rx) = Poller::spawn(source.clone(), intervals(Some(10)));
        rx.recv_timeout(Duration::from_secs(2)).expect("first event");
        poller.shutdown();
        while rx.try_recv().is_ok() {}

        let calls = source.status_calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert!(rx.try_recv().is_err());
        assert_eq!(source.status_calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (mut poller, _rx) = Poller::spawn(Arc::new(FakeSource::default()), intervals(None));
        poller.shutdown();
        poller.shutdown();
    }
}
