mod cli;
mod client;
mod format;
mod history;
mod metrics;
mod model;
mod poller;
mod session;
mod ui;
mod view;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, Connection, OutputFormat, Watch};
use crate::client::{ApiError, HttpSource, SnapshotSource};
use crate::history::{assemble_history, DateRange, DateRangeError, HistoryBackupJob};
use crate::poller::{PollIntervals, Poller};
use crate::session::{Applied, JobSession};
use crate::ui::history::job_line;
use crate::ui::overview::{current_job_lines, run_tui};
use crate::view::{CurrentJobView, StageView};

fn connect(conn: &Connection) -> Result<Arc<dyn SnapshotSource>> {
    let source = HttpSource::new(&conn.host, conn.timeout()).context("Building HTTP client")?;
    Ok(Arc::new(source))
}

fn stop_on_ctrlc() -> Arc<AtomicBool> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }
    stop_flag
}

fn run_watch(conn: Connection, watch: Watch) -> Result<()> {
    let source = connect(&conn)?;
    let stop = stop_on_ctrlc();
    info!(host = %conn.host, "Starting ddwatch dashboard");

    let intervals = PollIntervals {
        status: conn.status_interval(),
        history: Some(Duration::from_millis(watch.history_interval_ms)),
    };
    let (mut poller, polls) = Poller::spawn(Arc::clone(&source), intervals);
    let result = run_tui(source, polls, stop);
    poller.shutdown();
    result.map(|_| ())
}

/// One line per tick for `status --follow`.
fn status_line(view: Option<&CurrentJobView>, show_rate: bool) -> String {
    let Some(view) = view else {
        return "idle".to_string();
    };
    match &view.stage {
        StageView::FetchingMetadata => "fetching metadata".to_string(),
        StageView::Uploading(up) => {
            let mut line = format!(
                "{}  written {} / read {}",
                if up.finishing { "finishing" } else { "uploading" },
                format::bytes(up.bytes_written),
                format::bytes(up.bytes_read),
            );
            if show_rate {
                line.push_str(&format!("  {}", format::rate(up.bytes_written_per_second)));
            }
            if let Some(ratio) = up.compression_ratio() {
                line.push_str(&format!("  {:?} {ratio:.2}%", up.compression_level));
            }
            if up.encrypted {
                line.push_str("  encrypted");
            }
            line
        }
    }
}

fn print_view(view: Option<&CurrentJobView>, format: OutputFormat, show_rate: bool) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", status_line(view, show_rate)),
        OutputFormat::Json => println!("{}", serde_json::to_string(&view)?),
    }
    Ok(())
}

fn run_status(conn: Connection, follow: bool, format: OutputFormat) -> Result<()> {
    let source = connect(&conn)?;
    if !follow {
        let states = source.job_states().context("Fetching job status")?;
        let mut session = JobSession::new();
        let view = session.ingest(states.into_snapshot().as_ref());
        return match format {
            OutputFormat::Text => {
                let lines = current_job_lines(view);
                // A single poll has no rate yet.
                for line in lines.iter().filter(|l| !l.starts_with("Speed:")) {
                    println!("{line}");
                }
                Ok(())
            }
            OutputFormat::Json => print_view(view, format, false),
        };
    }

    let stop = stop_on_ctrlc();
    let intervals = PollIntervals { status: conn.status_interval(), history: None };
    let (mut poller, polls) = Poller::spawn(source, intervals);
    let mut session = JobSession::new();
    while !stop.load(Ordering::Relaxed) {
        match polls.recv_timeout(Duration::from_millis(200)) {
            Ok(poll) => match session.apply(poll) {
                Applied::Updated => {
                    let show_rate = session.window().len() >= 2 || session.bytes_per_second() > 0.0;
                    print_view(session.view(), format, show_rate)?;
                }
                Applied::Failed => {
                    eprintln!("status unavailable: {}", session.status_error().unwrap_or_default());
                }
                Applied::OutOfOrder | Applied::Discarded => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    session.close();
    poller.shutdown();
    Ok(())
}

fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Option<DateRange>, DateRangeError> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    DateRange::new(from.unwrap_or(NaiveDate::MIN), to.unwrap_or(NaiveDate::MAX)).map(Some)
}

fn print_history(jobs: &[HistoryBackupJob], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if jobs.is_empty() {
                println!("No backups found");
            }
            for job in jobs {
                println!("{}", job_line(job));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(jobs)?),
    }
    Ok(())
}

fn run_history(conn: Connection, from: Option<NaiveDate>, to: Option<NaiveDate>, format: OutputFormat) -> Result<()> {
    let range = date_range(from, to)?;
    let source = connect(&conn)?;
    let history = source.history().context("Fetching job history")?;
    let jobs = assemble_history(&history, range.as_ref(), &Local);
    print_history(&jobs, format)
}

fn run_start(conn: Connection) -> Result<()> {
    let source = connect(&conn)?;
    let status = source.start_backup().context("Requesting backup start")?;
    println!("Backup requested ({status})");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let conn = cli.conn;
    let result: Result<()> = match cli.command.unwrap_or_else(|| Commands::Watch(Watch::default())) {
        Commands::Watch(watch) => run_watch(conn, watch),
        Commands::Status { follow, format } => run_status(conn, follow, format),
        Commands::History { from, to, format } => run_history(conn, from, to, format),
        Commands::Start => run_start(conn),
    };

    if let Err(err) = result {
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: bad arguments, 3: server said no, 4: unreachable, 5: undecodable reply, 1: other
    for cause in err.chain() {
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return match api {
                ApiError::Status { .. } => 3,
                ApiError::Decode { .. } => 5,
                ApiError::Request(_) if api.is_unreachable() => 4,
                ApiError::Request(_) => 1,
            };
        }
        if cause.is::<DateRangeError>() {
            return 2;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::{fetching, uploading};
    use crate::view::build_view;
    use reqwest::StatusCode;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn exit_code_server_status() {
        let err = anyhow::Error::from(ApiError::Status {
            status: StatusCode::CONFLICT,
            url: "http://x/api/jobs/incremental_backup".into(),
        });
        assert_eq!(exit_code_for_error(&err), 3);
    }

    #[test]
    fn exit_code_decode_through_context() {
        let decode = crate::client::decode::<crate::model::JobStates>("http://x", b"nope").unwrap_err();
        let err = anyhow::Error::from(decode).context("Fetching job status");
        assert_eq!(exit_code_for_error(&err), 5);
    }

    #[test]
    fn exit_code_inverted_range() {
        let err = anyhow::Error::from(date_range(Some(day(2024, 2, 1)), Some(day(2024, 1, 1))).unwrap_err());
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_other() {
        let err = anyhow::anyhow!("other");
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn open_ended_ranges() {
        assert_eq!(date_range(None, None).unwrap(), None);
        let from_only = date_range(Some(day(2024, 1, 1)), None).unwrap().unwrap();
        assert!(from_only.contains(day(2099, 1, 1)));
        assert!(!from_only.contains(day(2023, 12, 31)));
    }

    #[test]
    fn status_lines() {
        assert_eq!(status_line(None, true), "idle");
        assert_eq!(status_line(build_view(Some(&fetching(0)), 5.0).as_ref(), true), "fetching metadata");

        let view = build_view(Some(&uploading(0, 1, 1000)), 250.0);
        let with_rate = status_line(view.as_ref(), true);
        assert!(with_rate.starts_with("uploading"));
        assert!(with_rate.contains(&format::rate(250.0)));
        assert!(with_rate.ends_with("encrypted"));
        assert!(!status_line(view.as_ref(), false).contains("/s"));
    }
}
