use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use crossbeam_channel::{self as channel, Receiver, Sender};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Terminal,
};
use tracing::info;

use crate::client::SnapshotSource;
use crate::format;
use crate::poller::PollEvent;
use crate::session::{Applied, JobSession};
use crate::ui::history::{history_paragraph, HistoryPanel};
use crate::view::{CurrentJobView, StageView};

const MAX_EVENTS: usize = 100;

pub fn current_job_lines(view: Option<&CurrentJobView>) -> Vec<String> {
    let Some(view) = view else {
        return vec!["No backup in progress".to_string()];
    };
    let mut lines = vec![format!("Started: {}", format::datetime(&view.started_at, &Local))];
    match &view.stage {
        StageView::FetchingMetadata => lines.push("Fetching metadata...".to_string()),
        StageView::Uploading(up) if up.finishing => lines.push("Finishing...".to_string()),
        StageView::Uploading(up) => {
            let parent = up.parent.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string());
            let compression = match up.compression_ratio() {
                Some(ratio) => format!("{:?}, {ratio:.2}%", up.compression_level),
                None => format!("{:?}", up.compression_level),
            };
            lines.push(format!("Parent: {parent}    Local snapshot: {}", up.local_snapshot));
            lines.push(format!("Remote file: {}", up.remote_filename));
            lines.push(format!("Compression: {compression}    Encrypted: {}", format::yes_no(up.encrypted)));
            lines.push(format!(
                "Raw size: {}    Remote size: {}",
                format::bytes(up.bytes_read),
                format::bytes(up.bytes_written)
            ));
            lines.push(format!("Speed: {}", format::rate(up.bytes_written_per_second)));
        }
    }
    lines
}

fn push_event(logs: &mut Vec<String>, line: String) {
    logs.push(format!("{} {line}", Local::now().format("%H:%M:%S")));
    if logs.len() > MAX_EVENTS {
        logs.remove(0);
    }
}

pub fn run_tui(
    source: Arc<dyn SnapshotSource>,
    polls: Receiver<PollEvent>,
    stop: Arc<AtomicBool>,
) -> Result<JobSession> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (notice_tx, notice_rx) = channel::unbounded::<String>();
    let result = dashboard_loop(&mut terminal, source, polls, notice_tx, notice_rx, &stop);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn dashboard_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    source: Arc<dyn SnapshotSource>,
    polls: Receiver<PollEvent>,
    notice_tx: Sender<String>,
    notices: Receiver<String>,
    stop: &AtomicBool,
) -> Result<JobSession> {
    let mut session = JobSession::new();
    let mut panel = HistoryPanel::new();
    let mut logs: Vec<String> = Vec::new();
    let mut was_failing = false;

    while !stop.load(Ordering::Relaxed) {
        while let Ok(poll) = polls.try_recv() {
            let is_status = matches!(poll, PollEvent::Status { .. });
            let applied = session.apply(poll);
            if is_status {
                match applied {
                    Applied::Failed if !was_failing => {
                        was_failing = true;
                        let reason = session.status_error().unwrap_or_default().to_string();
                        push_event(&mut logs, format!("Status unavailable: {reason}"));
                    }
                    Applied::Updated if was_failing => {
                        was_failing = false;
                        push_event(&mut logs, "Status: reconnected".to_string());
                    }
                    _ => {}
                }
            }
        }
        while let Ok(notice) = notices.try_recv() {
            push_event(&mut logs, notice);
        }

        let today = Local::now().date_naive();
        let jobs = session.history().map(|h| panel.jobs(h, today)).unwrap_or_default();

        terminal.draw(|f| {
            let outer = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(8), // Current job
                    Constraint::Min(0),    // History
                    Constraint::Length(6), // Events
                    Constraint::Length(1), // Footer
                ].as_ref())
                .split(f.size());

            let mut current = current_job_lines(session.view());
            if let Some(err) = session.status_error() {
                current.push(format!("(stale) {err}"));
            }
            let current = Paragraph::new(current.join("\n"))
                .block(Block::default().title("Current backup").borders(Borders::ALL));
            f.render_widget(current, outer[0]);

            let mut title = match panel.filter.range(today) {
                Some(r) => format!(
                    "History ({}: {} to {}, {} jobs)",
                    panel.filter.label(),
                    r.start().format("%d.%m."),
                    r.end().format("%d.%m."),
                    jobs.len()
                ),
                None => format!("History ({}, {} jobs)", panel.filter.label(), jobs.len()),
            };
            if session.history_error().is_some() {
                title.push_str(" (stale)");
            }
            let history = history_paragraph(&jobs, &panel, outer[1])
                .block(Block::default().title(title).borders(Borders::ALL));
            f.render_widget(history, outer[1]);

            let viewport = outer[2].height.saturating_sub(2) as usize;
            let start = logs.len().saturating_sub(viewport);
            let log_items: Vec<ListItem> = logs.iter().skip(start).map(|l| ListItem::new(l.clone())).collect();
            let log_list = List::new(log_items).block(Block::default().title("Events").borders(Borders::ALL));
            f.render_widget(log_list, outer[2]);

            let footer = if session.job_active() {
                "q: quit | ↑/↓/Home: scroll history | d: date filter | c: clear events"
            } else {
                "q: quit | s: start backup | ↑/↓/Home: scroll history | d: date filter | c: clear events"
            };
            f.render_widget(Paragraph::new(footer), outer[3]);
        })?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Char('q')
                    || (key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL))
                {
                    stop.store(true, Ordering::Relaxed);
                    continue;
                }
                match key.code {
                    KeyCode::Char('s') if !session.job_active() => {
                        push_event(&mut logs, "Requesting backup start...".to_string());
                        request_start(Arc::clone(&source), notice_tx.clone());
                    }
                    KeyCode::Char('s') => push_event(&mut logs, "A backup is already running".to_string()),
                    KeyCode::Char('d') => panel.cycle_filter(),
                    KeyCode::Char('c') => logs.clear(),
                    KeyCode::Down => {
                        if panel.scroll + 1 < jobs.len() {
                            panel.scroll += 1;
                        }
                    }
                    KeyCode::Up => panel.scroll = panel.scroll.saturating_sub(1),
                    KeyCode::Home => panel.scroll = 0,
                    _ => {}
                }
            }
        }
    }

    session.close();
    info!("Dashboard closed");
    Ok(session)
}

// Runs off the UI thread; the outcome comes back as an event line.
fn request_start(source: Arc<dyn SnapshotSource>, notices: Sender<String>) {
    std::thread::spawn(move || {
        let line = match source.start_backup() {
            Ok(status) => format!("Backup requested ({status})"),
            Err(e) => format!("Backup request failed: {e}"),
        };
        let _ = notices.send(line);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::{fetching, uploading};
    use crate::view::build_view;

    #[test]
    fn idle_dashboard_says_so() {
        assert_eq!(current_job_lines(None), vec!["No backup in progress".to_string()]);
    }

    #[test]
    fn fetching_metadata_has_no_speed_line() {
        let view = build_view(Some(&fetching(0)), 10.0);
        let lines = current_job_lines(view.as_ref());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "Fetching metadata...");
    }

    #[test]
    fn uploading_shows_ratio_and_speed() {
        let view = build_view(Some(&uploading(0, 3, 4000)), 3500.0);
        let lines = current_job_lines(view.as_ref());
        assert!(lines.iter().any(|l| l.starts_with("Compression: Fast, 50.00%")));
        assert!(lines.iter().any(|l| l == &format!("Speed: {}", format::rate(3500.0))));
        assert!(lines.iter().any(|l| l.contains("Parent: 1")));
    }

    #[test]
    fn finishing_replaces_details() {
        let mut snap = uploading(0, 3, 4000);
        if let crate::model::Stage::Uploading(up) = &mut snap.stage {
            up.finishing = true;
        }
        let lines = current_job_lines(build_view(Some(&snap), 1.0).as_ref());
        assert_eq!(lines.last().map(String::as_str), Some("Finishing..."));
        assert!(!lines.iter().any(|l| l.starts_with("Speed")));
    }
}
