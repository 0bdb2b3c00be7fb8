use chrono::{Days, Local, NaiveDate};
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Paragraph, Wrap};

use crate::format;
use crate::history::{assemble_history, DateRange, HistoryBackupJob, HistoryOutcome};
use crate::model::JobHistory;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DateFilter { All, Today, Last7Days, Last30Days }

impl DateFilter {
    pub fn next(self) -> Self {
        match self {
            DateFilter::All => DateFilter::Today,
            DateFilter::Today => DateFilter::Last7Days,
            DateFilter::Last7Days => DateFilter::Last30Days,
            DateFilter::Last30Days => DateFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DateFilter::All => "all",
            DateFilter::Today => "today",
            DateFilter::Last7Days => "last 7 days",
            DateFilter::Last30Days => "last 30 days",
        }
    }

    pub fn range(self, today: NaiveDate) -> Option<DateRange> {
        let back = match self {
            DateFilter::All => return None,
            DateFilter::Today => 0,
            DateFilter::Last7Days => 6,
            DateFilter::Last30Days => 29,
        };
        let start = today.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN);
        DateRange::new(start, today).ok()
    }
}

pub struct HistoryPanel {
    pub filter: DateFilter,
    pub scroll: usize,
}

impl HistoryPanel {
    pub fn new() -> Self {
        Self { filter: DateFilter::All, scroll: 0 }
    }

    pub fn cycle_filter(&mut self) {
        self.filter = self.filter.next();
        self.scroll = 0;
    }

    pub fn jobs(&self, history: &JobHistory, today: NaiveDate) -> Vec<HistoryBackupJob> {
        assemble_history(history, self.filter.range(today).as_ref(), &Local)
    }
}

pub fn job_line(job: &HistoryBackupJob) -> String {
    let started = format::datetime(&job.started_at, &Local);
    let took = (job.finished_at - job.started_at).num_seconds().max(0);
    match &job.result {
        HistoryOutcome::Error { message } => format!("{started}  FAILED  {message}"),
        HistoryOutcome::Success(up) => {
            let parent = up.parent.map(|p| format!(" <- {p}")).unwrap_or_default();
            format!(
                "{started}  ok  {}  {}{parent}  {:?}{}  {took}s",
                format::bytes(up.bytes_written),
                up.remote_filename,
                up.compression_level,
                if up.encrypted { ", encrypted" } else { "" },
            )
        }
    }
}

// Newest first, so scrolling moves further into the past.
pub fn history_paragraph(jobs: &[HistoryBackupJob], panel: &HistoryPanel, area: Rect) -> Paragraph<'static> {
    let viewport = area.height.saturating_sub(2) as usize;
    if jobs.is_empty() {
        return Paragraph::new("No backups found");
    }
    let start = panel.scroll.min(jobs.len().saturating_sub(viewport.max(1)));
    let lines: Vec<Line> = jobs
        .iter()
        .skip(start)
        .take(viewport)
        .map(|j| Line::from(Span::raw(job_line(j))))
        .collect();
    Paragraph::new(lines).wrap(Wrap { trim: false })
}
