use std::io::{self, Write};

use crate::models::MonitorStats;

pub fn format_summary(stats: &MonitorStats) -> String {
    format!(
        "Total rows: {}, Last Down: {:.2}, Avg Down: {:.2}, Last Ping: {:.2}, Avg Ping: {:.2}, \
         Last Up: {:.2}, Avg Up: {:.2}, Problems: {}",
        stats.total_events_written,
        stats.last.download_mbps,
        stats.average.download_mbps,
        stats.last.ping_ms,
        stats.average.ping_ms,
        stats.last.upload_mbps,
        stats.average.upload_mbps,
        stats.problem_count,
    )
}

/// Single overwritable status line.
pub struct StatusLine<W: Write> {
    out: W,
}

impl<W: Write> StatusLine<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn render(&mut self, stats: &MonitorStats) -> io::Result<()> {
        write!(self.out, "\r{}", format_summary(stats))?;
        self.out.flush()
    }

    /// Moves past the status line so later output starts on a fresh line.
    pub fn finish(&mut self) -> io::Result<()> {
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
