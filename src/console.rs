// Terminal status sink: one status line per event plus a redrawn progress bar

use parking_lot::Mutex;
use std::io::Write;

use crate::downloader::models::ProgressSnapshot;
use crate::downloader::traits::StatusSink;

pub const BAR_WIDTH: usize = 72;

/// `Progress: |███---| 42.00%` for a percentage in `[0, 100]`
pub fn make_progress_bar(percent: f64, width: usize) -> String {
    let percent = percent.clamp(0.0, 100.0);
    let filled = ((width as f64 * percent / 100.0).floor() as usize).min(width);
    format!(
        "Progress: |{}{}| {:.2}%",
        "█".repeat(filled),
        "-".repeat(width - filled),
        percent
    )
}

#[derive(Debug)]
pub struct ConsoleSink {
    width: usize,
    /// Cursor is at the end of a bar that has not been terminated yet
    bar_open: Mutex<bool>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::with_width(BAR_WIDTH)
    }

    pub fn with_width(width: usize) -> Self {
        Self {
            width,
            bar_open: Mutex::new(false),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ConsoleSink {
    fn on_status(&self, message: &str) {
        let mut bar_open = self.bar_open.lock();
        let mut out = std::io::stdout().lock();
        if *bar_open {
            let _ = writeln!(out);
            *bar_open = false;
        }
        let _ = writeln!(out, "{}", message);
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let percent = snapshot.percent();
        let mut bar_open = self.bar_open.lock();
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r{}", make_progress_bar(percent, self.width));
        if percent >= 100.0 {
            let _ = writeln!(out);
            *bar_open = false;
        } else {
            *bar_open = true;
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(make_progress_bar(50.0, 10), "Progress: |█████-----| 50.00%");
        assert_eq!(make_progress_bar(0.0, 4), "Progress: |----| 0.00%");
        assert_eq!(make_progress_bar(100.0, 4), "Progress: |████| 100.00%");
    }

    #[test]
    fn bar_clamps_out_of_range() {
        assert_eq!(make_progress_bar(250.0, 4), "Progress: |████| 100.00%");
        assert_eq!(make_progress_bar(-3.0, 4), "Progress: |----| 0.00%");
    }

    #[test]
    fn bar_rounds_partial_cells_down() {
        assert_eq!(make_progress_bar(42.0, 72).matches('█').count(), 30);
    }
}
