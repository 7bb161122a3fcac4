//! Progress bars and progress logging.
//!
//! Batch loops report through a `StageProgress`. In log-only mode the bar is
//! hidden and periodic `info!` lines are emitted instead, which keeps output
//! readable when tailing a log file.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tracing::info;

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Create a progress bar with consistent styling, hidden when `log_only`.
pub fn create_progress_bar(len: u64, msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb
}

/// Create a spinner for indeterminate progress, hidden when `log_only`.
pub fn create_spinner(msg: &str, log_only: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if log_only {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        let style = ProgressStyle::default_spinner()
            .template("{msg} {spinner} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Progress for one load stage, counted in rows.
pub struct StageProgress {
    phase: String,
    bar: ProgressBar,
    total: u64,
    log_only: bool,
}

impl StageProgress {
    pub fn new(phase: &str, total: u64, log_only: bool) -> Self {
        Self {
            phase: phase.to_string(),
            bar: create_progress_bar(total, phase, log_only),
            total,
            log_only,
        }
    }

    /// Advance by `n` rows; logs a line per committed batch in log-only mode.
    pub fn advance(&self, n: u64) {
        self.bar.inc(n);
        if self.log_only {
            let current = self.bar.position();
            info!("[{}] {}/{} ({:.1}%)", self.phase, current, self.total, percent(current, self.total));
        }
    }

    pub fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

fn percent(current: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * current as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }

    #[test]
    fn test_percent_of_empty_total() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(250, 1000), 25.0);
    }

    #[test]
    fn test_stage_progress_counts_rows() {
        let progress = StageProgress::new("artists", 1200, true);
        progress.advance(500);
        progress.advance(500);
        progress.advance(200);
        assert_eq!(progress.bar.position(), 1200);
    }
}
