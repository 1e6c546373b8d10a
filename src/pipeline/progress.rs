//! Per-method progress reporting.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Pairs per second; unbounded when no time has elapsed.
pub fn throughput(processed: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        processed as f64 / elapsed_secs
    } else {
        f64::INFINITY
    }
}

/// Seconds until `remaining` pairs are done at `rate` pairs per second.
pub fn eta_secs(remaining: usize, rate: f64) -> Option<f64> {
    if remaining == 0 || rate.is_infinite() {
        Some(0.0)
    } else if rate > 0.0 {
        Some(remaining as f64 / rate)
    } else {
        None
    }
}

fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

/// One progress line for `method` on a dataset.
pub fn render_progress(method: &str, processed: usize, total: usize, elapsed_secs: f64) -> String {
    let rate = throughput(processed, elapsed_secs);
    let remaining = total.saturating_sub(processed);
    let percent = if total == 0 {
        100.0
    } else {
        processed as f64 * 100.0 / total as f64
    };
    let rate_text = if rate.is_finite() {
        format!("{rate:.2} pairs/s")
    } else {
        "-- pairs/s".to_string()
    };
    let eta = eta_secs(remaining, rate).map_or_else(|| "--".to_string(), format_duration);

    format!(
        "{method}: {processed}/{total} ({percent:.1}%) | {rate_text} | {remaining} left | ETA {eta}"
    )
}

/// Overwritable progress line for one method's pass over one dataset.
///
/// Elapsed time is measured from construction, so throughput covers the
/// whole pass including failed attempts.
pub struct ProgressReporter {
    bar: ProgressBar,
    method: String,
    total: usize,
    processed: usize,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(method: &str, total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.enable_steady_tick(Duration::from_millis(500));
        Self::with_bar(bar, method, total)
    }

    /// Reporter that draws nothing.
    pub fn hidden(method: &str, total: usize) -> Self {
        Self::with_bar(ProgressBar::hidden(), method, total)
    }

    fn with_bar(bar: ProgressBar, method: &str, total: usize) -> Self {
        let reporter = Self {
            bar,
            method: method.to_string(),
            total,
            processed: 0,
            started: Instant::now(),
        };
        reporter
            .bar
            .set_message(render_progress(method, 0, total, 0.0));
        reporter
    }

    /// Count `n` more merged pairs and redraw. Returns the rendered line.
    pub fn advance(&mut self, n: usize) -> String {
        self.processed += n;
        self.bar.inc(n as u64);
        let line = render_progress(
            &self.method,
            self.processed,
            self.total,
            self.started.elapsed().as_secs_f64(),
        );
        self.bar.set_message(line.clone());
        line
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(10, 2.0), 5.0);
        assert_eq!(throughput(0, 3.0), 0.0);
        assert!(throughput(10, 0.0).is_infinite());
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_secs(10, 5.0), Some(2.0));
        assert_eq!(eta_secs(0, 0.0), Some(0.0));
        assert_eq!(eta_secs(5, f64::INFINITY), Some(0.0));
        assert_eq!(eta_secs(5, 0.0), None);
    }

    #[test]
    fn test_render_progress() {
        let line = render_progress("m1", 50, 200, 10.0);
        assert_eq!(
            line,
            "m1: 50/200 (25.0%) | 5.00 pairs/s | 150 left | ETA 30s"
        );

        let line = render_progress("m1", 100, 3700, 1.0);
        assert!(line.ends_with("ETA 36s"), "{line}");

        let line = render_progress("m1", 1, 7201, 1.0);
        assert!(line.ends_with("ETA 2h00m00s"), "{line}");
    }

    #[test]
    fn test_render_zero_elapsed() {
        let line = render_progress("m1", 4, 4, 0.0);
        assert!(line.contains("-- pairs/s"));
        assert!(line.contains("0 left"));
        assert!(line.ends_with("ETA 0s"));
    }

    #[test]
    fn test_render_nothing_done() {
        let line = render_progress("m1", 0, 10, 5.0);
        assert!(line.contains("(0.0%)"));
        assert!(line.ends_with("ETA --"));
    }

    #[test]
    fn test_hidden_reporter_counts() {
        let mut reporter = ProgressReporter::hidden("m1", 5);
        reporter.advance(2);
        let line = reporter.advance(3);
        assert_eq!(reporter.processed(), 5);
        assert!(line.starts_with("m1: 5/5 (100.0%)"));
        reporter.finish();
    }
}
