//! Terminal progress for the CLI: stage spinners during setup and a live
//! frame/violation counter while the loop runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::annotator::RunSummary;
use crate::frame::Frame;
use crate::preview::DisplaySink;

/// Plain mode logs a progress line every this many frames.
const PLAIN_REPORT_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner();
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Running counters for the annotator loop.
    pub fn progress(&self, label: &str) -> ProgressDisplay {
        let spinner = self.use_pretty().then(|| {
            let spinner = spinner();
            spinner.set_message(label.to_string());
            spinner
        });
        ProgressDisplay {
            label: label.to_string(),
            spinner,
            start: Instant::now(),
            last: RunSummary::default(),
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct ProgressDisplay {
    label: String,
    spinner: Option<ProgressBar>,
    start: Instant,
    last: RunSummary,
}

impl ProgressDisplay {
    fn line(&self) -> String {
        format_progress(&self.label, &self.last)
    }
}

impl DisplaySink for ProgressDisplay {
    fn show(&mut self, _frame: &Frame, summary: &RunSummary) -> Result<()> {
        self.last = *summary;
        match &self.spinner {
            Some(spinner) => spinner.set_message(self.line()),
            None if summary.frames_processed % PLAIN_REPORT_EVERY == 0 => {
                eprintln!("{}", self.line());
            }
            None => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        let message = format!("✔ {} ({})", self.line(), format_duration(self.start.elapsed()));
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_progress(label: &str, summary: &RunSummary) -> String {
    format!(
        "{label}: {} frames, {} violations, {} snapshots",
        summary.frames_processed, summary.violations, summary.snapshots_written
    )
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_never_spins() {
        let ui = Ui::new(UiMode::Pretty, false, false);
        assert!(!ui.use_pretty());
        let ui = Ui::new(UiMode::Auto, true, true);
        assert!(!ui.use_pretty());
        let ui = Ui::new(UiMode::Plain, true, false);
        assert!(ui.progress("webcam").spinner.is_none());
    }

    #[test]
    fn progress_line_lists_counters() {
        let summary = RunSummary {
            frames_processed: 12,
            detections_drawn: 20,
            violations: 3,
            snapshots_written: 3,
        };
        assert_eq!(
            format_progress("upload", &summary),
            "upload: 12 frames, 3 violations, 3 snapshots"
        );
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }
}
