//! Progress feedback for CLI commands
//!
//! Replays and queries run behind a spinner, stress checks behind a bar
//! counting edit cycles. Nothing is drawn with --quiet.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// How a spinner ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Warning,
    Failed,
}

impl Outcome {
    fn template(self) -> &'static str {
        match self {
            Outcome::Done => "{prefix:.green} {msg}",
            Outcome::Warning => "{prefix:.yellow} {msg}",
            Outcome::Failed => "{prefix:.red} {msg}",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Outcome::Done => "✓",
            Outcome::Warning => "!",
            Outcome::Failed => "✗",
        }
    }
}

/// Spinner shown while a chain operation runs
pub fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Bar over the edit cycles of one stress check
pub fn cycle_bar(cycles: usize, check: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet || cycles == 0 {
        return None;
    }

    let pb = ProgressBar::new(cycles as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:<18} [{bar:40.cyan/blue}] cycle {pos}/{len}")
            .expect("Invalid cycle bar template")
            .progress_chars("█▓░"),
    );
    pb.set_message(check.to_string());
    Some(pb)
}

/// Replace a spinner with a final status line
pub fn finish(pb: Option<ProgressBar>, outcome: Outcome, message: &str) {
    let Some(pb) = pb else {
        return;
    };
    pb.set_style(
        ProgressStyle::default_spinner()
            .template(outcome.template())
            .expect("Invalid finish template"),
    );
    pb.set_prefix(outcome.prefix());
    pb.finish_with_message(message.to_string());
}

/// Remove a finished bar from the terminal
pub fn clear(pb: Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
}
