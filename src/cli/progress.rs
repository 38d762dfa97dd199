//! Terminal progress display for single jobs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::pagination::ProgressSink;

/// Spinner whose message follows the pagination progress lines.
pub struct JobSpinner {
    bar: ProgressBar,
}

impl JobSpinner {
    pub fn new(username: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("Waiting for a job slot for @{}...", username));
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for JobSpinner {
    fn report(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }
}

impl Drop for JobSpinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
