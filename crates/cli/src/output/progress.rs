//! Per-file upload progress bar
//!
//! Uploaders report completed fractions rather than byte counts, so the bar
//! runs over a fixed number of ticks and the label of the latest event is
//! shown as its message.

use peg_core::{ProgressEvent, ProgressObserver};

use super::OutputConfig;

const TICKS: u64 = 1000;

/// Progress bar for one file; hidden in quiet, JSON and no-progress modes
#[derive(Debug)]
pub struct UploadProgress {
    bar: Option<indicatif::ProgressBar>,
}

impl UploadProgress {
    pub fn new(config: &OutputConfig, name: &str) -> Self {
        let bar = if config.quiet || config.json || config.no_progress {
            None
        } else {
            let bar = indicatif::ProgressBar::new(TICKS);
            bar.set_style(
                indicatif::ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
                    .expect("valid template")
                    .progress_chars("#>-"),
            );
            bar.set_prefix(name.to_string());
            Some(bar)
        };

        Self { bar }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn abandon(&self) {
        if let Some(bar) = &self.bar {
            bar.abandon();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

impl ProgressObserver for UploadProgress {
    fn on_progress(&self, event: ProgressEvent) {
        if let Some(bar) = &self.bar {
            bar.set_position((event.fraction * TICKS as f64).round() as u64);
            bar.set_message(event.label);
        }
    }
}
