//! Terminal output
//!
//! Everything a command prints goes through `Formatter`; upload progress goes
//! through `UploadProgress`.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::UploadProgress;

use peg_core::config::Defaults;

/// Output configuration derived from CLI flags and config defaults
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Use JSON output format
    pub json: bool,
    /// Disable colored output
    pub no_color: bool,
    /// Disable progress bars
    pub no_progress: bool,
    /// Suppress non-error output
    pub quiet: bool,
}

impl OutputConfig {
    /// Apply the `[defaults]` section; flags can only switch features on
    pub fn with_defaults(mut self, defaults: &Defaults) -> Self {
        self.json |= defaults.output.eq_ignore_ascii_case("json");
        self.no_progress |= !defaults.progress;
        self
    }
}
