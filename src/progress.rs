//! Terminal progress for runtime generation
//!
//! Progress is optional: a disabled [`GenerationProgress`] hands out no bars
//! and every call site treats the bar as `Option<ProgressBar>`.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Style presets for different types of progress indicators
pub struct ProgressStyles;

impl ProgressStyles {
    /// Style for counted file processing (shows count and speed)
    pub fn files() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {msg}",
        )
        .map(|style| style.progress_chars("█▓▒░  "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    /// Style for indeterminate stages (spinner only)
    pub fn spinner() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
            .map(|style| style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Style for a finished stage
    pub fn success() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    /// Style for a failed stage
    pub fn error() -> ProgressStyle {
        ProgressStyle::with_template("{prefix:.red} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

/// Progress tracker for one generation run
pub struct GenerationProgress {
    multi: Option<MultiProgress>,
}

impl GenerationProgress {
    /// Create a tracker; a disabled one draws nothing
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: enabled.then(MultiProgress::new),
        }
    }

    /// Check whether bars are drawn
    pub fn is_enabled(&self) -> bool {
        self.multi.is_some()
    }

    /// Spinner for a stage
    pub fn stage(&self, msg: &str) -> Option<ProgressBar> {
        let multi = self.multi.as_ref()?;
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyles::spinner());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    }

    /// Counted bar for file processing
    pub fn files(&self, total: u64, msg: &str) -> Option<ProgressBar> {
        let multi = self.multi.as_ref()?;
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyles::files());
        pb.set_message(msg.to_string());
        Some(pb)
    }
}

/// Helper trait for progress bar operations
pub trait ProgressExt {
    /// Finish with a success message
    fn finish_success(&self, msg: &str);

    /// Finish with an error message
    fn finish_error(&self, msg: &str);
}

impl ProgressExt for ProgressBar {
    fn finish_success(&self, msg: &str) {
        self.set_style(ProgressStyles::success());
        self.set_prefix("✓");
        self.finish_with_message(msg.to_string());
    }

    fn finish_error(&self, msg: &str) {
        self.set_style(ProgressStyles::error());
        self.set_prefix("✗");
        self.finish_with_message(msg.to_string());
    }
}
