use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// One status line per pipeline stage: a spinner while the stage runs, a
/// green check once it succeeds.
pub struct Stage {
    bar: ProgressBar,
    title: String,
}

impl Stage {
    pub fn begin(title: impl Into<String>) -> Self {
        let title = title.into();
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(title.clone());
        bar.enable_steady_tick(Duration::from_millis(120));
        tracing::debug!("stage: {title}");
        Self { bar, title }
    }

    /// Update the line with progress detail, eg. the cache decision.
    pub fn note(&self, detail: impl AsRef<str>) {
        self.bar.set_message(format!("{} ({})", self.title, detail.as_ref()));
    }

    pub fn done(self) {
        if let Ok(style) = ProgressStyle::with_template("{prefix:.green.bold} {msg}") {
            self.bar.set_style(style);
        }
        self.bar.set_prefix("✔");
        self.bar.finish();
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        // A stage dropped without `done` failed; leave the line without a marker.
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

/// Final banner printed once every stage has succeeded.
pub fn completed(message: &str) {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{prefix:.green.bold} {msg:.green}") {
        bar.set_style(style);
    }
    bar.set_prefix("✔");
    bar.finish_with_message(message.to_string());
}
