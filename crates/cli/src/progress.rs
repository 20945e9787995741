//! Terminal progress rendering.

use indicatif::{ProgressBar, ProgressStyle};

use pipeline::ProgressSink;

/// Advances an `indicatif` bar by one per completed model call.
///
/// The expected total is a floor: retried turns make extra calls, so a tick
/// at the end of the bar grows its length instead of overrunning it.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    /// A bar sized to `expected` calls, or a spinner when the total is unknown.
    pub fn new(expected: Option<u64>, label: &'static str) -> Self {
        let bar = match expected {
            Some(len) => {
                let bar = ProgressBar::new(len);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})",
                ) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) =
                    ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {pos} {msg}")
                {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.set_message(label);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn tick(&self) {
        if self.bar.length().is_some_and(|len| self.bar.position() >= len) {
            self.bar.inc_length(1);
        }
        self.bar.inc(1);
    }
}
