//! Progress bars for downloads and table loads
//!
//! All bars hang off one `MultiProgress` so concurrent downloads render as
//! separate lines. Tests and non-interactive runs use a hidden target.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const DOWNLOAD_TEMPLATE: &str =
    "{msg:24} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {percent:>3}% ({eta})";
const ROWS_TEMPLATE: &str =
    "{msg:24} [{elapsed_precise}] [{wide_bar:.green/blue}] {human_pos}/{human_len} rows {percent:>3}%";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// Shared handle for every progress bar of one run
#[derive(Clone)]
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    /// Bars drawn to stderr
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    /// Bars that track state but never draw
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Byte progress for one archive; `total` is unknown without a content-length
    pub fn download(&self, name: &str, total: Option<u64>) -> ProgressBar {
        let pb = match total {
            Some(len) => ProgressBar::new(len).with_style(bar_style(DOWNLOAD_TEMPLATE)),
            None => ProgressBar::new_spinner().with_style(spinner_style()),
        };
        let pb = self.multi.add(pb);
        pb.set_message(name.to_string());
        pb
    }

    /// Row progress for one file being loaded into `table`
    pub fn rows(&self, table: &str, total: u64) -> ProgressBar {
        let pb = self
            .multi
            .add(ProgressBar::new(total).with_style(bar_style(ROWS_TEMPLATE)));
        pb.set_message(table.to_string());
        pb
    }

    /// Indeterminate work such as extraction or index builds
    pub fn spinner(&self, message: &str) -> ProgressBar {
        let pb = self
            .multi
            .add(ProgressBar::new_spinner().with_style(spinner_style()));
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_parse() {
        for template in [DOWNLOAD_TEMPLATE, ROWS_TEMPLATE] {
            assert!(ProgressStyle::default_bar().template(template).is_ok());
        }
        assert!(ProgressStyle::default_spinner().template(SPINNER_TEMPLATE).is_ok());
    }

    #[test]
    fn test_download_bar_with_known_length() {
        let progress = Progress::hidden();
        let pb = progress.download("Empresas0.zip", Some(1024));
        assert_eq!(pb.length(), Some(1024));
        pb.inc(512);
        assert_eq!(pb.position(), 512);
    }

    #[test]
    fn test_rows_bar() {
        let progress = Progress::hidden();
        let pb = progress.rows("empresa", 3);
        pb.inc(3);
        pb.finish();
        assert!(pb.is_finished());
    }
}
