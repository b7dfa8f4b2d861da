use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for a loop over `len` samples.
pub(crate) fn sample_bar(len: usize, message: &str) -> ProgressBar {
    let progress_bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta}) {msg}",
    ) {
        progress_bar.set_style(style.progress_chars("#>-"));
    }
    progress_bar.set_message(message.to_string());
    progress_bar
}
