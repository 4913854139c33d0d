//! Progress reporting support (requires `progress` feature)

use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar counting the parts of one shard
///
/// Pair it with [`CopyWorker::with_part_callback`](crate::CopyWorker::with_part_callback)
/// and call `inc(1)` per acknowledged part.
#[must_use]
pub fn create_progress_bar(parts: u64) -> ProgressBar {
    let pb = ProgressBar::new(parts);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} parts ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}
